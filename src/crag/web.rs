//! Web-search capability and conversion of web hits into documents

use super::{Document, WEB_SEARCH_SOURCE};
use crate::error::Result;
use crate::retrieval::Metadata;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A hit returned by a web-search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebDocument {
    pub title: String,
    pub content: String,
    pub url: String,
    pub score: f64,
    /// Backend name, e.g. "duckduckgo"
    pub source: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub retrieved_at: DateTime<Utc>,
}

/// Constraints for a filtered web search
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilters {
    /// Allowed domains; empty allows all
    pub domains: Vec<String>,
    pub exclude_domains: Vec<String>,
    pub language: Option<String>,
    pub time_range: Option<String>,
    pub content_type: Option<String>,
    pub max_results: usize,
}

impl SearchFilters {
    pub fn with_max_results(max_results: usize) -> Self {
        Self {
            max_results,
            ..Default::default()
        }
    }

    /// Whether a URL passes the domain allow/deny lists
    pub fn allows(&self, url: &str) -> bool {
        let Some(host) = url_host(url) else {
            return self.domains.is_empty();
        };

        if self
            .exclude_domains
            .iter()
            .any(|d| host_matches(&host, d))
        {
            return false;
        }

        self.domains.is_empty() || self.domains.iter().any(|d| host_matches(&host, d))
    }
}

fn host_matches(host: &str, domain: &str) -> bool {
    let domain = domain.trim().trim_start_matches('.').to_lowercase();
    !domain.is_empty() && (host == domain || host.ends_with(&format!(".{}", domain)))
}

/// Lower-cased host part of a URL, without port or credentials
pub fn url_host(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, r)| r).unwrap_or(url);
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?.trim();

    if host.is_empty() {
        None
    } else {
        Some(host.to_lowercase())
    }
}

/// External web-search backend
#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search_with_filters(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<WebDocument>>;

    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<WebDocument>> {
        self.search_with_filters(query, &SearchFilters::with_max_results(max_results))
            .await
    }
}

/// Stable id derived from the URL, or a unique time-based id when empty
pub fn web_document_id(url: &str) -> String {
    if url.is_empty() {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        return format!("doc_{}_{}", nanos, &suffix[..8]);
    }

    let digest = blake3::hash(url.as_bytes()).to_hex();
    format!("web_{}", &digest.as_str()[..16])
}

impl From<WebDocument> for Document {
    fn from(web: WebDocument) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(
            "web".to_string(),
            json!({
                "source": web.source,
                "snippet": web.snippet,
                "metadata": Value::Object(web.metadata),
            }),
        );

        Self {
            id: web_document_id(&web.url),
            content: web.content,
            title: web.title,
            url: web.url,
            score: web.score,
            source: WEB_SEARCH_SOURCE.to_string(),
            metadata,
            retrieved_at: Some(web.retrieved_at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn web_doc(url: &str) -> WebDocument {
        WebDocument {
            title: "Title".to_string(),
            content: "content".to_string(),
            url: url.to_string(),
            score: 0.7,
            source: "duckduckgo".to_string(),
            snippet: "snip".to_string(),
            metadata: Metadata::new(),
            retrieved_at: Utc::now(),
        }
    }

    #[test]
    fn test_url_host() {
        assert_eq!(
            url_host("https://user@Docs.Rust-Lang.org:443/book?x=1").as_deref(),
            Some("docs.rust-lang.org")
        );
        assert_eq!(url_host("example.com/path").as_deref(), Some("example.com"));
        assert_eq!(url_host(""), None);
    }

    #[test]
    fn test_filters_allow_and_exclude() {
        let filters = SearchFilters {
            domains: vec!["rust-lang.org".to_string()],
            exclude_domains: vec!["blog.rust-lang.org".to_string()],
            ..Default::default()
        };

        assert!(filters.allows("https://doc.rust-lang.org/std"));
        assert!(filters.allows("https://rust-lang.org"));
        assert!(!filters.allows("https://blog.rust-lang.org/post"));
        assert!(!filters.allows("https://notrust-lang.org"));
        assert!(SearchFilters::default().allows("https://anything.io"));
    }

    #[test]
    fn test_document_ids() {
        let a = web_document_id("https://example.com/a");
        assert!(a.starts_with("web_"));
        assert_eq!(a, web_document_id("https://example.com/a"));
        assert_ne!(a, web_document_id("https://example.com/b"));

        let t1 = web_document_id("");
        let t2 = web_document_id("");
        assert!(t1.starts_with("doc_"));
        assert_ne!(t1, t2);
    }

    #[test]
    fn test_conversion_preserves_web_metadata() {
        let doc = Document::from(web_doc("https://example.com"));

        assert_eq!(doc.source, WEB_SEARCH_SOURCE);
        assert_eq!(doc.metadata["web"]["source"], "duckduckgo");
        assert_eq!(doc.metadata["web"]["snippet"], "snip");
        assert_eq!(doc.score, 0.7);
    }

    struct Capturing;

    #[async_trait]
    impl WebSearcher for Capturing {
        async fn search_with_filters(
            &self,
            query: &str,
            filters: &SearchFilters,
        ) -> Result<Vec<WebDocument>> {
            Ok((0..filters.max_results)
                .map(|i| web_doc(&format!("https://example.com/{}/{}", query, i)))
                .collect())
        }
    }

    #[tokio::test]
    async fn test_search_delegates_with_max_results() {
        let results = Capturing.search("rust", 3).await.unwrap();
        assert_eq!(results.len(), 3);
    }
}

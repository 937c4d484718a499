use crag_search::cli::{load_corpus, Cli, Commands, ConfigAction};
use crag_search::config::Config;
use crag_search::crag::{ConfidenceEvaluator, CorrectionProcessor, CorrectionResult};
use crag_search::error::{CragError, Result};
use crag_search::lexical::{LexicalIndex, SearchOptions};
use crag_search::pipeline::RagPipeline;
use crag_search::retrieval::{FusionEngine, HybridRetriever, RankedSearcher};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Query {
            query,
            corpus,
            limit,
            profile,
            json,
        } => {
            cmd_query(cli.config, &query, &corpus, limit, profile, json)?;
        }
        Commands::Search {
            query,
            corpus,
            limit,
            highlight,
            json,
        } => {
            cmd_search(cli.config, &query, &corpus, limit, highlight, json)?;
        }
        Commands::Explain {
            query,
            document_id,
            corpus,
        } => {
            cmd_explain(cli.config, &query, &document_id, &corpus)?;
        }
        Commands::Stats { corpus, json } => {
            cmd_stats(cli.config, &corpus, json)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose {
        "crag_search=debug"
    } else {
        "crag_search=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_index(config: &Config, corpus: &Path) -> Result<LexicalIndex> {
    let index = LexicalIndex::new(config.tokenizer.clone(), config.bm25)?;
    index.add_documents(load_corpus(corpus)?)?;
    Ok(index)
}

fn cmd_query(
    config_path: Option<PathBuf>,
    query: &str,
    corpus: &Path,
    limit: Option<usize>,
    profile: Option<String>,
    json: bool,
) -> Result<()> {
    let mut config = load_config(config_path, profile)?;
    if let Some(limit) = limit {
        config.hybrid.final_top_k = limit;
        config.crag.max_documents = limit;
    }

    let lexical: Arc<dyn RankedSearcher> = Arc::new(build_index(&config, corpus)?);
    let retriever = HybridRetriever::new(
        None,
        Some(lexical),
        FusionEngine::new(config.fusion.clone())?,
        config.hybrid_options()?,
    )?;

    let crag_config = config.crag_config()?;
    let evaluator = ConfidenceEvaluator::heuristic(&crag_config)?;
    let processor = CorrectionProcessor::new(evaluator, None, crag_config)?;
    let pipeline =
        RagPipeline::new(retriever, processor).with_request_timeout(config.request_timeout()?);

    let result = runtime()?.block_on(async {
        let cancel = CancellationToken::new();
        let on_interrupt = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                on_interrupt.cancel();
            }
        });

        pipeline.answer(query, &cancel).await
    })?;

    if json {
        print_json(&result)?;
    } else {
        print_correction(&result);
    }
    Ok(())
}

fn cmd_search(
    config_path: Option<PathBuf>,
    query: &str,
    corpus: &Path,
    limit: usize,
    highlight: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, None)?;
    let index = build_index(&config, corpus)?;

    crag_search::lexical::validate_query(query)?;
    let options = SearchOptions {
        top_k: limit,
        highlight,
        ..Default::default()
    };
    let results = index.search(query, &options);

    if json {
        return print_json(&results);
    }

    if results.is_empty() {
        println!("No results for '{}'", query);
        return Ok(());
    }

    for result in &results {
        println!(
            "{:>3}. {} ({:.4})",
            result.origin_rank, result.document_id, result.score
        );
        if highlight && !result.highlights.is_empty() {
            for snippet in &result.highlights {
                println!("     {}", snippet);
            }
        } else {
            println!("     {}", result.preview(120));
        }
    }
    Ok(())
}

fn cmd_explain(
    config_path: Option<PathBuf>,
    query: &str,
    document_id: &str,
    corpus: &Path,
) -> Result<()> {
    let config = load_config(config_path, None)?;
    let index = build_index(&config, corpus)?;
    let explanation = index.explain_score(query, document_id)?;

    println!("Document: {}", explanation.document_id);
    println!(
        "Length: {} (average {:.2}, {} documents)",
        explanation.document_length,
        explanation.average_document_length,
        explanation.total_documents
    );
    for term in &explanation.terms {
        println!(
            "  {:<20} tf={} df={} idf={:.4} norm={:.4} boost={:.2} => {:.4}",
            term.term, term.tf, term.df, term.idf, term.normalization, term.boost, term.score
        );
    }
    println!("Total: {:.4}", explanation.total_score);
    Ok(())
}

fn cmd_stats(config_path: Option<PathBuf>, corpus: &Path, json: bool) -> Result<()> {
    let config = load_config(config_path, None)?;
    let stats = build_index(&config, corpus)?.stats();

    if json {
        return print_json(&stats);
    }

    println!("Lexical Index");
    println!("=============");
    println!("Documents:        {}", stats.document_count);
    println!("Unique terms:     {}", stats.unique_terms);
    println!("Avg doc length:   {:.2}", stats.average_document_length);
    println!("Index size:       {} bytes", stats.index_size_bytes);
    println!(
        "Last updated:     {}",
        stats.last_updated.format("%Y-%m-%d %H:%M:%S")
    );
    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, None)?;
            let value = serde_json::to_value(&config).map_err(|e| CragError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            match section {
                Some(section) => {
                    let part = value.get(&section).ok_or_else(|| {
                        CragError::Config(format!("Unknown config section: {}", section))
                    })?;
                    print_json(part)?;
                }
                None => print_json(&value)?,
            }
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            Config::default().save(&path)?;
            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'crag-search config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    if let Some(profile) = profile {
        Config::load_with_profile(&path, &profile)
    } else {
        Config::load(&path)
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| CragError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).map_err(|e| CragError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })?;
    println!("{}", json);
    Ok(())
}

fn print_correction(result: &CorrectionResult) {
    let decision = &result.routing_decision;
    println!(
        "Confidence: {} ({:.2})  Action: {}",
        decision.confidence_tier, decision.evaluation.overall_score, decision.action
    );
    println!("{}", decision.reasoning);
    println!(
        "Processed in {:?}{}",
        result.processing_time,
        if result.web_search_used {
            " (web search used)"
        } else {
            ""
        }
    );
    println!();

    if result.final_documents.is_empty() {
        println!("No documents.");
        return;
    }

    for (i, doc) in result.final_documents.iter().enumerate() {
        let title = if doc.title.is_empty() {
            doc.id.as_str()
        } else {
            doc.title.as_str()
        };
        println!("{:>3}. {} [{}] ({:.4})", i + 1, title, doc.source, doc.score);
        if !doc.url.is_empty() {
            println!("     {}", doc.url);
        }
        let preview: String = doc.content.chars().take(120).collect();
        println!("     {}", preview);
    }
}

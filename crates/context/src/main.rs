//! DocRAG command-line retrieval
//!
//! Runs one query through the retrieval pipeline and prints the assembled
//! context followed by its source attribution.
//!
//! Usage: `docrag <user_id> <query...> [--fast]`

use clap::builder::NonEmptyStringValueParser;
use clap::Parser;
use docrag_common::{config::AppConfig, errors::AppError, metrics, VERSION};
use docrag_context::{PipelineServices, RagPipeline, RagRequest, DEFAULT_SEPARATOR};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Run one query through the retrieval pipeline
#[derive(Parser, Debug)]
#[command(name = "docrag")]
#[command(about = "Retrieve grounded context from a user's document collection")]
#[command(version)]
struct Cli {
    /// Owner of the collection to search
    user_id: i64,

    /// Question to retrieve context for
    #[arg(required = true, value_parser = NonEmptyStringValueParser::new())]
    query: Vec<String>,

    /// Low-latency preset: fewer expansions, no re-ranking or verification
    #[arg(long)]
    fast: bool,
}

impl Cli {
    fn query_text(&self) -> String {
        self.query.join(" ")
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // Load configuration
    let config = AppConfig::load().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;

    init_tracing(&config);
    info!("Starting DocRAG v{}", VERSION);

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Suffix("stage_duration_seconds".to_string()),
                metrics::STAGE_BUCKETS,
            )?
            .install()?;
        info!(%addr, "Metrics exporter listening");
    }

    let services = PipelineServices::from_config(&config)?;
    let pipeline = if cli.fast {
        RagPipeline::fast(services)
    } else {
        RagPipeline::new(services, config.rag.clone())
    };

    let request = RagRequest::new(cli.user_id, cli.query_text());

    // Dropping the request future on Ctrl+C cancels every in-flight call
    tokio::select! {
        result = pipeline.retrieve_context(&request, None) => match result {
            Ok(context) => {
                println!("{}", context.text(DEFAULT_SEPARATOR));
                println!();
                println!("{}", context.source_attribution());
                info!(
                    chunks = context.chunks.len(),
                    total_tokens = context.total_tokens,
                    "Context delivered"
                );
            }
            Err(AppError::NoRelevantDocuments) => {
                println!("No relevant documents found.");
            }
            Err(e) => {
                tracing::error!(error = %e, code = ?e.code(), "Retrieval failed");
                return Err(e.into());
            }
        },
        _ = signal::ctrl_c() => {
            warn!("Interrupted, request cancelled");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_query_words_and_fast_flag() {
        let cli = Cli::try_parse_from(["docrag", "7", "how", "to", "reset", "--fast"]).unwrap();
        assert_eq!(cli.user_id, 7);
        assert_eq!(cli.query_text(), "how to reset");
        assert!(cli.fast);

        let cli = Cli::try_parse_from(["docrag", "7", "router"]).unwrap();
        assert!(!cli.fast);
    }

    #[test]
    fn test_usage_errors() {
        let missing_query = Cli::try_parse_from(["docrag", "7", "--fast"]).unwrap_err();
        assert_eq!(missing_query.kind(), ErrorKind::MissingRequiredArgument);
        assert_eq!(missing_query.exit_code(), 2);

        let bad_user = Cli::try_parse_from(["docrag", "seven", "router"]).unwrap_err();
        assert_eq!(bad_user.kind(), ErrorKind::ValueValidation);

        assert!(Cli::try_parse_from(["docrag", "7", ""]).is_err());
    }
}

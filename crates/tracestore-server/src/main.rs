mod commands;
mod config;

use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use commands::Commands;
use config::{Config, LogFormat};

#[derive(Parser, Debug)]
#[command(name = "tracestore", author, version, about = "Span storage operator tool", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(long, env = "MONGO_URL", global = true, hide_env_values = true)]
    mongo_url: Option<String>,

    #[arg(long, env = "MONGO_DATABASE", global = true)]
    mongo_database: Option<String>,

    #[arg(long, env = "MONGO_COLLECTION", global = true)]
    mongo_collection: Option<String>,

    #[arg(long, env = "MONGO_TIMEOUT_SECONDS", global = true)]
    mongo_timeout_seconds: Option<u64>,

    #[arg(long, env = "MONGO_SPAN_TTL_SECONDS", global = true)]
    mongo_span_ttl_seconds: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    fn load_config(&self) -> anyhow::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        let mongodb = &mut config.mongodb;
        if let Some(url) = &self.mongo_url {
            mongodb.url = url.clone();
        }
        if let Some(database) = &self.mongo_database {
            mongodb.database = database.clone();
        }
        if let Some(collection) = &self.mongo_collection {
            mongodb.collection = collection.clone();
        }
        if let Some(timeout) = self.mongo_timeout_seconds {
            mongodb.timeout_seconds = timeout;
        }
        if let Some(ttl) = self.mongo_span_ttl_seconds {
            mongodb.span_ttl_seconds = ttl;
        }
        mongodb.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.general.log_level));

    match config.general.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;
    init_logging(&config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            on_interrupt.cancel();
        }
    });

    let storage = config.mongodb.connect().await?;
    info!(command = ?cli.command, "running command");
    commands::run(cli.command, &config.mongodb, storage, &cancel).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parses_search_flags() {
        let cli = Cli::try_parse_from([
            "tracestore",
            "find",
            "--start-min",
            "2024-01-01T00:00:00Z",
            "--start-max",
            "2024-01-02T00:00:00Z",
            "--service",
            "frontend",
            "--tag",
            "error=true",
            "--tag",
            "http.method=GET",
            "--duration-min-us",
            "1500",
            "--limit",
            "5",
        ])
        .unwrap();

        let Commands::Find(args) = cli.command else {
            panic!("expected find command");
        };
        let query = args.to_query();
        assert_eq!(query.service_name, "frontend");
        assert_eq!(query.tags.len(), 2);
        assert_eq!(query.tags["http.method"], "GET");
        assert_eq!(query.duration_min, Some(std::time::Duration::from_micros(1500)));
        assert_eq!(query.duration_max, None);
        assert_eq!(query.num_traces, 5);
    }

    #[test]
    fn test_rejects_malformed_tag() {
        let result = Cli::try_parse_from([
            "tracestore",
            "trace-ids",
            "--start-min",
            "2024-01-01T00:00:00Z",
            "--start-max",
            "2024-01-02T00:00:00Z",
            "--tag",
            "oops",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_override_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[mongodb]\ndatabase = \"from_file\"\ncollection = \"from_file\"").unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let cli = Cli::try_parse_from([
            "tracestore",
            "--config",
            path.as_str(),
            "--mongo-collection",
            "from_flag",
            "services",
        ])
        .unwrap();
        let config = cli.load_config().unwrap();
        assert_eq!(config.mongodb.collection, "from_flag");
        if std::env::var_os("MONGO_DATABASE").is_none() {
            assert_eq!(config.mongodb.database, "from_file");
        }
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let cli = Cli::try_parse_from(["tracestore", "--mongo-timeout-seconds", "0", "services"]).unwrap();
        assert!(cli.load_config().is_err());
    }
}

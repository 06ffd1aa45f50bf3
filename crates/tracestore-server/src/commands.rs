use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracestore_core::{
    DependencyReader, OperationQueryParameters, SpanReader, StoreError, TraceId, TraceQueryParameters,
};
use tracestore_mongodb::{MongoConfig, MongoStorage, SpanStore};
use tracing::info;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the TTL and query indexes on the span collection
    Provision,
    /// List known service names
    Services,
    /// List operations, optionally for one service
    Operations {
        #[arg(long, default_value = "")]
        service: String,
        #[arg(long, default_value = "")]
        span_kind: String,
    },
    /// Fetch one trace by id
    Trace { id: String },
    /// Search traces
    Find(SearchArgs),
    /// Search trace ids only
    TraceIds(SearchArgs),
    /// Service dependency links over a time window
    Dependencies {
        /// End of the window, RFC 3339. Defaults to now.
        #[arg(long, value_parser = parse_time)]
        end: Option<DateTime<Utc>>,
        #[arg(long)]
        lookback_seconds: u64,
    },
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    #[arg(long, value_parser = parse_time)]
    start_min: DateTime<Utc>,
    #[arg(long, value_parser = parse_time)]
    start_max: DateTime<Utc>,
    #[arg(long, default_value = "")]
    service: String,
    #[arg(long, default_value = "")]
    operation: String,
    /// Tag equality as key=value; repeatable
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,
    #[arg(long)]
    duration_min_us: Option<u64>,
    #[arg(long)]
    duration_max_us: Option<u64>,
    #[arg(long, default_value_t = 20)]
    limit: usize,
}

impl SearchArgs {
    pub fn to_query(&self) -> TraceQueryParameters {
        TraceQueryParameters {
            service_name: self.service.clone(),
            operation_name: self.operation.clone(),
            tags: self.tags.iter().cloned().collect::<BTreeMap<_, _>>(),
            start_time_min: self.start_min,
            start_time_max: self.start_max,
            duration_min: self.duration_min_us.map(Duration::from_micros),
            duration_max: self.duration_max_us.map(Duration::from_micros),
            num_traces: self.limit,
        }
    }
}

pub fn parse_time(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 time {:?}: {}", raw, e))
}

pub fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run(
    command: Commands,
    config: &MongoConfig,
    storage: MongoStorage,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let store = SpanStore::new(Arc::new(storage.clone()), config);
    match command {
        Commands::Provision => {
            let names = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(StoreError::Cancelled.into()),
                names = storage.provision_indexes(config.span_ttl()) => names?,
            };
            print_json(&names)
        }
        Commands::Services => print_json(&store.reader.get_services(cancel).await?),
        Commands::Operations { service, span_kind } => {
            let query = OperationQueryParameters {
                service_name: service,
                span_kind,
            };
            print_json(&store.reader.get_operations(cancel, &query).await?)
        }
        Commands::Trace { id } => {
            let trace_id: TraceId = id.parse().with_context(|| format!("invalid trace id {:?}", id))?;
            let trace = store.reader.get_trace(cancel, trace_id).await?;
            print_json(&trace)
        }
        Commands::Find(args) => print_json(&store.reader.find_traces(cancel, &args.to_query()).await?),
        Commands::TraceIds(args) => print_json(&store.reader.find_trace_ids(cancel, &args.to_query()).await?),
        Commands::Dependencies { end, lookback_seconds } => {
            if lookback_seconds == 0 {
                return Err(anyhow!("lookback must be greater than zero"));
            }
            let end = end.unwrap_or_else(Utc::now);
            info!(%end, lookback_seconds, "computing dependencies");
            let links = store
                .reader
                .get_dependencies(cancel, end, Duration::from_secs(lookback_seconds))
                .await?;
            print_json(&links)
        }
    }
}

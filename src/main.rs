//! promlint - query a Prometheus failover group
//!
//! This is the composition root that wires together all the components.
//!
//! ```text
//! promlint query <expr>
//! promlint range <expr> <start> <end> <step>
//! promlint metadata <metric>
//! ```
//!
//! Times are Unix seconds, the step is in seconds. Servers and client
//! settings come from `PROMLINT_*` environment variables.

use promlint::adapters::outbound::{DashMapQueryMetrics, EndpointClient};
use promlint::application::FailoverGroup;
use promlint::config::{load_config, CACHE_SWEEP_INTERVAL};
use promlint::domain::ports::QueryEndpoint;
use promlint::domain::QueryContext;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::fmt::format::FmtSpan;

const USAGE: &str = "USAGE:
    promlint query <expr>
    promlint range <expr> <start> <end> <step>
    promlint metadata <metric>";

enum Command {
    Query {
        expr: String,
    },
    Range {
        expr: String,
        start: SystemTime,
        end: SystemTime,
        step: Duration,
    },
    Metadata {
        metric: String,
    },
}

impl Command {
    fn parse(args: &[String]) -> Result<Self, String> {
        match args {
            [cmd, expr] if cmd == "query" => Ok(Command::Query { expr: expr.clone() }),
            [cmd, expr, start, end, step] if cmd == "range" => Ok(Command::Range {
                expr: expr.clone(),
                start: parse_time(start)?,
                end: parse_time(end)?,
                step: parse_secs(step)?,
            }),
            [cmd, metric] if cmd == "metadata" => Ok(Command::Metadata {
                metric: metric.clone(),
            }),
            _ => Err(USAGE.to_string()),
        }
    }
}

fn invalid_secs(s: &str) -> String {
    format!("invalid number of seconds: {}\n\n{}", s, USAGE)
}

fn parse_secs(s: &str) -> Result<Duration, String> {
    s.parse::<f64>()
        .ok()
        .and_then(|v| Duration::try_from_secs_f64(v).ok())
        .ok_or_else(|| invalid_secs(s))
}

fn parse_time(s: &str) -> Result<SystemTime, String> {
    UNIX_EPOCH
        .checked_add(parse_secs(s)?)
        .ok_or_else(|| invalid_secs(s))
}

async fn run(group: &FailoverGroup, ctx: &QueryContext, command: Command) -> anyhow::Result<()> {
    let output = match command {
        Command::Query { expr } => {
            let result = group.query(ctx, &expr).await?;
            tracing::info!("{} returned {} series from {}", expr, result.series.len(), result.uri);
            serde_json::to_string_pretty(&result)?
        }
        Command::Range {
            expr,
            start,
            end,
            step,
        } => {
            let result = group.range_query(ctx, &expr, start, end, step).await?;
            tracing::info!("{} returned {} series from {}", expr, result.series.len(), result.uri);
            serde_json::to_string_pretty(&result)?
        }
        Command::Metadata { metric } => {
            let result = group.metadata(ctx, &metric).await?;
            serde_json::to_string_pretty(&result)?
        }
    };
    println!("{}", output);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from environment
    let cfg = load_config()?;

    // Setup logging
    let log_level = if cfg.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{}", msg);
            std::process::exit(2);
        }
    };

    // ===== COMPOSITION ROOT =====

    let metrics = Arc::new(DashMapQueryMetrics::new());
    let sweepers = CancellationToken::new();

    let mut members: Vec<Arc<dyn QueryEndpoint>> = Vec::new();
    for endpoint in cfg.endpoint_configs() {
        let client = EndpointClient::new(endpoint, metrics.clone())?;
        client.start_workers();
        client.start_cache_sweeper(CACHE_SWEEP_INTERVAL, sweepers.clone());
        members.push(Arc::new(client));
    }

    let group = FailoverGroup::new(cfg.name.clone(), members, cfg.tags.clone())?;
    tracing::info!(
        "starting promlint prometheus={} uris={}",
        group.name(),
        group.uris().join(",")
    );

    // Ctrl-C cancels whatever is in flight.
    let ctx = QueryContext::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, canceling queries");
            interrupt.cancel();
        }
    });

    let outcome = run(&group, &ctx, command).await;
    group.close().await;
    sweepers.cancel();

    if cfg.debug {
        eprint!("{}", metrics.export_prometheus());
    }

    outcome
}

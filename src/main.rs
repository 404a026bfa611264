use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tollgate::config::FilterConfig;
use tollgate::ratelimit::{FilterAction, HttpRequest, ManualClock, MemoryStore, RateLimitFilter};

/// Replay recorded requests through the rate limiting filter.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Filter configuration file (YAML or JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Request records, one JSON object per line (defaults to stdin)
    #[arg(short, long)]
    requests: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

/// One recorded request.
#[derive(Debug, Deserialize)]
struct RequestRecord {
    #[serde(default)]
    source_address: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    route_id: String,
    #[serde(default)]
    service_id: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    /// RFC 3339 arrival time; the current time when absent
    at: Option<String>,
}

impl RequestRecord {
    fn to_request(&self) -> HttpRequest {
        self.headers.iter().fold(
            HttpRequest::new(self.source_address.as_str(), self.path.as_str())
                .with_route(self.route_id.as_str(), self.service_id.as_str()),
            |request, (name, value)| request.with_header(name, value.as_str()),
        )
    }

    fn arrival(&self) -> anyhow::Result<DateTime<Utc>> {
        match &self.at {
            Some(at) => Ok(DateTime::parse_from_rfc3339(at)?.with_timezone(&Utc)),
            None => Ok(Utc::now()),
        }
    }
}

/// The filter's verdict on one request.
#[derive(Debug, Serialize)]
struct ReplayResult {
    line: usize,
    verdict: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays one verdict per line.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if args.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    info!("Starting Tollgate replay");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = FilterConfig::from_file(&args.config)?;
    info!(
        limit_by = ?config.limit_by,
        fault_tolerant = config.fault_tolerant,
        "Configuration loaded"
    );

    let clock = ManualClock::new(Utc::now());
    let filter = RateLimitFilter::with_clock(config, Arc::new(MemoryStore::new()), clock.clone());

    let processed = match &args.requests {
        Some(path) => {
            let file = tokio::fs::File::open(path).await?;
            replay(&filter, &clock, BufReader::new(file)).await?
        }
        None => replay(&filter, &clock, BufReader::new(tokio::io::stdin())).await?,
    };

    info!(requests = processed, "Tollgate replay finished");
    Ok(())
}

/// Run every record from `input` through the filter, printing one result per line.
async fn replay<I>(
    filter: &RateLimitFilter<MemoryStore, ManualClock>,
    clock: &ManualClock,
    input: I,
) -> anyhow::Result<usize>
where
    I: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut line_no = 0;
    let mut processed = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: RequestRecord = match serde_json::from_str(&line) {
            Ok(record) => record,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed request record");
                continue;
            }
        };

        let now = match record.arrival() {
            Ok(now) => now,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping request record with invalid arrival time");
                continue;
            }
        };
        clock.set(now);
        filter.store().purge_expired(now.timestamp_millis());

        let result = evaluate(filter, &record, line_no).await;
        println!("{}", serde_json::to_string(&result)?);
        processed += 1;
    }

    Ok(processed)
}

async fn evaluate(
    filter: &RateLimitFilter<MemoryStore, ManualClock>,
    record: &RequestRecord,
    line: usize,
) -> ReplayResult {
    let request = record.to_request();
    let mut ctx = filter.new_context();

    match filter.on_request_headers(&mut ctx, &request).await {
        Ok(FilterAction::Continue) => {
            let mut headers: HashMap<String, String> = HashMap::new();
            ctx.on_response_headers(true, &mut headers);
            ReplayResult {
                line,
                verdict: "continue",
                status: None,
                headers: headers.into_iter().collect(),
                error: None,
            }
        }
        Ok(FilterAction::Reject(response)) => ReplayResult {
            line,
            verdict: "reject",
            status: Some(response.status),
            headers: response.headers.into_iter().collect(),
            error: None,
        },
        Err(e) => ReplayResult {
            line,
            verdict: "error",
            status: None,
            headers: BTreeMap::new(),
            error: Some(e.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_replay_skips_bad_records() {
        let config = FilterConfig::from_json(r#"{"minute": 5}"#).unwrap();
        let clock = ManualClock::new(Utc::now());
        let filter = RateLimitFilter::with_clock(config, Arc::new(MemoryStore::new()), clock.clone());
        let input = concat!(
            "not json\n",
            r#"{"source_address": "10.0.0.1", "at": "yesterday"}"#,
            "\n",
            r#"{"source_address": "10.0.0.1", "at": "2024-09-02T08:15:20Z"}"#,
            "\n",
        );

        let processed = replay(&filter, &clock, BufReader::new(input.as_bytes()))
            .await
            .unwrap();

        assert_eq!(processed, 1);
        assert_eq!(filter.store().len(), 1);
    }
}

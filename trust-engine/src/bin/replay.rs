//! Audit replay binary
//!
//! Usage: trust-replay <audit.jsonl> [config.toml]
//!
//! Recomputes every decision in a JSON-lines audit export and exits
//! non-zero if any record drifted or failed its digest check.

use anyhow::{bail, Context};
use trust_engine::audit::{from_json_lines, replay};
use trust_engine::EngineConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());
    if std::env::var("TRUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut args = std::env::args().skip(1);
    let Some(export) = args.next() else {
        bail!("usage: trust-replay <audit.jsonl> [config.toml]");
    };

    let config = match args.next() {
        Some(path) => EngineConfig::from_file(&path)
            .with_context(|| format!("loading config from {}", path))?,
        None => EngineConfig::from_env().context("loading config from environment")?,
    };

    let content = tokio::fs::read_to_string(&export)
        .await
        .with_context(|| format!("reading {}", export))?;
    let records = from_json_lines(&content)?;
    tracing::info!("Replaying {} audit records from {}", records.len(), export);

    let mut drifted = 0usize;
    for record in &records {
        let report = replay(record, &config)?;
        if report.is_clean() {
            continue;
        }
        drifted += 1;
        tracing::warn!(
            verification_id = %report.verification_id,
            score_matches = report.score_matches,
            decision_matches = report.decision_matches,
            digest_matches = report.digest_matches,
            "Replay drift: stored {:?}, replayed {:?}",
            record.trust_score,
            report.replayed_score
        );
    }

    if drifted > 0 {
        bail!("{} of {} records drifted", drifted, records.len());
    }

    tracing::info!("All {} records replayed cleanly", records.len());
    Ok(())
}

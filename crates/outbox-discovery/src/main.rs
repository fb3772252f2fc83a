//! Outbox relay-list discovery CLI.
//!
//! Queries a set of relays for an identity's NIP-65 relay list, reports which
//! versions each relay serves, and optionally pushes the newest copy to the
//! relays that are behind.
//!
//! # Usage
//!
//! ```bash
//! # Query the built-in indexer relays
//! outbox-discover --pubkey npub1...
//!
//! # Custom candidates, then republish the latest record where it is stale
//! outbox-discover --pubkey <hex> \
//!     --indexers wss://purplepag.es,wss://relay.damus.io \
//!     --indexers-file relays.json \
//!     --update-outdated
//!
//! # Machine-readable report
//! outbox-discover --pubkey <hex> --json > report.json
//! ```
//!
//! Ctrl+C cancels the session; endpoints still pending are reported as
//! failed with reason "cancelled".

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use outbox_core::metrics::{init_metrics, start_metrics_server};
use outbox_discovery::config::{
    DEFAULT_INDEXERS, load_candidates_from_json, parse_candidate_list,
};
use outbox_discovery::relay::CapabilityFetcher;
use outbox_discovery::{
    DiscoveryConfig, DiscoveryEngine, EndpointFlags, NostrTransport, Orchestrator,
    OrchestratorConfig, QueryStatus, Reconciliation, SessionReport, TransportError,
};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// NIP number of relay-list metadata.
const NIP_65: u16 = 65;

/// Discover and reconcile an identity's NIP-65 relay list.
#[derive(Parser, Debug)]
#[command(name = "outbox-discover")]
#[command(about = "Discover, reconcile, and repair an identity's NIP-65 relay list")]
#[command(version)]
struct Args {
    /// Identity public key (hex or npub)
    #[arg(long)]
    pubkey: String,

    /// Candidate relay URLs (comma-separated)
    #[arg(long, value_delimiter = ',')]
    indexers: Option<Vec<String>>,

    /// JSON file with a `functioning_relays` array of candidate URLs
    #[arg(long)]
    indexers_file: Option<PathBuf>,

    /// Endpoints queried concurrently per batch
    #[arg(long, env = "OUTBOX_BATCH_SIZE")]
    batch_size: Option<usize>,

    /// Per-endpoint query deadline in seconds
    #[arg(long, env = "OUTBOX_ATTEMPT_TIMEOUT_SECS")]
    attempt_timeout_secs: Option<u64>,

    /// Ceiling for the whole session in seconds
    #[arg(long, env = "OUTBOX_SESSION_TIMEOUT_SECS")]
    session_timeout_secs: Option<u64>,

    /// Republish the latest record to endpoints serving an older version
    #[arg(long)]
    update_outdated: bool,

    /// Fetch NIP-11 information for each candidate and report NIP-65 support
    #[arg(long)]
    capabilities: bool,

    /// Emit a JSON report on stdout instead of the text summary
    #[arg(long)]
    json: bool,

    /// Metrics HTTP server port (0 to disable)
    #[arg(long, default_value = "0")]
    metrics_port: u16,
}

/// Result of one republish attempt, as reported.
#[derive(Debug, Serialize)]
struct RepublishOutcome {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Full machine-readable report.
#[derive(Debug, Serialize)]
struct CliReport<'a> {
    session: &'a SessionReport,
    reconciliation: &'a Reconciliation,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    nip65_support: BTreeMap<String, bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    republish: Option<BTreeMap<String, RepublishOutcome>>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (required when both ring and aws-lc-rs are present)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    // Logs go to stderr so --json output stays clean
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("info".parse()?)
                .add_directive("outbox_discovery=debug".parse()?),
        )
        .init();

    let args = Args::parse();

    if args.metrics_port > 0 {
        let handle = init_metrics();
        start_metrics_server(args.metrics_port, handle)
            .await
            .context("Failed to start metrics server")?;
    }

    let config = discovery_config(&args)?;
    let candidates = candidates(&args)?;

    let orchestrator = Arc::new(
        Orchestrator::new(
            Arc::new(NostrTransport::new()),
            OrchestratorConfig::from_env()?,
        )
        .with_capability_fetcher(CapabilityFetcher::new(Duration::from_secs(10))?),
    );

    let token = orchestrator.cancellation_token();
    ctrlc::set_handler(move || {
        tracing::info!("Interrupt received, cancelling discovery...");
        token.cancel();
    })
    .context("Failed to set Ctrl+C handler")?;

    tracing::info!("Configuration:");
    tracing::info!("  Candidates: {}", candidates.len());
    tracing::info!("  Batch size: {}", config.batch_size);
    tracing::info!("  Attempt timeout: {:?}", config.attempt_timeout);
    tracing::info!("  Session timeout: {:?}", config.session_timeout);

    let engine = DiscoveryEngine::new(Arc::clone(&orchestrator), config);
    let handle = engine
        .start_for(&args.pubkey, &candidates)
        .context("Failed to start discovery")?;

    let mut progress = handle.watch_progress();
    let reporter = tokio::spawn(async move {
        while progress.changed().await.is_ok() {
            let p = *progress.borrow_and_update();
            tracing::info!(
                "Progress: {}/{} resolved ({} success, {} no data, {} failed, {} timeout)",
                p.resolved(),
                p.total,
                p.success,
                p.no_data,
                p.failed,
                p.timeout
            );
            if p.is_complete() {
                break;
            }
        }
    });

    let report = handle.wait().await;
    let _ = reporter.await;
    let reconciliation = report.reconcile(&engine.config().outliers);

    let nip65_support = if args.capabilities {
        probe_capabilities(&orchestrator, &report).await
    } else {
        BTreeMap::new()
    };

    let republish = if args.update_outdated {
        republish(&engine, &reconciliation).await
    } else {
        None
    };

    if args.json {
        let out = CliReport {
            session: &report,
            reconciliation: &reconciliation,
            nip65_support,
            republish,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print_summary(&report, &reconciliation, &nip65_support, republish.as_ref());
    }

    orchestrator.request_disconnect().await;
    Ok(())
}

/// Defaults, then `OUTBOX_*` env vars, then command-line flags.
fn discovery_config(args: &Args) -> Result<DiscoveryConfig> {
    let mut config = DiscoveryConfig::from_env()?;
    if let Some(batch_size) = args.batch_size {
        anyhow::ensure!(batch_size > 0, "--batch-size must be at least 1");
        config.batch_size = batch_size;
    }
    if let Some(secs) = args.attempt_timeout_secs {
        config.attempt_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = args.session_timeout_secs {
        config.session_timeout = Duration::from_secs(secs);
    }
    Ok(config)
}

/// Candidates from flags and file, in order, or the built-in indexers.
fn candidates(args: &Args) -> Result<Vec<String>> {
    let mut candidates: Vec<String> = args
        .indexers
        .iter()
        .flatten()
        .flat_map(|list| parse_candidate_list(list))
        .collect();

    if let Some(path) = &args.indexers_file {
        let from_file = load_candidates_from_json(path)
            .with_context(|| format!("Failed to load candidates from {}", path.display()))?;
        candidates.extend(from_file);
    }

    if candidates.is_empty() {
        candidates = DEFAULT_INDEXERS.iter().map(|s| s.to_string()).collect();
    }
    Ok(candidates)
}

/// Fetch NIP-11 documents for every endpoint that answered the query.
async fn probe_capabilities(
    orchestrator: &Orchestrator,
    report: &SessionReport,
) -> BTreeMap<String, bool> {
    let answered: Vec<&str> = report
        .states
        .iter()
        .filter(|s| matches!(s.status, QueryStatus::Success | QueryStatus::NoData))
        .map(|s| s.endpoint.as_str())
        .collect();
    orchestrator.add_endpoints(&answered, EndpointFlags::default());

    let mut support = BTreeMap::new();
    for url in answered {
        match orchestrator.refresh_capabilities(url).await {
            Ok(info) => {
                support.insert(url.to_string(), info.supports(NIP_65));
            }
            Err(e) => tracing::warn!("NIP-11 lookup for {} failed: {}", url, e),
        }
    }
    support
}

async fn republish(
    engine: &DiscoveryEngine,
    reconciliation: &Reconciliation,
) -> Option<BTreeMap<String, RepublishOutcome>> {
    let latest = reconciliation.latest()?;
    let outdated = reconciliation.outdated_sources();
    if outdated.is_empty() {
        tracing::info!("Every responding endpoint already serves the latest record");
        return Some(BTreeMap::new());
    }

    let results = engine
        .republisher()
        .update_outdated_detailed(latest.representative(), &outdated)
        .await;

    Some(
        results
            .into_iter()
            .map(|(url, result)| {
                let outcome = RepublishOutcome {
                    ok: result.is_ok(),
                    error: result.err().as_ref().map(TransportError::to_string),
                };
                (url, outcome)
            })
            .collect(),
    )
}

fn print_summary(
    report: &SessionReport,
    reconciliation: &Reconciliation,
    nip65_support: &BTreeMap<String, bool>,
    republish: Option<&BTreeMap<String, RepublishOutcome>>,
) {
    let p = &report.progress;
    println!("Relay list discovery for {}", report.pubkey);
    println!(
        "  {} endpoints in {:.1}s: {} success, {} no data, {} failed, {} timeout",
        p.total,
        report.elapsed_ms as f64 / 1000.0,
        p.success,
        p.no_data,
        p.failed,
        p.timeout
    );

    if reconciliation.groups.is_empty() {
        println!("\nNo relay list found.");
    }

    for group in &reconciliation.groups {
        let tag = if group.is_latest {
            " (latest)"
        } else if group.is_outlier {
            " (outlier)"
        } else {
            ""
        };
        println!(
            "\nVersion {}{} from {} endpoint(s)",
            group.version,
            tag,
            group.support()
        );
        for source in group.sources() {
            println!("    {}", source);
        }

        let record = group.representative();
        if group.is_latest {
            println!("  write: {}", record.write_relays.join(", "));
            println!("  read:  {}", record.read_relays.join(", "));
        } else {
            for url in &group.diff.relays.added {
                println!("  + {}", url);
            }
            for url in &group.diff.relays.removed {
                println!("  - {}", url);
            }
        }
    }

    let missing = Reconciliation::missing_sources(&report.states);
    if !missing.is_empty() {
        println!("\nNo record on:");
        for url in missing {
            println!("    {}", url);
        }
    }

    let failures = report.failures();
    if !failures.is_empty() {
        println!("\nUnreachable:");
        for (url, status) in failures {
            match status {
                QueryStatus::Failed(reason) => println!("    {} ({})", url, reason),
                other => println!("    {} ({})", url, other.label()),
            }
        }
    }

    if !nip65_support.is_empty() {
        println!("\nNIP-65 support:");
        for (url, supported) in nip65_support {
            println!("    {} {}", if *supported { "yes" } else { "no " }, url);
        }
    }

    if let Some(results) = republish {
        println!("\nRepublish:");
        if results.is_empty() {
            println!("    nothing to do");
        }
        for (url, outcome) in results {
            match &outcome.error {
                None => println!("    ok     {}", url),
                Some(e) => println!("    failed {} ({})", url, e),
            }
        }
    }
}

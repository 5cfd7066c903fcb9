use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::{info, warn};

use fairway_config::{
    report_unused_keys, resolve_secrets, ConfigMode, LoadedConfig, LoaderConfig, UnusedKeyPolicy,
};
use fairway_db::PgDocumentStore;
use fairway_osm::{
    resolve_partitions, source_tag, NormalizeContext, OverpassProvider, PartitionFetcher,
    RetryingFetcher,
};
use fairway_reconcile::{LifecycleReport, Reconciler, StalenessManager, SystemClock};
use fairway_runtime::{
    new_run_id, preview, reconcile_config, retry_policy, PartitionStatus, Pipeline, RunOptions,
    RunSummary,
};

#[derive(Parser)]
#[command(name = "fairway")]
#[command(about = "OpenStreetMap golf course loader", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, canonicalize and reconcile partitions into the document store
    Sync(SyncArgs),

    /// Delete stale documents whose stale_at is older than the retention window
    Purge {
        #[command(flatten)]
        target: TargetArgs,

        /// Retention in days (0 disables)
        #[arg(long)]
        retention_days: i64,

        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env overlay -> ...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status {
        #[command(flatten)]
        config: ConfigArgs,
    },

    /// Apply SQL migrations
    Migrate {
        #[command(flatten)]
        config: ConfigArgs,
    },
}

#[derive(Args)]
struct TargetArgs {
    /// US state code; can repeat
    #[arg(long = "state")]
    states: Vec<String>,

    /// Process all 50 states (default when no --state is given)
    #[arg(long, default_value_t = false)]
    all: bool,
}

#[derive(Args)]
struct ConfigArgs {
    /// Layered config paths in merge order
    #[arg(long = "config")]
    config_paths: Vec<String>,

    /// Fail (instead of warn) on config keys this command never reads
    #[arg(long, default_value_t = false)]
    strict_config: bool,
}

#[derive(Args)]
struct SyncArgs {
    #[command(flatten)]
    target: TargetArgs,

    /// Do not touch the store; print a sample of canonical entities
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Skip writes when the stored fingerprint is unchanged
    #[arg(long, default_value_t = false)]
    skip_unchanged: bool,

    /// Mark documents not seen in this run as stale, per processed state
    #[arg(long, default_value_t = false)]
    mark_stale: bool,

    /// Delete stale documents older than N days (0 = disabled)
    #[arg(long, default_value_t = 0)]
    purge_stale_days: i64,

    /// Explicit run id; generated if omitted
    #[arg(long)]
    run_id: Option<String>,

    #[command(flatten)]
    config: ConfigArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env.local if present (dev convenience); production injects env vars.
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Sync(args) => sync(args).await?,

        Commands::Purge {
            target,
            retention_days,
            config,
        } => {
            let partitions = resolve_targets(&target)?;
            let cfg = load_config(&config, ConfigMode::Sync)?;
            if retention_days <= 0 {
                println!("purged=0 retention_days={retention_days} disabled=true");
                return Ok(());
            }
            let store = connect_store(&cfg).await?;
            let lifecycle = StalenessManager::new(
                store,
                Arc::new(SystemClock),
                cfg.reconcile.home_country.clone(),
                cfg.reconcile.write_batch_size,
            );
            let report = lifecycle.purge_stale(&partitions, retention_days).await;
            print_lifecycle("purged", &report);
            println!("purged={} retention_days={}", report.total(), retention_days);
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = fairway_config::load_layered_yaml(&path_refs)?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Db { cmd } => match cmd {
            DbCmd::Status { config } => {
                let cfg = load_config(&config, ConfigMode::Sync)?;
                let pool = connect_pool(&cfg).await?;
                let s = fairway_db::status(&pool).await?;
                println!("db_ok={} has_documents_table={}", s.ok, s.has_documents_table);
                if s.has_documents_table {
                    let (total, stale) =
                        fairway_db::collection_counts(&pool, &cfg.store.collection).await?;
                    println!(
                        "collection={} documents={} stale={}",
                        cfg.store.collection, total, stale
                    );
                }
            }
            DbCmd::Migrate { config } => {
                let cfg = load_config(&config, ConfigMode::Sync)?;
                let pool = connect_pool(&cfg).await?;
                fairway_db::migrate(&pool).await?;
                println!("migrations_applied=true");
            }
        },
    }

    Ok(())
}

async fn sync(args: SyncArgs) -> Result<()> {
    let partitions = resolve_targets(&args.target)?;
    let mode = if args.dry_run {
        ConfigMode::DryRun
    } else {
        ConfigMode::Sync
    };
    let cfg = load_config(&args.config, mode)?;

    let now = Utc::now();
    let ctx = NormalizeContext::new(
        source_tag(&cfg.reconcile.source_prefix, now),
        cfg.reconcile.home_country.clone(),
    );
    let fetcher = build_fetcher(&cfg)?;

    if args.dry_run {
        let p = preview(fetcher.as_ref(), &partitions, &ctx).await;
        println!("{}", serde_json::to_string_pretty(&p.sample)?);
        for r in &p.partitions {
            println!(
                "partition={} raw={} accepted={} rejected={}",
                r.partition,
                r.raw,
                r.accepted,
                r.rejected_total()
            );
        }
        for (partition, error) in &p.fetch_failures {
            println!("partition={partition} status=failed stage=fetch error={error:?}");
        }
        println!("dry_run=true total={} sampled={}", p.total, p.sample.len());
        return Ok(());
    }

    let run_id = args.run_id.clone().unwrap_or_else(|| new_run_id(now));
    let store = connect_store(&cfg).await?;
    let reconciler = Reconciler::new(store.clone(), reconcile_config(&cfg.reconcile));
    let lifecycle = StalenessManager::new(
        store,
        Arc::new(SystemClock),
        cfg.reconcile.home_country.clone(),
        cfg.reconcile.write_batch_size,
    );
    let pipeline = Pipeline::new(fetcher, reconciler, lifecycle);
    cancel_on_ctrl_c(pipeline.cancel_handle());

    let opts = RunOptions {
        run_id,
        skip_unchanged: args.skip_unchanged,
        mark_stale: args.mark_stale,
        purge_stale_days: args.purge_stale_days,
        concurrency: cfg.run.concurrency,
        normalize: ctx,
    };
    println!("run_id={}", opts.run_id);
    println!("source_tag={}", opts.normalize.source_tag);

    let summary = pipeline.run(&partitions, &opts).await;
    print_summary(&summary);
    Ok(())
}

fn init_tracing() {
    // stdout carries key=value results; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_targets(target: &TargetArgs) -> Result<Vec<String>> {
    let sel = resolve_partitions(&target.states, target.all);
    for bad in &sel.invalid {
        warn!(state = %bad, "skip invalid state");
    }
    if sel.valid.is_empty() {
        bail!(
            "NO_PARTITIONS: none of the requested states is valid ({}). Use --state XX or --all.",
            sel.invalid.join(",")
        );
    }
    Ok(sel.valid)
}

fn load_config(args: &ConfigArgs, mode: ConfigMode) -> Result<LoaderConfig> {
    let loaded = if args.config_paths.is_empty() {
        LoadedConfig::empty()?
    } else {
        let path_refs: Vec<&str> = args.config_paths.iter().map(|s| s.as_str()).collect();
        fairway_config::load_layered_yaml(&path_refs)?
    };

    let policy = if args.strict_config {
        UnusedKeyPolicy::Fail
    } else {
        UnusedKeyPolicy::Warn
    };
    let unused = report_unused_keys(mode, &loaded.config_json, policy)?;
    if !unused.is_clean() {
        warn!(
            mode = %unused.mode,
            unused = ?unused.unused_leaf_pointers,
            "config keys not read in this mode"
        );
    }

    let cfg = loaded
        .loader_config()?
        .with_env_overrides(|k| std::env::var(k).ok());
    cfg.validate().context("config invalid after env overrides")?;
    info!(config_hash = %loaded.config_hash, mode = mode.as_str(), "config loaded");
    Ok(cfg)
}

fn build_fetcher(cfg: &LoaderConfig) -> Result<Arc<dyn PartitionFetcher>> {
    let provider = OverpassProvider::new(
        cfg.fetch.overpass_url.clone(),
        cfg.reconcile.home_country.clone(),
        Duration::from_secs(cfg.fetch.timeout_secs),
    )?;
    Ok(Arc::new(RetryingFetcher::new(
        provider,
        retry_policy(&cfg.fetch.retry),
    )))
}

async fn connect_pool(cfg: &LoaderConfig) -> Result<fairway_db::PgPool> {
    let secrets = resolve_secrets(cfg, ConfigMode::Sync, |k| std::env::var(k).ok())?;
    let url = secrets
        .database_url
        .context("database url not resolved")?;
    fairway_db::connect(&url).await
}

async fn connect_store(cfg: &LoaderConfig) -> Result<Arc<PgDocumentStore>> {
    let pool = connect_pool(cfg).await?;
    Ok(Arc::new(PgDocumentStore::new(pool, cfg.store.collection.clone())))
}

fn cancel_on_ctrl_c(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; no new partitions will start");
            flag.store(true, Ordering::SeqCst);
        }
    });
}

fn status_str(status: &PartitionStatus) -> String {
    match status {
        PartitionStatus::Completed => "completed".to_string(),
        PartitionStatus::Cancelled => "cancelled".to_string(),
        PartitionStatus::Failed(stage) => format!("failed stage={}", stage_str(*stage)),
    }
}

fn stage_str(stage: fairway_runtime::Stage) -> &'static str {
    use fairway_runtime::Stage;
    match stage {
        Stage::Fetch => "fetch",
        Stage::Reconcile => "reconcile",
        Stage::MarkStale => "mark_stale",
        Stage::Purge => "purge",
    }
}

fn print_summary(summary: &RunSummary) {
    for p in &summary.partitions {
        let (raw, accepted) = p
            .normalize
            .as_ref()
            .map(|n| (n.raw, n.accepted))
            .unwrap_or((0, 0));
        println!(
            "partition={} status={} raw={} accepted={} written={} skipped={} marked_stale={} purged={}",
            p.partition,
            status_str(&p.status),
            raw,
            accepted,
            p.written(),
            p.skipped(),
            p.marked_stale,
            p.purged
        );
        for e in &p.errors {
            println!("partition={} error={:?}", p.partition, e);
        }
    }
    println!(
        "run_id={} partitions={} failed={} cancelled={} written={} skipped={} marked_stale={} purged={}",
        summary.run_id,
        summary.partitions.len(),
        summary.failed().count(),
        summary.cancelled().count(),
        summary.written(),
        summary.skipped(),
        summary.marked_stale(),
        summary.purged()
    );
}

fn print_lifecycle(label: &str, report: &LifecycleReport) {
    for p in &report.partitions {
        match &p.error {
            None => println!("partition={} {}={}", p.partition, label, p.count),
            Some(e) => println!("partition={} {}={} error={:?}", p.partition, label, p.count, e),
        }
    }
}

//! thresh - duplicate-group lifecycle and safe-cleanup engine.
//!
//! One subcommand per engine operation. Destructive operations (bulk
//! apply, wet cleanup) all have a preview/dry-run twin; run that first.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use thresh_engine::{CancellationToken, Engine, EngineConfig};
use thresh_schema::{
    FileCategory, GroupStatus, IngestRecord, JobSelector, OverrideScope, SelectStrategy,
    SelectionPreference,
};

#[derive(Parser, Debug)]
#[command(name = "thresh", about = "Duplicate-group lifecycle and safe-cleanup engine")]
struct Cli {
    /// Database connection string (defaults to the user data dir)
    #[arg(long, env = "THRESH_DATABASE")]
    database: Option<String>,

    /// Archive store root directory (defaults to the user data dir)
    #[arg(long, env = "THRESH_ARCHIVE")]
    archive_root: Option<PathBuf>,

    /// Emit JSON instead of human-readable output
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show or edit selection preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsAction,
    },

    /// Score one file against the current preferences
    Score {
        file_id: i64,
    },

    /// Recompute proposed originals for undecided groups
    Recalc {
        /// pending (Pending only) or all (Pending + AutoSelected)
        #[arg(long, default_value = "pending")]
        scope: String,

        /// Report the would-be changes without persisting them
        #[arg(long)]
        preview: bool,
    },

    /// Explicitly pick a group's original (validates the group)
    SetOriginal {
        group_id: i64,
        file_id: i64,
    },

    /// Propose an original for one group using a strategy
    AutoSelect {
        group_id: i64,

        /// earliest_date | shortest_path | largest_file | first_indexed
        #[arg(long, default_value = "earliest_date")]
        strategy: String,
    },

    /// Apply a strategy across all undecided groups
    AutoSelectAll {
        #[arg(long, default_value = "earliest_date")]
        strategy: String,
    },

    /// Apply a directory pattern rule (keeps from the preferred directory)
    Pattern {
        /// Exact directory set the groups' members must span (repeatable)
        #[arg(long = "dir", required = true)]
        directories: Vec<String>,

        /// Directory the kept file must live in
        #[arg(long)]
        prefer: String,

        #[arg(long, default_value = "earliest_date")]
        tie_breaker: String,

        #[arg(long)]
        preview: bool,
    },

    /// Preview a bulk keep/remove override (read-only)
    BulkPreview {
        #[arg(long)]
        keep: String,

        #[arg(long)]
        remove: String,

        /// Also re-target groups already validated
        #[arg(long)]
        all: bool,
    },

    /// Apply a bulk keep/remove override (validates matching groups)
    BulkApply {
        #[arg(long)]
        keep: String,

        #[arg(long)]
        remove: String,

        #[arg(long)]
        all: bool,
    },

    /// Validate a batch of groups with standing proposals
    Validate {
        #[arg(short = 'n', long, default_value = "100")]
        count: i64,

        /// Source status filter (default AUTO_SELECTED)
        #[arg(long)]
        status: Option<String>,
    },

    /// Undo validation for one or more groups
    Undo {
        #[arg(required = true)]
        group_ids: Vec<i64>,
    },

    /// Cleaner jobs: create, run, inspect, recover
    Clean {
        #[command(subcommand)]
        action: CleanAction,
    },

    /// Ingest content-hashed file records from a JSON file
    Ingest {
        /// JSON array of {path, content_hash, size, modified_at?, created_at?}
        file: PathBuf,
    },

    /// Status overview
    Stats,

    /// Purge archived bytes past the retention window
    Sweep {
        #[arg(long, default_value = "30")]
        retention_days: i64,

        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsAction {
    /// Show preferences and available strategies/scopes
    Show,
    /// Replace the preference list from a JSON file
    Set {
        /// JSON array of {path_prefix, priority}
        file: PathBuf,
    },
    /// Reset to shipped defaults
    Reset,
}

#[derive(Subcommand, Debug)]
enum CleanAction {
    /// Create a job (and start cleaning unless --dry-run)
    Create {
        /// Explicit group ids (conflicts with --category/--directory)
        #[arg(long = "group")]
        groups: Vec<i64>,

        /// Select eligible groups by file category
        #[arg(long)]
        category: Option<String>,

        /// Select eligible groups by directory prefix
        #[arg(long)]
        directory: Option<String>,

        /// Verify and report without archiving or deleting anything
        #[arg(long)]
        dry_run: bool,

        /// Execute the job immediately after creating it
        #[arg(long)]
        run: bool,
    },
    /// Claim and execute one job
    Run {
        job_id: i64,
    },
    /// Run as a worker: recover orphans, then process jobs until Ctrl-C
    Worker,
    /// Show a job's counters
    Status {
        job_id: i64,
    },
    /// Return jobs orphaned by a dead worker to the queue
    Recover,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "thresh=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("thresh");
    if cli.database.is_none() {
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    }
    let config = EngineConfig {
        database_url: cli.database.unwrap_or_else(|| {
            format!("sqlite://{}", data_dir.join("thresh.db").display())
        }),
        archive_root: cli
            .archive_root
            .unwrap_or_else(|| data_dir.join("archive")),
        ..EngineConfig::default()
    };

    let engine = Engine::connect(config).await?;
    let cancel = cancel_on_ctrl_c();
    let json = cli.json;

    match cli.command {
        Command::Prefs { action } => match action {
            PrefsAction::Show => {
                let config = engine.selection_config().await?;
                emit(json, &config, |c| {
                    for p in &c.preferences {
                        println!("{:3}  {:>3}  {}", p.sort_order, p.priority, p.path_prefix);
                    }
                    println!("strategies: {}", c.strategies.join(", "));
                })?;
            }
            PrefsAction::Set { file } => {
                let raw = std::fs::read_to_string(&file)
                    .with_context(|| format!("reading {}", file.display()))?;
                let prefs: Vec<SelectionPreference> =
                    serde_json::from_str(&raw).context("parsing preference list")?;
                engine.save_preferences(&prefs).await?;
                println!("Saved {} preferences", prefs.len());
            }
            PrefsAction::Reset => {
                let prefs = engine.reset_preferences().await?;
                println!("Reset to {} default preferences", prefs.len());
            }
        },

        Command::Score { file_id } => {
            let score = engine.calculate_file_score(file_id).await?;
            println!("{}", score);
        }

        Command::Recalc { scope, preview } => {
            let scope: OverrideScope = scope.parse().map_err(|e| anyhow!("{}", e))?;
            let outcome = engine
                .recalculate_originals(scope, preview, &cancel)
                .await?;
            emit(json, &outcome, |o| {
                println!("updated: {}, conflicts: {}", o.updated, o.conflicts);
                if let Some(changes) = &o.preview {
                    for c in changes {
                        match c.file_id {
                            Some(id) => println!(
                                "  group {} -> file {} (score {})",
                                c.group_id, id, c.score
                            ),
                            None => println!(
                                "  group {} CONFLICT at score {}",
                                c.group_id, c.score
                            ),
                        }
                    }
                }
            })?;
        }

        Command::SetOriginal { group_id, file_id } => {
            engine.set_original(group_id, file_id).await?;
            println!("Group {} validated with original {}", group_id, file_id);
        }

        Command::AutoSelect { group_id, strategy } => {
            let strategy: SelectStrategy = strategy.parse().map_err(|e| anyhow!("{}", e))?;
            let file_id = engine.auto_select(group_id, strategy).await?;
            println!("Group {} proposed original: file {}", group_id, file_id);
        }

        Command::AutoSelectAll { strategy } => {
            let strategy: SelectStrategy = strategy.parse().map_err(|e| anyhow!("{}", e))?;
            let count = engine.auto_select_all(strategy, &cancel).await?;
            println!("Auto-selected {} groups", count);
        }

        Command::Pattern {
            directories,
            prefer,
            tie_breaker,
            preview,
        } => {
            let tie: SelectStrategy = tie_breaker.parse().map_err(|e| anyhow!("{}", e))?;
            let outcome = engine
                .apply_pattern_rule(&directories, &prefer, tie, preview)
                .await?;
            emit(json, &outcome, |o| {
                let verb = if o.applied { "validated" } else { "would match" };
                println!("{} {} groups", verb, o.matched);
                for m in &o.groups {
                    println!("  group {} -> file {}", m.group_id, m.file_id);
                }
            })?;
        }

        Command::BulkPreview { keep, remove, all } => {
            let scope = scope_flag(all);
            let outcome = engine.bulk_override_preview(&keep, &remove, scope).await?;
            emit(json, &outcome, |o| {
                println!("{} matching groups", o.match_count);
                for e in &o.examples {
                    println!("  group {}: keep {}  remove {}", e.group_id, e.keep_path, e.remove_path);
                }
            })?;
        }

        Command::BulkApply { keep, remove, all } => {
            let scope = scope_flag(all);
            let outcome = engine
                .bulk_override_apply(&keep, &remove, scope, &cancel)
                .await?;
            println!("Applied to {} groups", outcome.applied);
        }

        Command::Validate { count, status } => {
            let filter = status
                .map(|s| s.parse::<GroupStatus>())
                .transpose()
                .map_err(|e| anyhow!("{}", e))?;
            let outcome = engine.validate_batch(count, filter).await?;
            println!(
                "Validated {} groups, {} remaining",
                outcome.validated, outcome.remaining
            );
        }

        Command::Undo { group_ids } => {
            let results = engine.undo_validation(&group_ids).await?;
            emit(json, &results, |rs| {
                for r in rs {
                    match (&r.reverted_to, &r.error) {
                        (Some(to), _) => println!("group {} -> {}", r.group_id, to),
                        (_, Some(err)) => println!("group {}: {}", r.group_id, err),
                        _ => {}
                    }
                }
            })?;
        }

        Command::Clean { action } => run_clean(&engine, &cancel, json, action).await?,

        Command::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let records: Vec<IngestRecord> =
                serde_json::from_str(&raw).context("parsing ingest records")?;
            let outcome = engine.ingest(&records).await?;
            emit(json, &outcome, |o| {
                println!(
                    "added {}, skipped {}, groups created {}, reopened {}",
                    o.files_added, o.files_skipped, o.groups_created, o.groups_reopened
                );
            })?;
        }

        Command::Stats => {
            let stats = engine.stats().await?;
            emit(json, &stats, |s| {
                println!("pending:          {}", s.groups_pending);
                println!("auto-selected:    {}", s.groups_auto_selected);
                println!("validated:        {}", s.groups_validated);
                println!("cleaning:         {}", s.groups_cleaning);
                println!("cleaning failed:  {}", s.groups_cleaning_failed);
                println!("cleaned:          {}", s.groups_cleaned);
                println!("files:            {} ({} deleted)", s.total_files, s.deleted_files);
                println!("reclaimable:      {} bytes", s.reclaimable_bytes);
            })?;
        }

        Command::Sweep {
            retention_days,
            dry_run,
        } => {
            let stats = engine.sweep_archive_with(retention_days, dry_run).await?;
            emit(json, &stats, |s| {
                println!(
                    "scanned {}, purged {}, {} bytes reclaimed, {} errors",
                    s.scanned, s.purged, s.bytes_reclaimed, s.errors
                );
            })?;
        }
    }

    Ok(())
}

async fn run_clean(
    engine: &Engine,
    cancel: &CancellationToken,
    json: bool,
    action: CleanAction,
) -> Result<()> {
    match action {
        CleanAction::Create {
            groups,
            category,
            directory,
            dry_run,
            run,
        } => {
            let selector = build_selector(groups, category, directory)?;
            let job_id = engine.create_cleaner_job(&selector, dry_run).await?;
            println!("Created job {}", job_id);
            if run {
                let counts = engine.run_job(job_id).await?;
                emit(json, &counts, print_counts)?;
            }
        }
        CleanAction::Run { job_id } => {
            let counts = engine.run_job(job_id).await?;
            emit(json, &counts, print_counts)?;
        }
        CleanAction::Worker => {
            let recovered = engine.recover_orphaned_jobs().await?;
            if !recovered.is_empty() {
                println!("Recovered {} orphaned jobs", recovered.len());
            }
            engine.run_worker(cancel, Duration::from_secs(2)).await?;
        }
        CleanAction::Status { job_id } => {
            let counts = engine.job_status(job_id).await?;
            emit(json, &counts, print_counts)?;
        }
        CleanAction::Recover => {
            let recovered = engine.recover_orphaned_jobs().await?;
            println!("Recovered {} orphaned jobs: {:?}", recovered.len(), recovered);
        }
    }
    Ok(())
}

fn build_selector(
    groups: Vec<i64>,
    category: Option<String>,
    directory: Option<String>,
) -> Result<JobSelector> {
    match (groups.is_empty(), category, directory) {
        (false, None, None) => Ok(JobSelector::Groups { ids: groups }),
        (true, Some(category), None) => Ok(JobSelector::Category {
            category: category.parse::<FileCategory>().map_err(|e| anyhow!("{}", e))?,
        }),
        (true, None, Some(prefix)) => Ok(JobSelector::Directory { prefix }),
        _ => Err(anyhow!(
            "pick exactly one of --group, --category, or --directory"
        )),
    }
}

fn scope_flag(all: bool) -> OverrideScope {
    if all {
        OverrideScope::All
    } else {
        OverrideScope::Pending
    }
}

fn print_counts(c: &thresh_schema::JobCounts) {
    println!(
        "job {} [{}{}]: {}/{} processed, {} succeeded, {} failed, {} skipped",
        c.job_id,
        c.status,
        if c.dry_run { ", dry run" } else { "" },
        c.processed_files,
        c.total_files,
        c.succeeded_files,
        c.failed_files,
        c.skipped_files
    );
}

/// Print as JSON or via the human formatter.
fn emit<T: serde::Serialize>(json: bool, value: &T, human: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        human(value);
    }
    Ok(())
}

/// Cancellation token wired to Ctrl-C. Bulk operations stop cleanly
/// between groups; the worker loop exits after the current job.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let signal_token = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Ctrl-C received, stopping after current step");
            signal_token.cancel();
        }
    });
    token
}

//! backfill CLI entry point

use backfill_engine::{
    adapters::AdapterSet,
    calendar::ChunkGranularity,
    commands::{
        cmd_contradiction_stats, cmd_coverage, cmd_coverage_quick, cmd_decide_contradiction,
        cmd_freshness_check, cmd_freshness_critical, cmd_freshness_summary, cmd_init,
        cmd_lint, cmd_list_checkpoints, cmd_list_contradictions, cmd_list_sources,
        cmd_list_tickets, cmd_pause_checkpoint, cmd_probe, cmd_run, cmd_scan_contradictions,
        cmd_show_checkpoint, cmd_source_stats, cmd_status, print_checkpoint_detail,
        print_checkpoints, print_contradiction, print_contradiction_stats, print_contradictions,
        print_coverage, print_freshness_run, print_freshness_summary, print_init, print_lint,
        print_probe, print_quick_stats, print_run_summary, print_scan_report,
        print_source_completions, print_source_stats, print_sources, print_status,
        print_statuses, print_tickets, Decision, InitOptions, RunOptions, RunOverrides,
        RunTarget, SourceListOptions,
    },
    config::Config,
    contradiction::ScanFilter,
    coverage::{CoverageBasis, CoverageFilter},
    error::{Error, Result},
    models::RegimeTag,
    progress::LogWriterFactory,
    registry::{SharedRegistry, SourceRegistry},
    store::{CheckpointStatus, ContradictionStatus, SqliteStore, TicketStatus},
};
use chrono::NaiveDate;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "backfill")]
#[command(version, about = "Resumable backfill and reconciliation engine for statistical time series", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration, source registry and database
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Show system status
    Status,

    /// List registry sources
    Sources {
        /// Only active API/SDMX sources
        #[arg(long)]
        active: bool,

        /// Show aggregate registry statistics instead
        #[arg(long)]
        stats: bool,

        /// Output only source IDs (one per line, for scripting)
        #[arg(long)]
        ids_only: bool,

        /// Output source IDs with descriptions for shell completions
        #[arg(long, value_enum, hide = true)]
        completion: Option<Shell>,
    },

    /// Validate the source registry (exits non-zero on errors)
    Lint {
        /// Registry file to check (defaults to the configured one)
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Backfill observations
    ///
    /// Years run most recent first. Completed years are skipped unless
    /// --force is given; interrupted years resume after their last step.
    Run {
        /// Source ID (use 'backfill sources' to list)
        #[arg(long)]
        source: Option<String>,

        /// Product ID; omit to run every product of the source
        #[arg(long)]
        product: Option<String>,

        /// Single year to backfill
        #[arg(long, conflicts_with_all = ["from", "to"])]
        year: Option<i32>,

        /// Most recent year of the range (defaults to the current year)
        #[arg(long)]
        from: Option<i32>,

        /// Oldest year of the range (defaults to the configured start year)
        #[arg(long)]
        to: Option<i32>,

        /// Every product of every active source
        #[arg(long)]
        all: bool,

        /// Step size inside each year: year, month or day
        #[arg(long)]
        granularity: Option<ChunkGranularity>,

        /// Re-run years whose checkpoint is already completed
        #[arg(long)]
        force: bool,
    },

    /// Inspect and control checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },

    /// Detect and resolve cross-source contradictions
    Contradictions {
        #[command(subcommand)]
        action: ContradictionAction,
    },

    /// Measure coverage of expected timelines
    Coverage {
        /// Only series of this sector
        #[arg(long)]
        sector: Option<String>,

        /// Only series of this regime
        #[arg(long)]
        regime: Option<RegimeTag>,

        /// Minimum coverage percent
        #[arg(long)]
        min: Option<f64>,

        /// Maximum coverage percent
        #[arg(long)]
        max: Option<f64>,

        /// Window start (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Window end (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Expected timeline: native or daily
        #[arg(long)]
        basis: Option<CoverageBasis>,

        /// List missing ranges per series
        #[arg(long)]
        ranges: bool,

        /// Only print store totals
        #[arg(long)]
        quick: bool,
    },

    /// Check series freshness against SLAs
    Freshness {
        #[command(subcommand)]
        action: FreshnessAction,
    },

    /// Check connectivity of each source
    Probe {
        /// Only probe these source IDs
        #[arg(long)]
        source: Option<Vec<String>>,

        /// Year to fetch (defaults to last year)
        #[arg(long)]
        year: Option<i32>,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List checkpoints
    List {
        /// running, paused, completed or failed
        #[arg(long)]
        status: Option<CheckpointStatus>,
    },

    /// Show one checkpoint with its error log
    Show { id: String },

    /// Stop a running checkpoint after its current step
    Pause { id: String },
}

#[derive(Subcommand)]
enum ContradictionAction {
    /// Compare observations of the same indicator, date and regime
    Scan {
        /// First date (YYYY-MM-DD)
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last date (YYYY-MM-DD)
        #[arg(long)]
        to: Option<NaiveDate>,

        #[arg(long)]
        regime: Option<RegimeTag>,

        #[arg(long)]
        indicator: Option<String>,
    },

    /// List recorded contradictions
    List {
        #[arg(long)]
        status: Option<ContradictionStatus>,

        /// Only detected and investigating records
        #[arg(long)]
        open: bool,
    },

    /// Counts by status, class and indicator
    Stats,

    /// Mark a contradiction as under investigation
    Investigate {
        id: String,
        #[arg(long)]
        by: Option<String>,
    },

    /// Close with an explanation
    Explain {
        id: String,
        explanation: String,
        #[arg(long)]
        by: String,
    },

    /// Close by choosing one observation
    Resolve {
        id: String,
        /// Observation ID to keep
        observation: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        note: Option<String>,
    },

    /// Close keeping both values
    Accept {
        id: String,
        reason: String,
        #[arg(long)]
        by: String,
    },
}

#[derive(Subcommand)]
enum FreshnessAction {
    /// Classify every series and close tickets of fresh ones
    Check {
        /// Also open gap tickets for critical series
        #[arg(long)]
        tickets: bool,
    },

    /// Health summary
    Summary,

    /// Series past their critical threshold
    Critical,

    /// List gap tickets
    Tickets {
        #[arg(long)]
        status: Option<TicketStatus>,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let fmt_layer = if cli.log_json {
        fmt::layer()
            .json()
            .with_writer(LogWriterFactory::default())
            .boxed()
    } else {
        fmt::layer().with_writer(LogWriterFactory::default()).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(filter)
        .init();

    // Handle init command specially (doesn't need existing config)
    if matches!(cli.command, Commands::Init { .. }) {
        return handle_init(cli).await;
    }

    // Handle completions command (doesn't need config/db)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "backfill", &mut std::io::stdout());
        print_completion_extras(shell);
        return Ok(());
    }

    // Lint an explicit file without requiring init
    if let Commands::Lint { file: Some(file) } = &cli.command {
        return handle_lint(file, true, cli.json);
    }

    // Load configuration
    let config = load_config(cli.config.as_deref()).await?;
    let registry = SharedRegistry::open(&config.paths.registry_file)?.snapshot();
    let json = cli.json;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Lint { .. } => {
            handle_lint(&config.paths.registry_file, false, json)?;
        }

        Commands::Sources {
            active,
            stats,
            ids_only,
            completion,
        } => {
            if stats {
                let stats = cmd_source_stats(&registry)?;
                emit(json, &stats, print_source_stats)?;
                return Ok(());
            }

            let sources = cmd_list_sources(&registry, &SourceListOptions { active_only: active });
            if let Some(shell) = completion {
                print_source_completions(&sources, shell);
            } else if ids_only {
                // Output only IDs for scripting/completions
                for source in &sources {
                    println!("{}", source.id);
                }
            } else {
                emit(json, &sources, |s| print_sources(s))?;
            }
        }

        Commands::Probe { source, year } => {
            let adapters = AdapterSet::from_registry(&registry, &config)?;
            let report = cmd_probe(&registry, &adapters, source.as_deref(), year).await?;
            emit(json, &report, print_probe)?;
        }

        command => {
            let store = Arc::new(SqliteStore::connect_initialized(&config).await?);
            handle_store_command(&config, store, registry, command, json).await?;
        }
    }

    Ok(())
}

async fn handle_store_command(
    config: &Config,
    store: Arc<SqliteStore>,
    registry: Arc<SourceRegistry>,
    command: Commands,
    json: bool,
) -> Result<()> {
    match command {
        Commands::Status => {
            let status = cmd_status(config, &store, &registry).await?;
            emit(json, &status, print_status)?;
        }

        Commands::Run {
            source,
            product,
            year,
            from,
            to,
            all,
            granularity,
            force,
        } => {
            let target = RunTarget::from_overrides(
                RunOverrides {
                    source,
                    product,
                    year,
                    from,
                    to,
                    all,
                },
                config,
            )?;
            let summary = cmd_run(config, store, registry, target, RunOptions { granularity, force }).await?;
            emit(json, &summary, print_run_summary)?;
        }

        Commands::Checkpoints { action } => match action {
            CheckpointAction::List { status } => {
                let checkpoints = cmd_list_checkpoints(store.as_ref(), status).await?;
                emit(json, &checkpoints, |c| print_checkpoints(c))?;
            }
            CheckpointAction::Show { id } => {
                let detail = cmd_show_checkpoint(store.as_ref(), &id).await?;
                emit(json, &detail, print_checkpoint_detail)?;
            }
            CheckpointAction::Pause { id } => {
                let checkpoint = cmd_pause_checkpoint(store.as_ref(), &id).await?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&checkpoint)?);
                } else {
                    println!(
                        "✓ Pause requested for {}/{} {}; the runner stops after its current step",
                        checkpoint.source_id, checkpoint.product_id, checkpoint.chunk_label
                    );
                }
            }
        },

        Commands::Contradictions { action } => {
            handle_contradictions(config, store, action, json).await?;
        }

        Commands::Coverage {
            sector,
            regime,
            min,
            max,
            from,
            to,
            basis,
            ranges,
            quick,
        } => {
            if quick {
                let stats = cmd_coverage_quick(config, store, registry).await?;
                emit(json, &stats, print_quick_stats)?;
            } else {
                let filter = CoverageFilter {
                    sector,
                    regime,
                    min_coverage: min,
                    max_coverage: max,
                    start: from,
                    end: to,
                };
                let map = cmd_coverage(config, store, registry, &filter, basis).await?;
                emit(json, &map, |m| print_coverage(m, ranges))?;
            }
        }

        Commands::Freshness { action } => match action {
            FreshnessAction::Check { tickets } => {
                let run = cmd_freshness_check(config, store, registry, tickets).await?;
                emit(json, &run, print_freshness_run)?;
            }
            FreshnessAction::Summary => {
                let summary = cmd_freshness_summary(config, store, registry).await?;
                emit(json, &summary, print_freshness_summary)?;
            }
            FreshnessAction::Critical => {
                let critical = cmd_freshness_critical(config, store, registry).await?;
                emit(json, &critical, |c| {
                    println!("\n⏱️  Critical Series ({})\n", c.len());
                    print_statuses(c);
                })?;
            }
            FreshnessAction::Tickets { status } => {
                let tickets = cmd_list_tickets(&store, status).await?;
                emit(json, &tickets, |t| print_tickets(t))?;
            }
        },

        Commands::Init { .. }
        | Commands::Completions { .. }
        | Commands::Lint { .. }
        | Commands::Sources { .. }
        | Commands::Probe { .. } => unreachable!(),
    }

    Ok(())
}

async fn handle_contradictions(
    config: &Config,
    store: Arc<SqliteStore>,
    action: ContradictionAction,
    json: bool,
) -> Result<()> {
    let (id, decision) = match action {
        ContradictionAction::Scan {
            from,
            to,
            regime,
            indicator,
        } => {
            let filter = ScanFilter {
                start: from,
                end: to,
                regime,
                indicator_code: indicator,
            };
            let report = cmd_scan_contradictions(config, store, &filter).await?;
            return emit(json, &report, print_scan_report);
        }
        ContradictionAction::List { status, open } => {
            let contradictions = cmd_list_contradictions(&store, status, open).await?;
            return emit(json, &contradictions, |c| print_contradictions(c));
        }
        ContradictionAction::Stats => {
            let stats = cmd_contradiction_stats(config, store).await?;
            return emit(json, &stats, print_contradiction_stats);
        }
        ContradictionAction::Investigate { id, by } => (id, Decision::Investigate { by }),
        ContradictionAction::Explain { id, explanation, by } => {
            (id, Decision::Explain { explanation, by })
        }
        ContradictionAction::Resolve {
            id,
            observation,
            by,
            note,
        } => (
            id,
            Decision::Resolve {
                chosen_observation: observation,
                by,
                note,
            },
        ),
        ContradictionAction::Accept { id, reason, by } => (id, Decision::Accept { reason, by }),
    };

    let updated = cmd_decide_contradiction(config, store, &id, decision).await?;
    emit(json, &updated, print_contradiction)
}

fn handle_lint(path: &std::path::Path, explicit: bool, json: bool) -> Result<()> {
    let report = cmd_lint(path, explicit)?;
    emit(json, &report, print_lint)?;
    report.ensure_clean()
}

/// Print `value` as JSON or through its console printer
fn emit<T: Serialize + ?Sized>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn print_completion_extras(shell: Shell) {
    match shell {
        Shell::Bash => {
            println!();
            println!("{}", r#"# Dynamic completion for 'backfill run --source' IDs"#);
            println!("{}", r#"_backfill_dynamic() {"#);
            println!("{}", r#"    local cur="${COMP_WORDS[COMP_CWORD]}""#);
            println!("{}", r#"    local prev="${COMP_WORDS[COMP_CWORD-1]}""#);
            println!("{}", r#"    if [[ "$prev" == "--source" ]]; then"#);
            println!(
                "{}",
                r#"        COMPREPLY=( $(compgen -W "$(backfill sources --completion bash 2>/dev/null)" -- "$cur") )"#
            );
            println!("{}", r#"        return 0"#);
            println!("{}", r#"    fi"#);
            println!("{}", r#"    _backfill "$@""#);
            println!("{}", r#"}"#);
            println!("{}", r#"complete -F _backfill_dynamic -o bashdefault -o default backfill"#);
        }
        Shell::Zsh => {
            println!();
            println!("{}", r#"# Dynamic completion for 'backfill run --source' IDs"#);
            println!("{}", r#"_backfill_source_ids() {"#);
            println!("{}", r#"    local -a entries"#);
            println!(
                "{}",
                r#"    entries=("${(@f)$(backfill sources --completion zsh 2>/dev/null)}")"#
            );
            println!("{}", r#"    _describe -t sources 'source ids' entries"#);
            println!("{}", r#"}"#);
        }
        Shell::Fish => {
            println!();
            println!("{}", r#"# Dynamic completion for 'backfill run --source' IDs"#);
            println!(
                "{}",
                r#"complete -c backfill -n '__fish_seen_subcommand_from run probe' -l source -xa '(backfill sources --completion fish 2>/dev/null)'"#
            );
        }
        _ => {}
    }
}

async fn handle_init(cli: Cli) -> Result<()> {
    let Commands::Init { force } = cli.command else {
        unreachable!()
    };

    // Get the base directory: if user specifies config file, use its parent dir
    // Otherwise use default base dir
    let (base_dir, config_path) = if let Some(path) = cli.config {
        if path.extension().is_some_and(|e| e == "toml") {
            let base = path
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(Config::default_base_dir);
            (base, path)
        } else {
            (path.clone(), path.join("config.toml"))
        }
    } else {
        let base = Config::default_base_dir();
        (base.clone(), base.join("config.toml"))
    };

    let info = cmd_init(InitOptions {
        base_dir,
        config_path,
        force,
    })
    .await?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else {
        print_init(&info);
    }

    Ok(())
}

async fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        eprintln!(
            "Config file not found: {}\nRun 'backfill init' first.",
            config_path.display()
        );
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}

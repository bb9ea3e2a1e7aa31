use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use modraven::queue::daemon::request_stop;
use modraven::{
    Daemon, EXIT_WRITER_EXISTS, Engine, PendingRefreshLog, RavenError, Settings, WriterLock,
};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "modraven")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Content-addressed mod indexing and conflict analysis")]
struct Cli {
    /// Path to the configuration file (defaults to the data dir's
    /// modraven.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Data directory to initialize
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Overwrite an existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Run the build daemon in the foreground
    Start,

    /// Ask a running daemon to stop
    Stop,

    /// Show store, lock, and queue status
    Status {
        /// Emit JSON
        #[arg(long)]
        json: bool,
    },

    /// Drop derived artifacts and the queue (blobs and catalog survive)
    Reset {
        /// Skip the confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Ingest a content root and build its derived artifacts
    Ingest {
        /// vanilla | mod
        kind: String,

        /// Directory to ingest
        path: PathBuf,

        /// Vanilla version string (vanilla only)
        #[arg(long)]
        game_version: Option<String>,

        /// Display name (mods; defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Steam workshop id (mods)
        #[arg(long)]
        workshop_id: Option<String>,
    },

    /// Generate the conflicts.v1 report for a playset
    Report {
        /// Ordered cvid list, comma separated, vanilla first
        #[arg(long)]
        playset: String,

        /// Include the stable symbols hash
        #[arg(long)]
        symbols_hash: bool,

        /// Write to a file instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Search the index
    Search {
        #[command(subcommand)]
        query: SearchQuery,
    },

    /// Print the winning file for a relpath
    GetFile {
        relpath: String,

        #[arg(long)]
        playset: String,
    },

    /// Exhaustive negative check over symbols and references
    NotExists {
        name: String,

        #[arg(long)]
        playset: String,
    },

    /// Append a refresh record for a running daemon
    Notify {
        /// write | delete
        op: String,
        mod_name: String,
        relpath: String,
    },

    /// Internal: parse worker subprocess entry point
    #[command(hide = true)]
    ParseWorker {
        #[arg(long, default_value_t = 5000)]
        max_parses: u32,
    },
}

#[derive(Subcommand)]
enum SearchQuery {
    /// Exact + prefix symbol search
    Symbols {
        query: String,
        #[arg(long)]
        playset: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Relpath glob search
    Files {
        glob: String,
        #[arg(long)]
        playset: String,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },

    /// Substring search over winning text blobs
    Content {
        needle: String,
        #[arg(long)]
        playset: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Ranked full-text search over indexed content
    Text {
        query: String,
        #[arg(long)]
        playset: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    // The worker must not drag config or logging init into its hot path.
    if let Commands::ParseWorker { max_parses } = &cli.command {
        std::process::exit(modraven::pool::run_worker(*max_parses));
    }

    let settings = match load_settings(&cli) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    };
    modraven::logging::init_with_config(&settings.logging);

    match run(cli, Arc::new(settings)) {
        Ok(()) => {}
        Err(e) => {
            if let Some(RavenError::WriterLock {
                holder_pid,
                acquired_at,
            }) = e.downcast_ref::<RavenError>()
            {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": "writer_exists",
                        "holder_pid": holder_pid,
                        "acquired_at": acquired_at,
                    })
                );
                std::process::exit(EXIT_WRITER_EXISTS);
            }
            eprintln!("error: {e:#}");
            std::process::exit(1);
        }
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    match &cli.config {
        Some(path) => Settings::load_from(path).context("loading configuration"),
        None => Settings::load().context("loading configuration"),
    }
}

fn parse_playset(engine: &Engine, spec: &str) -> Result<modraven::Playset> {
    let cvids = spec
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<u32>()
                .with_context(|| format!("invalid cvid '{part}'"))
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(engine.playset(&cvids)?)
}

fn run(cli: Cli, settings: Arc<Settings>) -> Result<()> {
    match cli.command {
        Commands::ParseWorker { .. } => unreachable!("handled before settings load"),

        Commands::Init { data_dir, force } => {
            let dir = data_dir.unwrap_or_else(|| settings.data_dir.clone());
            let path = dir.join("modraven.toml");
            if path.exists() && !force {
                bail!(
                    "configuration already exists at {} (use --force to overwrite)",
                    path.display()
                );
            }
            let written = Settings::write_default_config(&dir)?;
            println!("wrote {}", written.display());
            Ok(())
        }

        Commands::Start => {
            let mut daemon = Daemon::start(settings)?;
            daemon.run()?;
            Ok(())
        }

        Commands::Stop => {
            let lock = WriterLock::new(&settings.writer_lock_path(), &settings.data_dir);
            let status = lock.status();
            if !status.holder_alive {
                println!("no daemon is running");
                return Ok(());
            }
            request_stop(&settings)?;
            println!(
                "stop requested (daemon pid {})",
                status.holder_pid.unwrap_or(0)
            );
            Ok(())
        }

        Commands::Status { json } => {
            let lock = WriterLock::new(&settings.writer_lock_path(), &settings.data_dir);
            let lock_status = lock.status();
            let engine = Engine::open(settings.clone())?;
            let counts = engine.queue().counts();
            let pending_log = PendingRefreshLog::new(&settings.pending_refresh_path());

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "store": settings.data_dir,
                        "writer_lock": lock_status,
                        "queue": counts,
                        "files": engine.file_count(None),
                        "pending_refresh": pending_log.pending_count(),
                    }))?
                );
            } else {
                println!("store:   {}", settings.data_dir.display());
                match (lock_status.holder_pid, lock_status.holder_alive) {
                    (Some(pid), true) => println!("daemon:  running (pid {pid})"),
                    (Some(pid), false) => println!("daemon:  stale lock (pid {pid} gone)"),
                    _ => println!("daemon:  not running"),
                }
                println!(
                    "queue:   {} pending, {} in progress, {} completed, {} failed, {} skipped",
                    counts.pending,
                    counts.in_progress,
                    counts.completed,
                    counts.failed,
                    counts.skipped
                );
                println!("files:   {}", engine.file_count(None));
                println!("pending: {} refresh records", pending_log.pending_count());
            }
            Ok(())
        }

        Commands::Reset { force } => {
            if !force {
                bail!("reset drops all derived artifacts; re-run with --force");
            }
            let mut lock = WriterLock::new(&settings.writer_lock_path(), &settings.data_dir);
            lock.acquire_or_fail()?;
            let mut engine = Engine::open(settings)?;
            engine.reset_derived()?;
            println!("derived artifacts and queue cleared");
            Ok(())
        }

        Commands::Ingest {
            kind,
            path,
            game_version,
            name,
            workshop_id,
        } => {
            let mut daemon = Daemon::start(settings)?;
            let report = match kind.as_str() {
                "vanilla" => {
                    let version = game_version
                        .context("--game-version is required for vanilla ingests")?;
                    daemon.engine_mut().ingest_vanilla(&path, &version)?
                }
                "mod" => {
                    let name = name.unwrap_or_else(|| {
                        path.file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_else(|| "unnamed".into())
                    });
                    daemon
                        .engine_mut()
                        .ingest_mod(&path, &name, workshop_id.as_deref())?
                }
                other => bail!("unknown ingest kind '{other}' (expected vanilla or mod)"),
            };
            let processed = daemon.run_until_idle()?;
            daemon.shutdown()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            println!(
                "processed: {} completed, {} failed, {} skipped",
                processed.processed.completed,
                processed.processed.failed,
                processed.processed.skipped
            );
            Ok(())
        }

        Commands::Report {
            playset,
            symbols_hash,
            out,
        } => {
            let engine = Engine::open(settings)?;
            let playset = parse_playset(&engine, &playset)?;
            let report = engine.report(&playset, symbols_hash);
            let json = report.to_json_pretty();
            match out {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("wrote {}", path.display());
                }
                None => println!("{json}"),
            }
            Ok(())
        }

        Commands::Search { query } => {
            let engine = Engine::open(settings)?;
            match query {
                SearchQuery::Symbols {
                    query,
                    playset,
                    limit,
                } => {
                    let playset = parse_playset(&engine, &playset)?;
                    let hits = engine.search_symbols(&playset, &query, limit);
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                }
                SearchQuery::Files {
                    glob,
                    playset,
                    limit,
                } => {
                    let playset = parse_playset(&engine, &playset)?;
                    let hits = engine.search_files(&playset, &glob, limit)?;
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                }
                SearchQuery::Content {
                    needle,
                    playset,
                    limit,
                } => {
                    let playset = parse_playset(&engine, &playset)?;
                    let hits = engine.search_content(&playset, &needle, limit)?;
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                }
                SearchQuery::Text {
                    query,
                    playset,
                    limit,
                } => {
                    let playset = parse_playset(&engine, &playset)?;
                    let hits = engine.search_text(&playset, &query, limit)?;
                    println!("{}", serde_json::to_string_pretty(&hits)?);
                }
            }
            Ok(())
        }

        Commands::GetFile { relpath, playset } => {
            let engine = Engine::open(settings)?;
            let playset = parse_playset(&engine, &playset)?;
            match engine.get_file(&playset, &relpath)? {
                Some(contents) => println!("{}", serde_json::to_string_pretty(&contents)?),
                None => bail!("no file at '{relpath}' in this playset"),
            }
            Ok(())
        }

        Commands::NotExists { name, playset } => {
            let engine = Engine::open(settings)?;
            let playset = parse_playset(&engine, &playset)?;
            let result = engine.confirm_not_exists(&playset, &name);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }

        Commands::Notify {
            op,
            mod_name,
            relpath,
        } => {
            let log = PendingRefreshLog::new(&settings.pending_refresh_path());
            let op = match op.as_str() {
                "write" => modraven::queue::RefreshOp::Write,
                "delete" => modraven::queue::RefreshOp::Delete,
                other => bail!("unknown op '{other}' (expected write or delete)"),
            };
            log.append(op, &mod_name, &relpath)?;
            Ok(())
        }
    }
}

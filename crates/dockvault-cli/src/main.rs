mod commands;

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use commands::{exit_code_for, EXIT_FAILURE};
use dockvault_core::{
    install_signal_handler, BackupManager, BackupRequest, JobSlots, RestoreManager,
    RestoreRequest, Settings,
};
use dockvault_schema::BackupType;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(
    name = "dockvault",
    version,
    about = "Integrity-checked backup and restore for Docker containers"
)]
struct Cli {
    /// Settings file (default: ~/.config/dockvault/config.toml).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backup root directory; overrides `general.backup_dir`.
    #[arg(long, global = true)]
    backup_dir: Option<String>,

    /// Output results as structured JSON.
    #[arg(long, default_value_t = false, global = true)]
    json: bool,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false, global = true)]
    verbose: bool,

    /// Enable trace-level logging (more detailed than --verbose).
    #[arg(long, default_value_t = false, global = true)]
    trace: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List containers known to the engine.
    Containers {
        /// Include stopped containers.
        #[arg(short, long, default_value_t = false)]
        all: bool,
    },
    /// Back up one or more containers.
    Backup {
        /// Container names or ids.
        #[arg(required = true)]
        containers: Vec<String>,
        /// `full` (filesystem, image, configuration) or `filesystem`.
        #[arg(long = "type")]
        backup_type: Option<BackupType>,
        /// Gzip level, 0-9.
        #[arg(long, value_parser = clap::value_parser!(u32).range(0..=9))]
        level: Option<u32>,
        /// Do not capture container logs.
        #[arg(long, default_value_t = false)]
        no_logs: bool,
        /// Skip re-hashing the artifacts after writing them.
        #[arg(long, default_value_t = false)]
        no_verify: bool,
        /// Write into this backup root instead of the configured one.
        #[arg(long)]
        dest: Option<PathBuf>,
    },
    /// List backups, newest first.
    List {
        /// Only backups of this container.
        #[arg(long)]
        container: Option<String>,
    },
    /// Show a backup's metadata.
    Inspect { backup_id: String },
    /// Delete a backup directory. Irreversible.
    Delete { backup_id: String },
    /// Delete backups older than the retention period.
    Cleanup {
        /// Retention in days (default: `general.retention_days`).
        #[arg(long)]
        days: Option<u32>,
        /// Only backups of this container.
        #[arg(long)]
        container: Option<String>,
        /// Only report what would be removed.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Create a container from a backup.
    Restore {
        backup_id: String,
        /// Name for the new container (default: the original name).
        #[arg(long)]
        name: Option<String>,
        /// Override a top-level configuration key; VALUE may be JSON.
        #[arg(long = "set", value_name = "KEY=VALUE")]
        set: Vec<String>,
        /// Leave the container stopped.
        #[arg(long, default_value_t = false)]
        no_start: bool,
        /// Skip checksum verification before restoring.
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// Summarize what a restore would create.
    Preview { backup_id: String },
    /// Re-hash a backup's artifacts against its recorded checksums.
    Verify { backup_id: String },
    /// Upload a backup to the configured storage.
    Push { backup_id: String },
    /// Download a backup from the configured storage; lists remote backups
    /// when no id is given.
    Pull { backup_id: Option<String> },
    /// Generate shell completions for bash, zsh, fish, elvish, or powershell.
    Completions {
        /// Shell to generate completions for.
        shell: Shell,
    },
}

#[allow(clippy::too_many_lines)]
fn main() -> ExitCode {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let msg = info.to_string();
        if msg.contains("Broken pipe")
            || msg.contains("broken pipe")
            || msg.contains("os error 32")
            || msg.contains("failed printing to stdout")
        {
            std::process::exit(0);
        }
        default_hook(info);
    }));

    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("DOCKVAULT_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();

    install_signal_handler();

    let mut settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {}", commands::describe(&e));
            return ExitCode::from(commands::EXIT_CONFIG_ERROR);
        }
    };
    if let Some(dir) = &cli.backup_dir {
        settings.general.backup_dir = expand_tilde(dir);
    } else {
        settings.general.backup_dir = expand_tilde(&settings.general.backup_dir.to_string_lossy());
    }
    let json_output = cli.json;

    let needs_engine = matches!(
        cli.command,
        Commands::Containers { .. } | Commands::Backup { .. } | Commands::Restore { .. }
    );
    if needs_engine
        && commands::engine_name() == "docker"
        && std::env::var("DOCKVAULT_SKIP_PREREQS").as_deref() != Ok("1")
    {
        let missing = dockvault_engine::check_engine_prereqs(&settings.docker.command);
        if !missing.is_empty() {
            eprintln!("error: {}", dockvault_engine::format_missing(&missing));
            return ExitCode::from(EXIT_FAILURE);
        }
    }

    let engine = match commands::make_engine(&settings) {
        Ok(e) => e,
        Err(msg) => {
            eprintln!("error: {msg}");
            return ExitCode::from(exit_code_for(&msg));
        }
    };
    let slots = JobSlots::new(settings.general.max_concurrent_jobs);
    let backups = Arc::new(
        BackupManager::from_settings(Arc::clone(&engine), &settings).with_job_slots(slots.clone()),
    );
    let restores = Arc::new(
        RestoreManager::from_settings(Arc::clone(&engine), &settings).with_job_slots(slots),
    );

    let result = match cli.command {
        Commands::Containers { all } => {
            commands::containers::run(engine.as_ref(), all, json_output)
        }
        Commands::Backup {
            containers,
            backup_type,
            level,
            no_logs,
            no_verify,
            dest,
        } => {
            let mut template = BackupRequest::from_settings("", &settings);
            if let Some(t) = backup_type {
                template = template.with_type(t);
            }
            if let Some(l) = level {
                template = template.with_level(l);
            }
            if no_logs {
                template = template.with_logs(false);
            }
            if no_verify {
                template = template.with_verify(false);
            }
            if let Some(d) = dest {
                template = template.with_destination(d);
            }
            commands::backup::run(&backups, &containers, &template, json_output)
        }
        Commands::List { container } => {
            commands::list::run(&backups, container.as_deref(), json_output)
        }
        Commands::Inspect { backup_id } => commands::inspect::run(&backups, &backup_id, json_output),
        Commands::Delete { backup_id } => commands::delete::run(&backups, &backup_id, json_output),
        Commands::Cleanup {
            days,
            container,
            dry_run,
        } => commands::cleanup::run(
            &backups,
            days.unwrap_or(settings.general.retention_days),
            container.as_deref(),
            dry_run,
            json_output,
        ),
        Commands::Restore {
            backup_id,
            name,
            set,
            no_start,
            no_verify,
        } => build_restore_request(backup_id, name, &set, !no_start, !no_verify)
            .and_then(|request| commands::restore::run(&restores, request, json_output)),
        Commands::Preview { backup_id } => {
            commands::preview::run(&restores, &backup_id, json_output)
        }
        Commands::Verify { backup_id } => commands::verify::run(&restores, &backup_id, json_output),
        Commands::Push { backup_id } => {
            commands::push::run(&backups, &settings, &backup_id, json_output)
        }
        Commands::Pull { backup_id } => {
            commands::pull::run(&backups, &settings, backup_id.as_deref(), json_output)
        }
        Commands::Completions { shell } => commands::completions::run::<Cli>(shell),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(msg) => {
            eprintln!("error: {msg}");
            ExitCode::from(exit_code_for(&msg))
        }
    }
}

fn build_restore_request(
    backup_id: String,
    name: Option<String>,
    set: &[String],
    start: bool,
    verify: bool,
) -> Result<RestoreRequest, String> {
    let mut request = RestoreRequest::new(backup_id)
        .with_start(start)
        .with_verify(verify);
    for arg in set {
        let (key, value) = commands::restore::parse_override(arg)?;
        request = request.with_override(key, value);
    }
    if let Some(n) = name {
        request = request.with_name(n);
    }
    Ok(request)
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(stripped);
        }
    }
    PathBuf::from(path)
}

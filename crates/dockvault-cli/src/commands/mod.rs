pub mod backup;
pub mod cleanup;
pub mod completions;
pub mod containers;
pub mod delete;
pub mod inspect;
pub mod list;
pub mod preview;
pub mod pull;
pub mod push;
pub mod restore;
pub mod verify;

use dockvault_core::{CoreError, ProgressEvent, Settings};
use dockvault_engine::{select_engine, ContainerEngine};
use dockvault_remote::{select_storage, RemoteError, StorageBackend};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::time::Duration;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_STORE_ERROR: u8 = 3;
pub const EXIT_INTEGRITY_ERROR: u8 = 4;
pub const EXIT_ENGINE_ERROR: u8 = 5;

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

/// Error text for the user, prefixed with the category `exit_code_for` keys on.
pub fn describe(e: &CoreError) -> String {
    match e {
        CoreError::Integrity { .. } => format!("integrity error: {e}"),
        CoreError::EngineUnavailable(_)
        | CoreError::Engine(_)
        | CoreError::ContainerNotFound(_)
        | CoreError::ImageNotFound(_)
        | CoreError::ContainerExists(_) => format!("engine error: {e}"),
        CoreError::BackupNotFound(_)
        | CoreError::Store(_)
        | CoreError::Io(_)
        | CoreError::Serialization(_) => format!("store error: {e}"),
        CoreError::Config(_) => format!("config error: {e}"),
        CoreError::Remote(r) => describe_remote(r),
        _ => e.to_string(),
    }
}

pub fn describe_remote(e: &RemoteError) -> String {
    match e {
        RemoteError::IntegrityFailure { .. } => format!("integrity error: {e}"),
        RemoteError::Store(_) => format!("store error: {e}"),
        RemoteError::Config(_) => format!("config error: {e}"),
        _ => format!("remote error: {e}"),
    }
}

pub fn exit_code_for(msg: &str) -> u8 {
    if msg.starts_with("integrity error:") {
        EXIT_INTEGRITY_ERROR
    } else if msg.starts_with("store error:") {
        EXIT_STORE_ERROR
    } else if msg.starts_with("engine error:") {
        EXIT_ENGINE_ERROR
    } else if msg.starts_with("config error:") {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_FAILURE
    }
}

/// Engine named by `DOCKVAULT_ENGINE` (default `docker`). Building it runs
/// nothing; commands that only read the backup root never call it.
pub fn make_engine(settings: &Settings) -> Result<Arc<dyn ContainerEngine>, String> {
    let name = engine_name();
    let engine = select_engine(
        &name,
        &settings.docker.command,
        Duration::from_secs(settings.docker.timeout_secs),
    )
    .map_err(|e| format!("config error: {e}"))?;
    Ok(Arc::from(engine))
}

pub fn engine_name() -> String {
    std::env::var("DOCKVAULT_ENGINE").unwrap_or_else(|_| "docker".to_owned())
}

pub fn make_storage(settings: &Settings) -> Result<Box<dyn StorageBackend>, String> {
    let config = settings
        .storage
        .as_ref()
        .ok_or_else(|| "config error: no [storage] section in the settings file".to_owned())?;
    select_storage(config).map_err(|e| describe_remote(&e))
}

pub fn spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("valid template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn spin_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn spin_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Percentage bar for a running job; hidden in JSON mode.
pub fn job_bar(json: bool) -> ProgressBar {
    if json {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Drain `events` into `pb` until the producing job drops its sink.
pub fn render_progress(events: &Receiver<ProgressEvent>, pb: &ProgressBar) {
    for event in events {
        match event {
            ProgressEvent::Percent(p) => pb.set_position(u64::from(p)),
            ProgressEvent::Operation(op) => pb.set_message(op),
            ProgressEvent::Detail(line) => pb.println(format!("  {line}")),
        }
    }
}

pub fn colorize_status(status: &str) -> String {
    use console::Style;
    match status {
        "running" => Style::new().green().apply_to(status).to_string(),
        "created" | "paused" => Style::new().yellow().apply_to(status).to_string(),
        "exited" | "dead" => Style::new().dim().apply_to(status).to_string(),
        "restarting" => Style::new().cyan().bold().apply_to(status).to_string(),
        other => other.to_owned(),
    }
}

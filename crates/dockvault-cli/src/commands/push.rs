use super::{describe_remote, json_pretty, make_storage, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use dockvault_core::{BackupManager, Settings};
use dockvault_remote::{push_backup, StorageBackend};

pub fn run(
    manager: &BackupManager,
    settings: &Settings,
    backup_id: &str,
    json: bool,
) -> Result<u8, String> {
    let backend: Box<dyn StorageBackend> = make_storage(settings)?;

    let pb = spinner(&format!("pushing {backup_id} to {}…", backend.name()));
    let result = push_backup(manager.store(), backup_id, backend.as_ref());
    if let Err(e) = backend.disconnect() {
        tracing::warn!("disconnecting from {}: {e}", backend.name());
    }
    let result = result.map_err(|e| {
        spin_fail(&pb, "push failed");
        describe_remote(&e)
    })?;
    spin_ok(&pb, "push complete");

    if json {
        let payload = serde_json::json!({
            "backup_id": backup_id,
            "files_pushed": result.files_pushed,
            "files_skipped": result.files_skipped,
            "bytes_pushed": result.bytes_pushed,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "pushed {backup_id} ({} files, {}; {} already present)",
            result.files_pushed,
            dockvault_schema::format_size(result.bytes_pushed),
            result.files_skipped
        );
    }
    Ok(EXIT_SUCCESS)
}

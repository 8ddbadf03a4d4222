use super::{describe_remote, json_pretty, make_storage, spin_fail, spin_ok, spinner, EXIT_SUCCESS};
use dockvault_core::{BackupManager, Settings};
use dockvault_remote::{list_remote_backups, pull_backup, StorageBackend};

/// Pull one backup, or list what the remote holds when no id is given.
pub fn run(
    manager: &BackupManager,
    settings: &Settings,
    backup_id: Option<&str>,
    json: bool,
) -> Result<u8, String> {
    let backend = make_storage(settings)?;
    let result = match backup_id {
        Some(id) => pull_one(manager, backend.as_ref(), id, json),
        None => list(backend.as_ref(), json),
    };
    if let Err(e) = backend.disconnect() {
        tracing::warn!("disconnecting from {}: {e}", backend.name());
    }
    result
}

fn list(backend: &dyn StorageBackend, json: bool) -> Result<u8, String> {
    backend.connect().map_err(|e| describe_remote(&e))?;
    let ids = list_remote_backups(backend).map_err(|e| describe_remote(&e))?;
    if json {
        println!("{}", json_pretty(&ids)?);
    } else if ids.is_empty() {
        println!("no backups on {}", backend.name());
    } else {
        for id in &ids {
            println!("{id}");
        }
    }
    Ok(EXIT_SUCCESS)
}

fn pull_one(
    manager: &BackupManager,
    backend: &dyn StorageBackend,
    backup_id: &str,
    json: bool,
) -> Result<u8, String> {
    let pb = spinner(&format!("pulling {backup_id} from {}…", backend.name()));
    let result = pull_backup(manager.store(), backup_id, backend).map_err(|e| {
        spin_fail(&pb, "pull failed");
        describe_remote(&e)
    })?;
    spin_ok(&pb, "pull complete");

    if json {
        let payload = serde_json::json!({
            "backup_id": result.record.backup_id,
            "container_name": result.record.container_name,
            "files_pulled": result.files_pulled,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "pulled {} ({} files, container {})",
            result.record.backup_id, result.files_pulled, result.record.container_name
        );
    }
    Ok(EXIT_SUCCESS)
}

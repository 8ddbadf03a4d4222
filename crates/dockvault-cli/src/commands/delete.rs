use super::{describe, json_pretty, EXIT_SUCCESS};
use dockvault_core::BackupManager;

pub fn run(manager: &BackupManager, backup_id: &str, json: bool) -> Result<u8, String> {
    manager.delete_backup(backup_id).map_err(|e| describe(&e))?;
    if json {
        let payload = serde_json::json!({
            "backup_id": backup_id,
            "deleted": true,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("deleted backup {backup_id}");
    }
    Ok(EXIT_SUCCESS)
}

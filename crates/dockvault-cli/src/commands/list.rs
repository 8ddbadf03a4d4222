use super::{describe, json_pretty, EXIT_SUCCESS};
use dockvault_core::BackupManager;

pub fn run(manager: &BackupManager, container: Option<&str>, json: bool) -> Result<u8, String> {
    let records = manager
        .list_backups(container)
        .map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&records)?);
        return Ok(EXIT_SUCCESS);
    }
    if records.is_empty() {
        println!("no backups found");
    } else {
        println!(
            "{:<36} {:<20} {:<11} {:>10}  CREATED",
            "BACKUP_ID", "CONTAINER", "TYPE", "SIZE"
        );
        for r in &records {
            println!(
                "{:<36} {:<20} {:<11} {:>10}  {}",
                r.backup_id, r.container_name, r.backup_type, r.size_human, r.timestamp
            );
        }
    }
    let incomplete = manager.incomplete_backups().map_err(|e| describe(&e))?;
    if !incomplete.is_empty() {
        eprintln!(
            "note: {} incomplete backup directories: {}",
            incomplete.len(),
            incomplete.join(", ")
        );
    }
    Ok(EXIT_SUCCESS)
}

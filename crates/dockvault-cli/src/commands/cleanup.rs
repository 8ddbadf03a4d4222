use super::{describe, json_pretty, EXIT_SUCCESS};
use dockvault_core::BackupManager;

pub fn run(
    manager: &BackupManager,
    retention_days: u32,
    container: Option<&str>,
    dry_run: bool,
    json: bool,
) -> Result<u8, String> {
    let report = manager
        .cleanup_report(retention_days, container, dry_run)
        .map_err(|e| describe(&e))?;
    if json {
        let payload = serde_json::json!({
            "dry_run": dry_run,
            "retention_days": retention_days,
            "expired": report.expired,
            "removed": report.removed,
            "skipped": report.skipped,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        let verb = if dry_run { "would remove" } else { "removed" };
        let count = if dry_run {
            report.expired.len()
        } else {
            report.removed
        };
        println!("cleanup: {verb} {count} backups older than {retention_days} days");
        if dry_run {
            for id in &report.expired {
                println!("  {id}");
            }
        }
        for (id, reason) in &report.skipped {
            eprintln!("  skipped {id}: {reason}");
        }
    }
    Ok(EXIT_SUCCESS)
}

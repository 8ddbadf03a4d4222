use super::{describe, json_pretty, EXIT_INTEGRITY_ERROR, EXIT_SUCCESS};
use dockvault_core::RestoreManager;

pub fn run(manager: &RestoreManager, backup_id: &str, json: bool) -> Result<u8, String> {
    let report = manager
        .verify_backup_integrity(backup_id)
        .map_err(|e| describe(&e))?;

    if json {
        println!("{}", json_pretty(&report)?);
    } else {
        println!(
            "backup {backup_id}: {}/{} files passed",
            report.passed, report.checked
        );
        for f in &report.failed {
            println!("  FAIL {}: {}", f.file, f.kind);
        }
    }

    if report.is_ok() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_INTEGRITY_ERROR)
    }
}

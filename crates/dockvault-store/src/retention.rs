use crate::records::{sort_newest_first, RecordStore};
use crate::StoreError;
use chrono::{DateTime, Duration, Utc};
use dockvault_schema::BackupId;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Default, Serialize)]
pub struct RetentionReport {
    /// Backups older than the cutoff, newest first.
    pub expired: Vec<BackupId>,
    pub removed: usize,
    /// Backups that could not be evaluated or removed, with the reason.
    pub skipped: Vec<(BackupId, String)>,
}

/// Delete every backup created strictly before `now - retention_days`.
///
/// With `dry_run` nothing is removed; `expired` still lists what would go.
/// Records that cannot be read are never removed and land in `skipped`.
pub fn sweep_expired(
    store: &RecordStore,
    retention_days: u32,
    container_name: Option<&str>,
    now: DateTime<Utc>,
    dry_run: bool,
) -> Result<RetentionReport, StoreError> {
    let cutoff = now - Duration::days(i64::from(retention_days));
    let mut report = RetentionReport::default();

    let mut records = Vec::new();
    for entry in store.list_with_errors()? {
        match entry {
            Ok(record) => match container_name {
                Some(name) if record.container_name != name => {}
                _ => records.push(record),
            },
            // The owning container is unknown, so it is reported under any filter.
            Err((id, e)) => {
                warn!("cannot evaluate backup '{id}' for retention: {e}");
                report.skipped.push((BackupId::new(id), e.to_string()));
            }
        }
    }
    sort_newest_first(&mut records);

    for record in records {
        let Some(created) = record.created_at() else {
            warn!(
                "cannot parse timestamp '{}' of backup {}",
                record.timestamp, record.backup_id
            );
            report
                .skipped
                .push((record.backup_id, "unparseable timestamp".to_owned()));
            continue;
        };
        if created >= cutoff {
            continue;
        }
        if !dry_run {
            if let Err(e) = store.remove(&record.backup_id) {
                warn!("failed to remove expired backup {}: {e}", record.backup_id);
                report.skipped.push((record.backup_id, e.to_string()));
                continue;
            }
            report.removed += 1;
        }
        report.expired.push(record.backup_id);
    }

    if dry_run {
        info!(
            "{} backups older than {retention_days} days would be removed",
            report.expired.len()
        );
    } else {
        info!("cleaned up {} old backups", report.removed);
    }
    Ok(report)
}

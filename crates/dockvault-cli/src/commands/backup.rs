use super::{describe, job_bar, json_pretty, render_progress, EXIT_FAILURE, EXIT_SUCCESS};
use dockvault_core::{spawn_backup, BackupManager, BackupRequest, CancelFlag, ProgressSink};
use std::sync::Arc;
use std::thread;

pub fn run(
    manager: &Arc<BackupManager>,
    containers: &[String],
    template: &BackupRequest,
    json: bool,
) -> Result<u8, String> {
    match containers {
        [single] => run_one(
            manager,
            BackupRequest {
                container: single.clone(),
                ..template.clone()
            },
            json,
        ),
        _ => run_many(manager, containers, template, json),
    }
}

fn run_one(manager: &Arc<BackupManager>, request: BackupRequest, json: bool) -> Result<u8, String> {
    let pb = job_bar(json);
    let job = spawn_backup(Arc::clone(manager), request).map_err(|e| describe(&e))?;
    render_progress(job.progress(), &pb);
    let record = job.join().map_err(|e| {
        pb.abandon();
        describe(&e)
    })?;
    pb.finish_and_clear();

    if json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!(
            "✓ backed up {} as {} ({}, {})",
            record.container_name, record.backup_id, record.backup_type, record.size_human
        );
    }
    Ok(EXIT_SUCCESS)
}

fn run_many(
    manager: &Arc<BackupManager>,
    containers: &[String],
    template: &BackupRequest,
    json: bool,
) -> Result<u8, String> {
    let pb = job_bar(json);
    let (sink, events) = ProgressSink::channel();
    let cancel = CancelFlag::new();
    let results = thread::scope(|s| {
        let worker = s.spawn(move || manager.backup_many(containers, template, &sink, &cancel));
        render_progress(&events, &pb);
        worker.join()
    })
    .map_err(|_| "backup worker panicked".to_owned())?;
    pb.finish_and_clear();

    let failed = results.iter().filter(|(_, r)| r.is_err()).count();
    if json {
        let payload: Vec<serde_json::Value> = results
            .iter()
            .map(|(name, result)| match result {
                Ok(record) => serde_json::json!({
                    "container": name,
                    "ok": true,
                    "backup_id": record.backup_id,
                    "size_bytes": record.size_bytes,
                }),
                Err(e) => serde_json::json!({
                    "container": name,
                    "ok": false,
                    "error": describe(e),
                }),
            })
            .collect();
        println!("{}", json_pretty(&payload)?);
    } else {
        for (name, result) in &results {
            match result {
                Ok(record) => println!("✓ {name}: {} ({})", record.backup_id, record.size_human),
                Err(e) => eprintln!("✗ {name}: {}", describe(e)),
            }
        }
        println!("{} of {} backups succeeded", results.len() - failed, results.len());
    }
    Ok(if failed == 0 { EXIT_SUCCESS } else { EXIT_FAILURE })
}

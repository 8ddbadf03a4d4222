use super::{describe, job_bar, json_pretty, render_progress, EXIT_SUCCESS};
use dockvault_core::{spawn_restore, RestoreManager, RestoreRequest};
use serde_json::Value;
use std::sync::Arc;

/// `KEY=VALUE`, where VALUE is JSON if it parses as JSON and a plain string
/// otherwise.
pub fn parse_override(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid --set '{arg}': expected KEY=VALUE"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("invalid --set '{arg}': empty key"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
    Ok((key.to_owned(), value))
}

pub fn run(manager: &Arc<RestoreManager>, request: RestoreRequest, json: bool) -> Result<u8, String> {
    let pb = job_bar(json);
    let job = spawn_restore(Arc::clone(manager), request).map_err(|e| describe(&e))?;
    render_progress(job.progress(), &pb);
    let outcome = job.join().map_err(|e| {
        pb.abandon();
        describe(&e)
    })?;
    pb.finish_and_clear();

    if json {
        println!("{}", json_pretty(&outcome)?);
    } else {
        println!(
            "✓ restored {} as {} ({})",
            outcome.backup_id,
            outcome.container_name,
            outcome.container_id.short()
        );
        println!("  image:   {}", outcome.image);
        println!("  started: {}", if outcome.started { "yes" } else { "no" });
        for w in &outcome.warnings {
            eprintln!("warning: {w}");
        }
    }
    Ok(EXIT_SUCCESS)
}

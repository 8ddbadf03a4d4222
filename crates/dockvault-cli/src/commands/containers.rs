use super::{colorize_status, describe, json_pretty, EXIT_SUCCESS};
use dockvault_core::CoreError;
use dockvault_engine::ContainerEngine;

pub fn run(engine: &dyn ContainerEngine, all: bool, json: bool) -> Result<u8, String> {
    let containers = engine
        .ping()
        .and_then(|()| engine.list_containers(all))
        .map_err(|e| describe(&CoreError::from(e)))?;
    if json {
        println!("{}", json_pretty(&containers)?);
    } else if containers.is_empty() {
        println!("no containers found");
    } else {
        println!("{:<14} {:<24} {:<12} IMAGE", "ID", "NAME", "STATUS");
        for c in &containers {
            println!(
                "{:<14} {:<24} {:<12} {}",
                c.id.short(),
                c.name,
                colorize_status(&c.status.to_string()),
                c.image
            );
        }
    }
    Ok(EXIT_SUCCESS)
}

use super::{describe, json_pretty, EXIT_SUCCESS};
use dockvault_core::RestoreManager;

pub fn run(manager: &RestoreManager, backup_id: &str, json: bool) -> Result<u8, String> {
    let preview = manager
        .get_restore_preview(backup_id)
        .map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&preview)?);
        return Ok(EXIT_SUCCESS);
    }
    println!("backup_id:   {}", preview.backup_id);
    println!("container:   {}", preview.container_name);
    println!("image:       {}", preview.image);
    println!("type:        {}", preview.backup_type);
    println!("created:     {}", preview.timestamp);
    println!("size:        {}", preview.size);
    println!("env vars:    {}", preview.environment_variables);
    println!("volumes:     {}", preview.volumes);
    println!("ports:       {}", preview.ports);
    println!("networks:    {}", preview.networks.join(", "));
    println!("files:       {}", preview.files_included.join(", "));
    println!("valid:       {}", if preview.valid { "yes" } else { "NO" });
    Ok(EXIT_SUCCESS)
}

use super::{describe, json_pretty, EXIT_SUCCESS};
use dockvault_core::BackupManager;

pub fn run(manager: &BackupManager, backup_id: &str, json: bool) -> Result<u8, String> {
    let record = manager
        .get_backup_metadata(backup_id)
        .map_err(|e| describe(&e))?;
    if json {
        println!("{}", json_pretty(&record)?);
        return Ok(EXIT_SUCCESS);
    }
    let info = &record.container_info;
    println!("backup_id:    {}", record.backup_id);
    println!("container:    {} ({})", record.container_name, record.container_id.short());
    println!("image:        {}", info.image);
    println!("type:         {}", record.backup_type);
    println!("created:      {}", record.timestamp);
    println!("compression:  {}", record.compression_level);
    println!("size:         {}", record.size_human);
    println!("env vars:     {}", info.env.len());
    println!("mounts:       {}", info.mounts.len());
    println!("ports:        {}", info.bound_port_count());
    println!("files:");
    for file in &record.files {
        let digest = record.checksums.get(file).map_or("-", String::as_str);
        println!("  {file:<24} {digest}");
    }
    Ok(EXIT_SUCCESS)
}

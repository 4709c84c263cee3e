use crate::config::Config;

pub async fn cmd_episodes(config: &Config, folder: &str, force: bool) -> anyhow::Result<()> {
    let session = super::open_loaded(config, folder, force).await?;
    let records = session.records();

    if records.is_empty() {
        println!("No files in folder {folder}.");
        return Ok(());
    }

    println!("Files in {folder} ({} total)", records.len());
    println!("{:-<70}", "");

    for record in &records {
        let icon = if record.is_playable() {
            "▶"
        } else if record.is_video() {
            "○"
        } else {
            "•"
        };
        let size = record
            .size
            .map(super::format_size)
            .unwrap_or_else(|| "?".to_string());

        println!("{icon} {}", record.name());
        println!("  ID: {} | Size: {size}", record.id());
        if let Some(updated_at) = record.updated_at() {
            println!("  Link updated: {}", updated_at.format("%Y-%m-%d %H:%M"));
        }
    }

    if let Some(freshness) = session.freshness() {
        println!();
        println!(
            "Listed at {} ({}s ago)",
            freshness.fetched_at.format("%Y-%m-%d %H:%M:%S"),
            freshness.age.num_seconds()
        );
    }

    println!();
    println!("Legend: ▶ Playable | ○ Video without link | • Other file");

    Ok(())
}

use crate::config::Config;
use crate::domain::EpisodeId;
use crate::models::OperationResult;

pub async fn cmd_delete(
    config: &Config,
    folder: &str,
    ids: &[String],
    yes: bool,
    json: bool,
) -> anyhow::Result<()> {
    let session = super::open_loaded(config, folder, false).await?;

    for id in ids {
        let id = EpisodeId::from(id.as_str());
        if !session.select(&id)? {
            println!("⚠ Skipping unknown file ID: {id}");
        }
    }

    let selected = session.selected_ids();
    if selected.is_empty() {
        println!("Nothing to delete.");
        return Ok(());
    }

    if !yes {
        println!("Delete {} file(s) from {folder}?", selected.len());
        for record in session
            .records()
            .iter()
            .filter(|r| selected.contains(r.id()))
        {
            println!("  {}", record.name());
        }

        if !super::confirm("This cannot be undone. Continue?")? {
            println!("Cancelled.");
            return Ok(());
        }
    }

    let result = session.delete_selected().await;
    if json {
        let rendered = match result {
            Ok(summary) => match summary.message.clone() {
                Some(message) => OperationResult::success(summary).with_message(message),
                None => OperationResult::success(summary),
            },
            Err(e) => OperationResult::error(e.to_string()),
        };
        return super::print_json(&rendered);
    }

    let summary = result?;
    if summary.is_complete() {
        println!("✓ Deleted {} file(s)", summary.deleted_count);
    } else {
        println!(
            "⚠ Deleted {} of {} file(s)",
            summary.deleted_count, summary.requested
        );
        for id in &summary.not_deleted {
            println!("  Not deleted: {id}");
        }
        if let Some(message) = &summary.message {
            println!("  Upstream said: {message}");
        }
    }

    Ok(())
}

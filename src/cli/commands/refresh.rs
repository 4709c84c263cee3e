use crate::config::Config;
use crate::domain::EpisodeId;
use crate::library::{BatchStatus, LibraryError, RefreshResult};
use crate::models::OperationResult;

pub async fn cmd_refresh_links(
    config: &Config,
    folder: &str,
    ids: Vec<String>,
    yes: bool,
    json: bool,
) -> anyhow::Result<()> {
    let session = super::open_loaded(config, folder, false).await?;

    let targets = (!ids.is_empty()).then(|| ids.into_iter().map(EpisodeId::from).collect());
    let targets = session.request_batch_refresh(targets)?;

    let policy = config.batch.policy();
    let calls = policy.chunk_count(targets.len());
    let estimate = policy.inter_chunk_delay.as_secs() * (calls.saturating_sub(1) as u64);
    eprintln!(
        "Refresh {} link(s) in {calls} call(s) of up to {}? This takes about {estimate}s.",
        targets.len(),
        policy.chunk_size
    );

    if !yes && !super::confirm("Continue?")? {
        session.cancel_batch_refresh();
        eprintln!("Cancelled.");
        return Ok(());
    }

    let handle = session.spawn_confirmed_batch_refresh()?;

    if let Some(mut progress) = session.watch_batch() {
        while progress.changed().await.is_ok() {
            let current = *progress.borrow_and_update();
            if !json {
                println!("  {}/{} refreshed", current.completed, current.total);
            }
            if current.status.is_terminal() {
                break;
            }
        }
    }

    let outcome = handle.await?;
    if json {
        let succeeded = outcome.success_count;
        let failed = outcome.failure_count;
        let rendered = OperationResult {
            success: failed == 0,
            message: (failed > 0)
                .then(|| LibraryError::PartialBatchFailure { succeeded, failed }.to_string()),
            data: Some(outcome),
        };
        return super::print_json(&rendered);
    }

    for item in &outcome.items {
        if let RefreshResult::Failed { message } = &item.result {
            println!("  ✗ {}: {message}", item.id);
        }
    }

    match outcome.status {
        BatchStatus::Aborted => println!(
            "⚠ Aborted: {} refreshed, {} failed, {} skipped",
            outcome.success_count, outcome.failure_count, outcome.skipped_count
        ),
        _ if outcome.failure_count == 0 => {
            println!("✓ Refreshed {} link(s)", outcome.success_count);
        }
        _ => println!(
            "⚠ Refreshed {} of {} link(s)",
            outcome.success_count,
            outcome.total()
        ),
    }

    Ok(())
}

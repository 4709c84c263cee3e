mod delete;
mod episodes;
mod refresh;
mod rename;

pub use delete::cmd_delete;
pub use episodes::cmd_episodes;
pub use refresh::cmd_refresh_links;
pub use rename::cmd_rename;

use serde::Serialize;
use std::io::Write;

use crate::config::Config;
use crate::domain::FolderId;
use crate::library::{FolderSession, LibraryContext, LoadSource};
use crate::models::OperationResult;

/// Opens a session on `folder` and loads its list.
async fn open_loaded(config: &Config, folder: &str, force: bool) -> anyhow::Result<FolderSession> {
    let ctx = LibraryContext::from_config(config)?;
    if ctx.credentials().is_none() {
        anyhow::bail!(
            "Cloud drive credentials are not configured. Set [credentials] in pikarr.toml \
             or PIKARR_USERNAME / PIKARR_PASSWORD."
        );
    }

    let session = ctx.open(FolderId::from(folder));
    let outcome = session.load(force).await?;
    if outcome.source == LoadSource::StaleCache {
        println!("⚠ Upstream is throttling requests, showing the last known list");
    }
    Ok(session)
}

/// Reads a y/N answer from stdin.
fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

fn print_json<T: Serialize>(result: &OperationResult<T>) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(result)?);
    Ok(())
}

fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

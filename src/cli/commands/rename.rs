use crate::config::Config;
use crate::domain::EpisodeId;
use crate::library::LibraryError;
use crate::models::OperationResult;

pub async fn cmd_rename(
    config: &Config,
    folder: &str,
    id: &str,
    new_name: &str,
    json: bool,
) -> anyhow::Result<()> {
    let session = super::open_loaded(config, folder, false).await?;
    let id = EpisodeId::from(id);

    let result = session.rename(&id, new_name).await;
    if json {
        return super::print_json(&OperationResult::from(result));
    }

    match result {
        Ok(stored) => println!("✓ Renamed {id} → {stored}"),
        Err(LibraryError::NotFound(_)) => {
            println!("File with ID {id} not found in folder {folder}.");
            println!("Use 'pikarr episodes {folder}' to see file IDs.");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(())
}

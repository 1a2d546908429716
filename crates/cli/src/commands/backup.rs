use anyhow::Result;
use dualstore_service::Persistence;

pub(crate) async fn run(persistence: &Persistence) -> Result<()> {
    let record = persistence.backup_now().await?;
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}

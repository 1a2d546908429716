use anyhow::Result;
use dualstore_service::Persistence;

pub(crate) fn run(persistence: &Persistence) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&persistence.status())?);
    Ok(())
}

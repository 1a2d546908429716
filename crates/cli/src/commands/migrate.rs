//! On-demand migration commands.

use anyhow::Result;
use dualstore_core::BackendName;
use dualstore_service::Persistence;

/// Migrate `backend`, or every usable backend when `None`.
pub(crate) async fn run(persistence: &Persistence, backend: Option<BackendName>) -> Result<()> {
    let targets = match backend {
        Some(name) => vec![name],
        None => BackendName::ALL
            .into_iter()
            .filter(|&name| persistence.handle(name).is_usable())
            .collect(),
    };
    for name in targets {
        let applied = persistence.migrate(name).await?;
        println!("{name}: {applied} migration(s) applied");
    }
    Ok(())
}

pub(crate) async fn clear(persistence: &Persistence, backend: BackendName) -> Result<()> {
    let watermark = persistence.clear_migration_failure(backend).await?;
    println!("{backend}: failures through attempt {watermark} cleared");
    Ok(())
}

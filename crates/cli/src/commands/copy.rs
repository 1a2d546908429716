//! Manual reconciliation between backends.
//!
//! Re-creates every record of one collection from the source backend on the
//! target. Target ids are assigned by the target, so running it twice
//! duplicates records.

use anyhow::{bail, Result};
use dualstore_core::{BackendName, ScanQuery, MAX_QUERY_LIMIT};
use dualstore_service::Persistence;
use dualstore_storage::Operation;

pub(crate) async fn run(
    persistence: &Persistence,
    from: BackendName,
    to: BackendName,
    collection: &str,
) -> Result<()> {
    if from == to {
        bail!("source and target must differ");
    }
    let source = persistence.handle(from);
    let target = persistence.handle(to);
    for handle in [source, target] {
        if !handle.is_usable() {
            bail!("{} backend is {}", handle.name(), handle.state());
        }
    }

    println!("Copying {collection} from {from} to {to}...");
    let mut offset: usize = 0;
    let mut copied: usize = 0;
    let mut failed: usize = 0;

    loop {
        let query = ScanQuery::new(collection).page(offset, MAX_QUERY_LIMIT);
        let page = source.execute(Operation::Scan(query)).await?.into_page()?;
        if page.items.is_empty() {
            break;
        }
        for record in &page.items {
            let insert =
                Operation::Insert { collection: collection.to_owned(), payload: record.payload.clone() };
            match target.execute(insert).await {
                Ok(_) => copied += 1,
                Err(err) => {
                    tracing::warn!(id = %record.id, "Failed to copy record: {err}");
                    failed += 1;
                },
            }
        }
        let fetched = page.items.len();
        offset += fetched;
        if fetched < MAX_QUERY_LIMIT {
            break;
        }
    }

    println!("  {collection}: {copied} copied, {failed} failed (total {offset})");
    Ok(())
}

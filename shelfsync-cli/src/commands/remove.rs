//! Remove command implementation

use super::Workspace;
use anyhow::{bail, Result};
use shelfsync_core::BulkOutcome;

/// Remove books from the library
pub async fn remove(workspace: &Workspace, hashes: &[String]) -> Result<()> {
    let targets = workspace.resolve(hashes)?;
    let selection = workspace.engine.selection();

    selection.deselect_all();
    selection.select_all(&targets);
    let report = selection.bulk_delete().await;
    selection.deselect_all();

    let mut kept = 0;
    for (hash, outcome) in &report {
        println!("{}  {}", hash.short(), outcome);
        if *outcome != BulkOutcome::Removed {
            kept += 1;
        }
    }

    if kept > 0 {
        bail!("{} book(s) could not be removed", kept);
    }
    Ok(())
}

//! Upload and download command implementation

use super::Workspace;
use anyhow::{bail, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use shelfsync_core::{BookHash, BulkOutcome, Direction, TransferEventKind};
use std::collections::HashMap;

/// Transfer the selected books in one direction and wait for them
pub async fn transfer(
    workspace: &Workspace,
    direction: Direction,
    hashes: &[String],
    all: bool,
    force: bool,
) -> Result<()> {
    let engine = &workspace.engine;
    let selection = engine.selection();

    let targets: Vec<BookHash> = if all {
        engine
            .shelf()
            .list_flat()
            .into_iter()
            .map(|record| record.hash)
            .collect()
    } else {
        workspace.resolve(hashes)?
    };
    if targets.is_empty() {
        bail!("Nothing to {}: give book hashes or --all", direction);
    }

    selection.deselect_all();
    selection.select_all(&targets);

    let batch = match direction {
        Direction::Upload => selection.bulk_upload(force),
        Direction::Download => selection.bulk_download(force).await,
    };
    selection.deselect_all();

    // One bar per admitted book
    let multi_progress = MultiProgress::new();
    let style = ProgressStyle::default_bar()
        .template("{prefix:.bold} [{bar:30.cyan/blue}] {pos:>3}% {msg}")?
        .progress_chars("##-");
    let mut bars: HashMap<BookHash, ProgressBar> = HashMap::new();
    for (hash, outcome) in batch.report() {
        if *outcome == BulkOutcome::Queued {
            let bar = multi_progress.add(ProgressBar::new(100));
            bar.set_style(style.clone());
            bar.set_prefix(hash.short().to_string());
            bar.set_message(title(workspace, hash));
            bars.insert(hash.clone(), bar);
        }
    }

    let mut events = batch.events();
    let renderer = {
        let bars = bars.clone();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                if let (Some(bar), TransferEventKind::Progress(percent)) =
                    (bars.get(&event.hash), &event.kind)
                {
                    bar.set_position(u64::from(*percent));
                }
            }
        })
    };

    let results = batch.completion().await;
    renderer.abort();

    let mut failed = 0;
    for (hash, outcome) in &results {
        if let Some(bar) = bars.get(hash) {
            bar.finish_with_message(format!("{} ({})", title(workspace, hash), outcome));
        } else {
            println!("{}  {}", hash.short(), outcome);
        }
        if outcome.is_failure() {
            failed += 1;
        }
    }

    let succeeded = results
        .iter()
        .filter(|(_, outcome)| matches!(outcome, BulkOutcome::Finished(o) if o.is_success()))
        .count();
    println!(
        "{} {} of {} book(s)",
        match direction {
            Direction::Upload => "Uploaded",
            Direction::Download => "Downloaded",
        },
        succeeded,
        results.len()
    );

    if failed > 0 {
        bail!("{} {}(s) failed", failed, direction);
    }
    Ok(())
}

fn title(workspace: &Workspace, hash: &BookHash) -> String {
    workspace
        .engine
        .shelf()
        .get(hash)
        .map(|record| record.display_title().to_string())
        .unwrap_or_default()
}

//! List command implementation

use super::{status, Workspace};
use anyhow::Result;
use shelfsync_core::{BookRecord, ShelfFilter, ShelfItem};

/// List the books in the library
pub fn list(workspace: &Workspace, grouped: bool, search: Option<&str>, json: bool) -> Result<()> {
    let shelf = workspace.engine.shelf();
    let filter = search.map(ShelfFilter::query).unwrap_or_default();
    let count = shelf.count(&filter);

    if grouped {
        let items = shelf.search(&filter);
        if json {
            println!("{}", serde_json::to_string_pretty(&items)?);
            return Ok(());
        }
        for item in &items {
            match item {
                ShelfItem::Book(record) => println!("{}", line(record)),
                ShelfItem::Series(group) => {
                    println!("{} ({} books)", group.name, group.books.len());
                    for record in &group.books {
                        println!("  {}", line(record));
                    }
                }
            }
        }
    } else {
        let records: Vec<BookRecord> = shelf
            .list_flat()
            .into_iter()
            .filter(|record| filter.matches(record))
            .collect();
        if json {
            println!("{}", serde_json::to_string_pretty(&records)?);
            return Ok(());
        }
        for record in &records {
            println!("{}", line(record));
        }
    }

    println!("{} book(s)", count);
    Ok(())
}

fn line(record: &BookRecord) -> String {
    let mut line = format!(
        "{}  {:<10}  {}",
        record.hash.short(),
        status(record),
        record.display_title()
    );
    if let Some(author) = &record.author {
        line.push_str(&format!(" by {}", author));
    }
    if let Some(progress) = &record.progress {
        line.push_str(&format!(" ({:.0}% read)", progress.percentage * 100.0));
    }
    line
}

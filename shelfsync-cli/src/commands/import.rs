//! Import command implementation

use super::Workspace;
use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

/// Import ebook files into the library
pub async fn import(workspace: &Workspace, files: &[PathBuf]) -> Result<()> {
    let mut error_count = 0;

    for file in files {
        match import_file(workspace, file).await {
            Ok(line) => println!("{}", line),
            Err(e) => {
                error_count += 1;
                tracing::error!("Failed to import {}: {:#}", file.display(), e);
            }
        }
    }

    println!(
        "Imported {} of {} files",
        files.len() - error_count,
        files.len()
    );

    if error_count > 0 {
        bail!("{} file(s) could not be imported", error_count);
    }
    Ok(())
}

async fn import_file(workspace: &Workspace, path: &Path) -> Result<String> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read input file: {}", path.display()))?;

    let hash = workspace
        .engine
        .import(content)
        .await
        .with_context(|| format!("Failed to import {}", path.display()))?;

    let title = workspace
        .engine
        .shelf()
        .get(&hash)
        .map(|record| record.display_title().to_string())
        .unwrap_or_default();

    Ok(format!("{}  {}", hash.short(), title))
}

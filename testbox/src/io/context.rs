//! Packaging of the SUT build context into a tar archive.

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Directories never shipped to the builder.
const SKIPPED_DIRS: [&str; 2] = [".git", "target"];

/// Archive `root` (recursively) for an image build.
///
/// Paths inside the archive are relative to `root`. `.git` and `target`
/// at the top level are left out.
pub fn pack_build_context(root: &Path) -> Result<Vec<u8>> {
    if !root.is_dir() {
        bail!("build context {} is not a directory", root.display());
    }
    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let mut entries = std::fs::read_dir(root)
        .with_context(|| format!("read build context {}", root.display()))?
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read build context {}", root.display()))?;
    entries.sort_by_key(|entry| entry.file_name());

    for entry in entries {
        let name = entry.file_name();
        let path = entry.path();
        if path.is_dir() {
            if SKIPPED_DIRS.iter().any(|skip| name == *skip) {
                debug!(dir = %path.display(), "skipping directory in build context");
                continue;
            }
            builder
                .append_dir_all(&name, &path)
                .with_context(|| format!("archive {}", path.display()))?;
        } else {
            builder
                .append_path_with_name(&path, &name)
                .with_context(|| format!("archive {}", path.display()))?;
        }
    }

    let archive = builder.into_inner().context("finish build context archive")?;
    debug!(root = %root.display(), bytes = archive.len(), "build context packed");
    Ok(archive)
}

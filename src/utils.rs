//! Utility functions for string manipulation and file system checks.
//!
//! - Slugification for human-readable storage keys
//! - Writable-directory probe used by the filesystem object store

use std::io;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Convert a value to a key-friendly slug.
///
/// Lowercases the text, removes special characters, and replaces spaces,
/// slashes and dots with hyphens so identity values like file paths stay
/// legible inside storage keys.
///
/// # Examples
///
/// ```ignore
/// assert_eq!(slugify("Hello World"), "hello-world");
/// assert_eq!(slugify("/pub/time.series/pr.txt"), "pub-time-series-pr-txt");
/// ```
pub fn slugify(value: &str) -> String {
    let mut slug = String::with_capacity(value.len());
    let mut last_hyphen = true; // suppress leading hyphens
    for c in value.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
            last_hyphen = false;
        } else if matches!(c, ' ' | '/' | '.' | '-' | '_') && !last_hyphen {
            slug.push('-');
            last_hyphen = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

/// Ensure a directory exists and is writable.
///
/// Creates the directory if missing, then performs a write test by creating
/// and immediately deleting a probe file. Used as the start-of-run health
/// check for the filesystem object store.
#[instrument(level = "info", skip_all, fields(path = %path.as_ref().display()))]
pub async fn ensure_writable_dir(path: impl AsRef<Path>) -> io::Result<()> {
    let path = path.as_ref();
    fs::create_dir_all(path).await?;
    let probe_path = path.join("..__probe_write__");
    fs::write(&probe_path, b"").await?;
    let _ = fs::remove_file(&probe_path).await;
    info!("Directory is writable");
    Ok(())
}

//! JS library loading for the `include` host callback.
//!
//! At initialization the library directory is scanned once for `*.js`
//! files; each readable file below the size cap lands in a process-wide
//! `filename → source` map. The map is immutable afterwards, so lookups
//! from running contracts need no lock.
//!
//! It intentionally has **no** knowledge of the script engine so it can be
//! unit-tested with plain fixture files.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

use tracing::{error, info, warn};

use crate::Result;

/// Per-file cap; anything larger is skipped with an error log.
pub const MAX_LIBRARY_BYTES: u64 = 10 * 1024 * 1024;

static LIBRARY_SOURCES: OnceLock<HashMap<String, String>> = OnceLock::new();

/// Scan `dir` and populate the library map. Idempotent: the first
/// successful call wins, later calls are ignored with a warning.
#[tracing::instrument(skip_all, fields(dir = %dir.display()))]
pub fn load_library_dir(dir: &Path) -> Result<usize> {
    if let Some(existing) = LIBRARY_SOURCES.get() {
        warn!("library directory already loaded, ignoring");
        return Ok(existing.len());
    }

    let mut sources = HashMap::new();
    if dir.is_dir() {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("js") {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            match entry.metadata() {
                Ok(meta) if meta.len() > MAX_LIBRARY_BYTES => {
                    error!("library file too large, skipping: {}", path.display());
                    continue;
                }
                Err(err) => {
                    error!("cannot stat library file {}: {err}", path.display());
                    continue;
                }
                Ok(_) => {}
            }
            match fs::read_to_string(&path) {
                Ok(source) => {
                    sources.insert(name.to_string(), source);
                }
                Err(err) => {
                    error!("cannot read library file {}: {err}", path.display());
                }
            }
        }
    } else {
        info!("no library directory at {}", dir.display());
    }

    let count = sources.len();
    // A racing initializer may have won; either way the map is now set.
    let _ = LIBRARY_SOURCES.set(sources);
    info!("loaded {count} contract libraries");
    Ok(count)
}

/// Look up a library source by file name.
pub fn library_source(name: &str) -> Option<&'static str> {
    LIBRARY_SOURCES
        .get()
        .and_then(|sources| sources.get(name))
        .map(String::as_str)
}

// ── tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // One test exercises the whole lifecycle because the map is
    // process-wide and sealed after the first load.
    #[test]
    fn loads_js_files_once_and_ignores_the_rest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut lib = fs::File::create(dir.path().join("math_ext.js")).unwrap();
        writeln!(lib, "function double(x) {{ return x * 2; }}").unwrap();
        fs::File::create(dir.path().join("notes.txt")).unwrap();

        let count = load_library_dir(dir.path()).expect("load");
        assert_eq!(count, 1);
        assert!(library_source("math_ext.js")
            .expect("library present")
            .contains("function double"));
        assert!(library_source("notes.txt").is_none());
        assert!(library_source("missing.js").is_none());

        // Second load is a no-op, whatever directory it points at.
        let other = tempfile::tempdir().expect("tempdir");
        fs::write(other.path().join("late.js"), "var late = 1;").unwrap();
        assert_eq!(load_library_dir(other.path()).expect("reload"), 1);
        assert!(library_source("late.js").is_none());
    }
}

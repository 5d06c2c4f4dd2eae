//! Startup Data Loading
//!
//! A node can be pre-populated from an external tabular source before it
//! starts serving. Loading is best effort: if the source cannot be read the
//! node logs a warning and starts empty.
//!
//! The bundled source is a tab-separated seed file:
//!
//! ```text
//! # comment lines and blank lines are skipped
//! user:1<TAB>Ada
//! user:2<TAB>Grace
//! ```
//!
//! Values are stored as JSON strings.

use anyhow::{Context, Result};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::storage::Store;

/// Somewhere initial `(key, value)` rows come from.
pub trait BootstrapSource {
    /// A human-readable name for log lines.
    fn describe(&self) -> String;

    /// Reads every row.
    fn load(&self) -> Result<Vec<(String, String)>>;
}

/// Tab-separated `key<TAB>value` file.
#[derive(Debug, Clone)]
pub struct SeedFile {
    path: PathBuf,
}

impl SeedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Parses seed file text. Lines without a tab are skipped.
    pub fn parse(text: &str) -> Vec<(String, String)> {
        let mut rows = Vec::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim_end_matches('\r');
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once('\t') {
                Some((key, value)) if !key.is_empty() => {
                    rows.push((key.to_string(), value.to_string()));
                }
                _ => warn!(line = number + 1, "Skipping malformed seed line"),
            }
        }
        rows
    }
}

impl BootstrapSource for SeedFile {
    fn describe(&self) -> String {
        format!("seed file {}", self.path.display())
    }

    fn load(&self) -> Result<Vec<(String, String)>> {
        let text = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        Ok(Self::parse(&text))
    }
}

/// Inserts every row from `source` into `store`.
///
/// Returns the number of rows loaded; zero if the source failed.
pub fn bootstrap(store: &Store, source: &dyn BootstrapSource) -> usize {
    let rows = match source.load() {
        Ok(rows) => rows,
        Err(e) => {
            warn!(source = %source.describe(), error = %e, "Bootstrap failed, starting empty");
            return 0;
        }
    };

    let count = rows.len();
    for (key, value) in rows {
        store.upsert(&key, Value::String(value));
    }
    info!(source = %source.describe(), records = count, "Bootstrap complete");
    count
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Failing;

    impl BootstrapSource for Failing {
        fn describe(&self) -> String {
            "failing".into()
        }

        fn load(&self) -> Result<Vec<(String, String)>> {
            anyhow::bail!("connection refused")
        }
    }

    #[test]
    fn test_parse_seed_text() {
        let rows = SeedFile::parse("# header\na\t1\n\nbroken\nb\tx\ty\r\n\tnokey\n");
        assert_eq!(
            rows,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "x\ty".to_string()),
            ]
        );
    }

    #[test]
    fn test_bootstrap_inserts_rows() {
        let path = std::env::temp_dir().join(format!("gossipkv-seed-{}.tsv", std::process::id()));
        std::fs::write(&path, "a\t1\nb\t2\n").unwrap();

        let store = Store::default();
        assert_eq!(bootstrap(&store, &SeedFile::new(&path)), 2);
        assert_eq!(store.record("a").unwrap().value, json!("1"));
        assert_eq!(store.len(), 2);

        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_failed_source_leaves_store_empty() {
        let store = Store::default();
        assert_eq!(bootstrap(&store, &Failing), 0);
        assert_eq!(bootstrap(&store, &SeedFile::new("/nonexistent/seed.tsv")), 0);
        assert!(store.is_empty());
    }
}

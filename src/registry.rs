use crate::util::write_json_atomic;
use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// File names of result files that have been settled. Membership is the only guard against
/// settling the same file twice, so it is written last in a reconciliation.
#[derive(Debug)]
pub struct ProcessedRaceRegistry {
    path: PathBuf,
    files: BTreeSet<String>,
}

impl ProcessedRaceRegistry {
    /// A missing or unreadable registry loads as empty.
    pub fn load<P: AsRef<Path>>(path: P) -> ProcessedRaceRegistry {
        let path = path.as_ref().to_path_buf();
        let files = match read(&path) {
            Ok(files) => files,
            Err(err) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %err, "unreadable registry, starting empty");
                }
                BTreeSet::new()
            }
        };
        debug!(path = %path.display(), len = files.len(), "loaded registry");
        ProcessedRaceRegistry { path, files }
    }

    pub fn contains(&self, file_name: &str) -> bool {
        self.files.contains(file_name)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Adds `file_name` and persists. On a failed write the in-memory set is left unchanged.
    pub fn record(&mut self, file_name: &str) -> Result<()> {
        if self.files.contains(file_name) {
            return Ok(());
        }
        let mut next = self.files.clone();
        next.insert(file_name.to_string());
        write_json_atomic(&self.path, &next)
            .with_context(|| format!("unable to write {}", self.path.display()))?;
        self.files = next;
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        write_json_atomic(&self.path, &BTreeSet::<String>::new())?;
        self.files.clear();
        Ok(())
    }
}

fn read(path: &Path) -> Result<BTreeSet<String>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

use std::collections::BTreeSet;
use std::io::Result;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

pub type Entries = BTreeSet<Entry>;

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Entry {
    pub file_name: String,
    pub path: PathBuf,
    pub len: u64,
    pub modified: SystemTime,
}

impl Entry {
    /// Age at `now`; a modification time in the future counts as zero.
    pub fn age(&self, now: SystemTime) -> std::time::Duration {
        now.duration_since(self.modified).unwrap_or_default()
    }
}

/// Lists the regular files directly inside `path`. A missing directory is an empty listing.
pub fn read_dir(path: &Path) -> Result<Entries> {
    let mut set = BTreeSet::new();
    if !path.exists() {
        return Ok(set);
    }
    for entry in WalkDir::new(path).min_depth(1).max_depth(1) {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if metadata.is_file() {
            set.insert(Entry {
                file_name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path().to_path_buf(),
                len: metadata.len(),
                modified: metadata.modified()?,
            });
        }
    }
    Ok(set)
}

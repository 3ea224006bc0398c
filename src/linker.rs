use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::layout::list_backups;

/// Picks the existing backup an incremental transfer should hard-link
/// against.
///
/// Backup mtimes equal their snapshots' creation times, so candidates are
/// ordered by mtime alone. Listings are cached per filesystem directory until
/// `invalidate` is called for it.
#[derive(Debug, Default)]
pub struct IncrementalLinker {
    cache: HashMap<PathBuf, Vec<(String, i64)>>,
}

impl IncrementalLinker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The nearest newer backup if there is one, else the nearest older one.
    /// A backup stamped exactly `ctime` is never chosen.
    pub fn find_reference(&mut self, fs_dir: &Path, ctime: i64) -> Result<Option<PathBuf>> {
        let candidates = self.candidates(fs_dir)?;
        let mut older: Option<&(String, i64)> = None;
        let mut newer: Option<&(String, i64)> = None;
        for candidate in candidates {
            let mtime = candidate.1;
            if mtime < ctime && older.map_or(true, |o| mtime > o.1) {
                older = Some(candidate);
            } else if mtime > ctime && newer.map_or(true, |n| mtime < n.1) {
                newer = Some(candidate);
            }
        }
        let chosen = newer.or(older).map(|(label, _)| fs_dir.join(label));
        if let Some(path) = &chosen {
            tracing::debug!(reference = %path.display(), ctime, "incremental reference");
        }
        Ok(chosen)
    }

    pub fn invalidate(&mut self, fs_dir: &Path) {
        self.cache.remove(fs_dir);
    }

    pub fn invalidate_all(&mut self) {
        self.cache.clear();
    }

    fn candidates(&mut self, fs_dir: &Path) -> Result<&[(String, i64)]> {
        if !self.cache.contains_key(fs_dir) {
            let records = list_backups(fs_dir)?
                .into_iter()
                .map(|r| (r.label, r.mtime))
                .collect();
            self.cache.insert(fs_dir.to_path_buf(), records);
        }
        Ok(self.cache.get(fs_dir).map(Vec::as_slice).unwrap_or(&[]))
    }
}

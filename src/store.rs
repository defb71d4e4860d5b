use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const RAW_EXT: &str = "txt";

/// Unprocessed page body for one ad, keyed by its finnkode.
#[derive(Debug, Clone)]
pub struct RawAd {
    pub code: u64,
    pub body: String,
}

/// Directory of raw ad pages, one `<code>.txt` file per ad.
///
/// Files are written once and never touched again, so the directory doubles
/// as the record of which ads have already been fetched.
pub struct RawStore {
    dir: PathBuf,
}

impl RawStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create raw store {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, code: u64) -> PathBuf {
        self.dir.join(format!("{}.{}", code, RAW_EXT))
    }

    // ── Fetching side ──

    /// Identifiers already on disk.
    pub fn saved_codes(&self) -> Result<HashSet<u64>> {
        let mut codes = HashSet::new();
        for path in self.list_files()? {
            if let Some(code) = code_from_path(&path) {
                codes.insert(code);
            }
        }
        Ok(codes)
    }

    /// Persist a page body. Written to a temp file first and renamed, so an
    /// interrupted crawl never leaves a truncated `<code>.txt` behind.
    pub fn save(&self, code: u64, body: &str) -> Result<()> {
        let dest = self.path_for(code);
        let tmp = self.dir.join(format!(".{}.{}.tmp", code, RAW_EXT));
        fs::write(&tmp, body).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &dest)
            .with_context(|| format!("Failed to move {} into place", dest.display()))?;
        Ok(())
    }

    // ── Extraction side ──

    /// Read every stored page, ordered by identifier.
    pub fn read_all(&self) -> Result<Vec<RawAd>> {
        let mut ads = Vec::new();
        for path in self.list_files()? {
            let Some(code) = code_from_path(&path) else {
                continue;
            };
            let bytes =
                fs::read(&path).with_context(|| format!("Failed to read {}", path.display()))?;
            ads.push(RawAd {
                code,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        ads.sort_by_key(|a| a.code);
        Ok(ads)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.saved_codes()?.len())
    }

    fn list_files(&self) -> Result<Vec<PathBuf>> {
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                files.push(entry.path());
            }
        }
        Ok(files)
    }
}

/// `123456.txt` -> 123456. Anything else (temp files, stray notes) is ignored.
fn code_from_path(path: &Path) -> Option<u64> {
    if path.extension()? != RAW_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saved_page_is_listed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RawStore::open(tmp.path().join("ads")).unwrap();
        assert!(store.saved_codes().unwrap().is_empty());
        store.save(42, "<html></html>").unwrap();
        assert!(store.path_for(42).is_file());
        assert_eq!(store.saved_codes().unwrap(), HashSet::from([42]));
    }

    #[test]
    fn ignores_foreign_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RawStore::open(tmp.path()).unwrap();
        store.save(7, "a").unwrap();
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();
        fs::write(tmp.path().join("8.html"), "x").unwrap();
        fs::write(tmp.path().join(".9.txt.tmp"), "x").unwrap();
        fs::create_dir(tmp.path().join("10.txt")).unwrap();

        assert_eq!(store.saved_codes().unwrap(), HashSet::from([7]));
        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].code, 7);
        assert_eq!(all[0].body, "a");
    }

    #[test]
    fn read_all_sorted_by_code() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RawStore::open(tmp.path()).unwrap();
        for code in [300, 100, 200] {
            store.save(code, &code.to_string()).unwrap();
        }
        let codes: Vec<u64> = store.read_all().unwrap().iter().map(|a| a.code).collect();
        assert_eq!(codes, vec![100, 200, 300]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let tmp = tempfile::tempdir().unwrap();
        let store = RawStore::open(tmp.path()).unwrap();
        store.save(5, "body").unwrap();
        let names: Vec<String> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["5.txt".to_string()]);
    }
}

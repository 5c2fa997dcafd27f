//! Pre-dex cache
//!
//! Dexing a library jar is expensive and its output depends only on the
//! jar's bytes, so dexed libraries are cached in a flat directory keyed by
//! BLAKE3 content hash and shared across builds. Entries are append-only:
//! nothing here evicts them, housekeeping is an external concern.
//!
//! Concurrency discipline: the whole check/produce/rename sequence for a
//! given cache directory runs under one process-wide mutex. Coarse, and it
//! serializes all pre-dex work for that directory, but two builds can
//! never race to write the same entry.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use anyhow::{Context, Result};
use tracing::debug;

use crate::reporter::Reporter;

/// A store of previously dexed library artifacts.
///
/// `compute` receives a staging directory and must leave a `classes.dex`
/// in it; implementations own keying, hit detection, and publication.
pub trait PredexCache: Send + Sync {
    /// Return the dexed artifact for `input`, computing and caching it on
    /// a miss. Never fails the build: any error (fingerprinting, dexing,
    /// publication) falls back to returning `input` itself so the final
    /// full-classpath dex run picks the library up un-dexed.
    fn get_or_compute(
        &self,
        input: &Path,
        reporter: &dyn Reporter,
        compute: &mut dyn FnMut(&Path) -> Result<()>,
    ) -> PathBuf;
}

/// The filesystem-backed cache used by real builds.
#[derive(Debug)]
pub struct DirPredexCache {
    dir: PathBuf,
}

impl DirPredexCache {
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, input: &Path) -> Result<PathBuf> {
        let key = content_key(input)?;
        Ok(self.dir.join(format!("lib-{}.dex", &key[..16])))
    }
}

impl PredexCache for DirPredexCache {
    fn get_or_compute(
        &self,
        input: &Path,
        reporter: &dyn Reporter,
        compute: &mut dyn FnMut(&Path) -> Result<()>,
    ) -> PathBuf {
        let entry = match self.entry_path(input) {
            Ok(entry) => entry,
            Err(e) => {
                reporter.warn(&format!(
                    "could not fingerprint {}: {e}; passing it through un-dexed",
                    input.display()
                ));
                return input.to_path_buf();
            }
        };

        let lock = dir_lock(&self.dir);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if entry.is_file() {
            reporter.info(&format!(
                "using pre-dexed {} <- {}",
                entry.file_name().map(|n| n.to_string_lossy()).unwrap_or_default(),
                input.display()
            ));
            return entry;
        }

        // Stage inside the cache directory so the final rename stays on
        // one filesystem and is atomic.
        let staging = match tempfile::Builder::new()
            .prefix("predex-")
            .tempdir_in(&self.dir)
        {
            Ok(staging) => staging,
            Err(e) => {
                reporter.warn(&format!(
                    "could not stage pre-dex output for {}: {e}; passing it through un-dexed",
                    input.display()
                ));
                return input.to_path_buf();
            }
        };

        match compute(staging.path()) {
            Ok(()) => {
                let produced = staging.path().join("classes.dex");
                if produced.is_file() && std::fs::rename(&produced, &entry).is_ok() {
                    debug!(entry = %entry.display(), "cached pre-dexed library");
                    entry
                } else {
                    reporter.warn(&format!(
                        "pre-dexing {} produced no dex output; passing it through un-dexed",
                        input.display()
                    ));
                    input.to_path_buf()
                }
            }
            Err(e) => {
                reporter.warn(&format!(
                    "pre-dexing {} failed ({e}); passing it through un-dexed",
                    input.display()
                ));
                input.to_path_buf()
            }
        }
    }
}

/// BLAKE3 hash of a file, streamed in chunks.
fn content_key(path: &Path) -> Result<String> {
    let mut file =
        File::open(path).with_context(|| format!("open {} for hashing", path.display()))?;
    let mut hasher = blake3::Hasher::new();
    let mut buffer = [0u8; 65536];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize().as_bytes()))
}

/// One mutex per cache directory, process-wide.
fn dir_lock(dir: &Path) -> Arc<Mutex<()>> {
    static LOCKS: OnceLock<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>> = OnceLock::new();
    let registry = LOCKS.get_or_init(|| Mutex::new(HashMap::new()));
    let mut map = registry.lock().unwrap_or_else(PoisonError::into_inner);
    map.entry(dir.to_path_buf()).or_default().clone()
}

//! Per-build directory layout.
//!
//! Every build owns a scratch tree under one build directory; stages
//! communicate through well-known locations inside it. The dex cache
//! directory is the exception: it is shared across builds and lives
//! wherever the caller points it.

use std::io;
use std::path::{Path, PathBuf};

/// Resolved filesystem layout for one build.
#[derive(Debug, Clone)]
pub struct BuildPaths {
    project_root: PathBuf,
    build_dir: PathBuf,
    dex_cache_dir: PathBuf,
}

impl BuildPaths {
    pub fn new(
        project_root: impl Into<PathBuf>,
        build_dir: impl Into<PathBuf>,
        dex_cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            project_root: project_root.into(),
            build_dir: build_dir.into(),
            dex_cache_dir: dex_cache_dir.into(),
        }
    }

    /// Create every per-build directory. The dex cache is created lazily by
    /// the cache itself since it may live on a shared volume.
    pub fn prepare(&self) -> io::Result<()> {
        for dir in [
            self.build_dir.clone(),
            self.classes_dir(),
            self.tmp_dir(),
            self.gen_dir(),
            self.res_dir(),
            self.assets_dir(),
            self.native_libs_dir(),
            self.archive_libs_dir(),
            self.deploy_dir(),
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    /// Root of the input project (descriptor, sources, project assets).
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    pub fn build_dir(&self) -> &Path {
        &self.build_dir
    }

    /// Compiled `.class` files, as produced by the block compiler and the
    /// compile-sources stage.
    pub fn classes_dir(&self) -> PathBuf {
        self.build_dir.join("classes")
    }

    /// Scratch space; the dexer also drops its `classes*.dex` output here.
    pub fn tmp_dir(&self) -> PathBuf {
        self.build_dir.join("tmp")
    }

    /// Generated sources (`R.java` and friends).
    pub fn gen_dir(&self) -> PathBuf {
        self.build_dir.join("gen")
    }

    /// Merged Android resource tree.
    pub fn res_dir(&self) -> PathBuf {
        self.build_dir.join("res")
    }

    /// Merged asset tree.
    pub fn assets_dir(&self) -> PathBuf {
        self.build_dir.join("assets")
    }

    /// Native libraries, laid out as `lib/<abi>/<name>.so`.
    pub fn native_libs_dir(&self) -> PathBuf {
        self.build_dir.join("lib")
    }

    /// Unpacked archive (.aar) libraries.
    pub fn archive_libs_dir(&self) -> PathBuf {
        self.build_dir.join("aars")
    }

    /// Final artifacts land here.
    pub fn deploy_dir(&self) -> PathBuf {
        self.build_dir.join("deploy")
    }

    /// The generated `AndroidManifest.xml`.
    pub fn manifest_path(&self) -> PathBuf {
        self.build_dir.join("AndroidManifest.xml")
    }

    /// Shared pre-dex cache directory. May be used concurrently by other
    /// builds; see the predex module for the locking discipline.
    pub fn dex_cache_dir(&self) -> &Path {
        &self.dex_cache_dir
    }
}

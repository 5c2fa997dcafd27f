//! Shared per-build state.
//!
//! One [`BuildContext`] is created per build invocation, threaded through
//! every stage, and discarded when the pipeline finishes. Stages read the
//! descriptor/paths/resources and accumulate their products (dex files,
//! resource package, the evolving app artifact) here.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::maindex;
use crate::paths::BuildPaths;
use crate::project::ProjectDescriptor;
use crate::reporter::Reporter;
use crate::resources::Resources;
use crate::task::PackageKind;

/// Name of the runtime jar inside an extension's classpath directory.
pub const EXTENSION_RUNTIME_JAR: &str = "runtime.jar";

/// Per-build configuration scalars.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub kind: PackageKind,
    /// Companion (interpreter) build variant.
    pub for_companion: bool,
    /// Heap ceiling for child JVM tools, in megabytes.
    pub child_process_ram_mb: u32,
    /// Explicit minimum-API override; wins over the project's declaration.
    pub min_api_override: Option<u32>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            kind: PackageKind::Apk,
            for_companion: false,
            child_process_ram_mb: 2048,
            min_api_override: None,
        }
    }
}

/// Everything the stages share during one build.
pub struct BuildContext {
    pub project: ProjectDescriptor,
    pub paths: BuildPaths,
    pub resources: Resources,
    pub config: BuildConfig,
    pub reporter: Arc<dyn Reporter>,

    /// Produced dex files, in registration order; consumed by packaging.
    pub dex_files: Vec<PathBuf>,
    /// Extra classpath entries contributed by unpacked archive libraries.
    pub classpath_extras: Vec<PathBuf>,
    /// Resource trees contributed by archive libraries, merged after the
    /// project's own.
    pub merge_res_dirs: Vec<PathBuf>,
    /// The compiled resource package (`resources.ap_`) once produced.
    pub resource_package: Option<PathBuf>,
    /// The app package as it moves through packaging/aligning/signing.
    pub artifact: Option<PathBuf>,

    ext_type_paths: HashMap<String, PathBuf>,
}

impl BuildContext {
    pub fn new(
        project: ProjectDescriptor,
        paths: BuildPaths,
        resources: Resources,
        config: BuildConfig,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            project,
            paths,
            resources,
            config,
            reporter,
            dex_files: Vec::new(),
            classpath_extras: Vec::new(),
            merge_res_dirs: Vec::new(),
            resource_package: None,
            artifact: None,
            ext_type_paths: HashMap::new(),
        }
    }

    pub fn kind(&self) -> PackageKind {
        self.config.kind
    }

    pub fn for_companion(&self) -> bool {
        self.config.for_companion
    }

    /// The minimum API this build actually targets; see the maindex module
    /// for the policy.
    pub fn effective_min_api(&self) -> u32 {
        maindex::effective_min_api(
            self.project.min_api,
            self.config.min_api_override,
            self.config.for_companion,
        )
    }

    /// Classpath directory for an extension component type, resolved once
    /// and memoized. Extensions live under `<project>/extensions/`, keyed
    /// by the full type name with the simple name as fallback.
    pub fn ext_comp_dir(&mut self, type_name: &str) -> Option<PathBuf> {
        if let Some(found) = self.ext_type_paths.get(type_name) {
            return Some(found.clone());
        }
        let extensions_root = self.paths.project_root().join("extensions");
        let simple = type_name.rsplit('.').next().unwrap_or(type_name);
        let candidates = [extensions_root.join(type_name), extensions_root.join(simple)];
        for candidate in candidates {
            if candidate.is_dir() {
                self.ext_type_paths
                    .insert(type_name.to_string(), candidate.clone());
                return Some(candidate);
            }
        }
        None
    }
}

impl fmt::Debug for BuildContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildContext")
            .field("project", &self.project.name)
            .field("kind", &self.config.kind)
            .field("for_companion", &self.config.for_companion)
            .field("dex_files", &self.dex_files.len())
            .finish_non_exhaustive()
    }
}

//! Shared unit-test fixtures.

use std::path::Path;
use std::sync::Arc;

use crate::context::{BuildConfig, BuildContext};
use crate::paths::BuildPaths;
use crate::project::{ComponentInfo, ProjectDescriptor};
use crate::reporter::{MemoryReporter, Reporter};
use crate::resources::Resources;

pub(crate) fn test_descriptor() -> ProjectDescriptor {
    ProjectDescriptor {
        name: "Paint".to_string(),
        package: "com.example.paint".to_string(),
        main_class: "com.example.paint.Screen1".to_string(),
        version_code: 1,
        version_name: "1.0".to_string(),
        min_api: None,
        permissions: Vec::new(),
        icon: None,
        assets: Vec::new(),
        extensions: Vec::new(),
        components: ComponentInfo::default(),
    }
}

/// A prepared context rooted in a scratch directory, reporting to the
/// given sink.
pub(crate) fn test_context_with(root: &Path, reporter: Arc<dyn Reporter>) -> BuildContext {
    let project_root = root.join("project");
    std::fs::create_dir_all(&project_root).unwrap();
    let paths = BuildPaths::new(&project_root, root.join("build"), root.join("dex-cache"));
    paths.prepare().unwrap();
    let resources = Resources::rooted(root.join("tools"));
    BuildContext::new(
        test_descriptor(),
        paths,
        resources,
        BuildConfig::default(),
        reporter,
    )
}

pub(crate) fn test_context(root: &Path) -> BuildContext {
    test_context_with(root, Arc::new(MemoryReporter::new()))
}

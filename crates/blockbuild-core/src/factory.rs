//! Build pipeline factory.
//!
//! A factory instance is immutably bound to one package kind and one dexer
//! generation at construction. The generation is an explicit injected
//! capability value, never ambient global state; [`BuildFactory::detect_dexer`]
//! is the canonical probe for callers that want the environment default.

use tracing::info;

use crate::resources::Resources;
use crate::task::{PackageKind, Pipeline, Task};
use crate::tasks::{
    AttachArchiveLibs, AttachAssets, AttachNativeLibs, BuildApk, CompileResources,
    CompileSources, CreateManifest, CreateOutputBundle, MergeResources, PackageResources,
    PrepareAppIcon, RunApkSigner, RunBundletool, RunD8, RunDx, RunZipAlign,
};

/// Which dexing toolchain generation a pipeline drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DexerGeneration {
    /// Legacy dexer (`dx`), concrete main-dex class lists.
    Dx,
    /// Modern dexer (`d8`), proguard-style main-dex rules.
    D8,
}

/// Produces the ordered stage list for one package kind.
#[derive(Debug)]
pub struct BuildFactory {
    kind: PackageKind,
    dexer: DexerGeneration,
}

impl BuildFactory {
    pub fn new(kind: PackageKind, dexer: DexerGeneration) -> Self {
        Self { kind, dexer }
    }

    /// Capability probe: the modern toolchain is used whenever its jar is
    /// actually present.
    pub fn detect_dexer(resources: &Resources) -> DexerGeneration {
        let d8_present = resources
            .d8_jar
            .as_deref()
            .is_some_and(std::path::Path::is_file);
        let generation = if d8_present {
            DexerGeneration::D8
        } else {
            DexerGeneration::Dx
        };
        info!(?generation, "dexer toolchain selected");
        generation
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    pub fn dexer(&self) -> DexerGeneration {
        self.dexer
    }

    /// Assemble the full stage sequence for this factory's package kind.
    pub fn build_pipeline(&self) -> Pipeline {
        let mut tasks: Vec<Box<dyn Task>> = Vec::new();
        self.prepare_app_icon(&mut tasks);
        self.prepare_metadata(&mut tasks);
        self.attach_libraries(&mut tasks);
        self.process_assets(&mut tasks);
        self.compile_sources(&mut tasks);
        self.create_app_package(&mut tasks);
        self.sign_app(&mut tasks);
        self.create_output_bundle(&mut tasks);
        Pipeline::new(self.kind, tasks)
    }

    fn prepare_app_icon(&self, tasks: &mut Vec<Box<dyn Task>>) {
        tasks.push(Box::new(PrepareAppIcon));
    }

    fn prepare_metadata(&self, tasks: &mut Vec<Box<dyn Task>>) {
        tasks.push(Box::new(CreateManifest));
    }

    fn attach_libraries(&self, tasks: &mut Vec<Box<dyn Task>>) {
        tasks.push(Box::new(AttachNativeLibs));
        tasks.push(Box::new(AttachArchiveLibs));
        tasks.push(Box::new(AttachAssets));
    }

    fn process_assets(&self, tasks: &mut Vec<Box<dyn Task>>) {
        tasks.push(Box::new(MergeResources));
        match self.kind {
            PackageKind::Apk => tasks.push(Box::new(PackageResources)),
            PackageKind::Aab => tasks.push(Box::new(CompileResources)),
        }
    }

    fn compile_sources(&self, tasks: &mut Vec<Box<dyn Task>>) {
        tasks.push(Box::new(CompileSources));
        match self.dexer {
            DexerGeneration::D8 => tasks.push(Box::new(RunD8)),
            DexerGeneration::Dx => tasks.push(Box::new(RunDx)),
        }
    }

    fn create_app_package(&self, tasks: &mut Vec<Box<dyn Task>>) {
        match self.kind {
            PackageKind::Apk => tasks.push(Box::new(BuildApk)),
            PackageKind::Aab => tasks.push(Box::new(RunBundletool)),
        }
    }

    fn sign_app(&self, tasks: &mut Vec<Box<dyn Task>>) {
        // bundles are signed downstream by the distribution channel
        if self.kind == PackageKind::Apk {
            tasks.push(Box::new(RunZipAlign));
            tasks.push(Box::new(RunApkSigner));
        }
    }

    fn create_output_bundle(&self, tasks: &mut Vec<Box<dyn Task>>) {
        tasks.push(Box::new(CreateOutputBundle));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn apk_pipeline_orders_and_signs() {
        let factory = BuildFactory::new(PackageKind::Apk, DexerGeneration::D8);
        let pipeline = factory.build_pipeline();
        let names = pipeline.stage_names();
        assert_eq!(
            names,
            vec![
                "prepare-app-icon",
                "create-manifest",
                "attach-native-libs",
                "attach-archive-libs",
                "attach-assets",
                "merge-resources",
                "package-resources",
                "compile-sources",
                "dex-d8",
                "build-apk",
                "zipalign",
                "apksigner",
                "create-output-bundle",
            ]
        );
    }

    #[test]
    fn aab_pipeline_skips_signing() {
        let factory = BuildFactory::new(PackageKind::Aab, DexerGeneration::D8);
        let names = factory.build_pipeline().stage_names();
        assert!(!names.contains(&"zipalign"));
        assert!(!names.contains(&"apksigner"));
        assert!(names.contains(&"compile-resources"));
        assert!(names.contains(&"run-bundletool"));
    }

    #[test]
    fn dexer_generation_is_injected() {
        let legacy = BuildFactory::new(PackageKind::Apk, DexerGeneration::Dx);
        assert!(legacy.build_pipeline().stage_names().contains(&"dex-dx"));
        let modern = BuildFactory::new(PackageKind::Apk, DexerGeneration::D8);
        assert!(modern.build_pipeline().stage_names().contains(&"dex-d8"));
    }

    #[test]
    fn probe_follows_d8_presence() {
        let tmp = tempdir().unwrap();
        let mut resources = crate::resources::Resources::rooted(tmp.path());
        assert_eq!(
            BuildFactory::detect_dexer(&resources),
            DexerGeneration::Dx
        );

        std::fs::write(tmp.path().join("d8.jar"), b"jar").unwrap();
        resources.d8_jar = Some(tmp.path().join("d8.jar"));
        assert_eq!(
            BuildFactory::detect_dexer(&resources),
            DexerGeneration::D8
        );
    }
}

//! App package assembly.
//!
//! APK builds are assembled directly: the compiled resource package is the
//! base zip, the dex files and native libraries are layered on top. AAB
//! builds stage the bundle module layout and hand it to bundletool.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;

use crate::context::BuildContext;
use crate::exec::ToolTimeout;
use crate::task::{PackageKind, Task, TaskError, TaskResult};
use crate::tasks::{path_arg, run_reported};

/// Builds the unsigned APK zip.
#[derive(Debug)]
pub struct BuildApk;

impl Task for BuildApk {
    fn name(&self) -> &'static str {
        "build-apk"
    }

    fn applies_to(&self, kind: PackageKind) -> bool {
        kind == PackageKind::Apk
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let resource_package = require_resource_package(context)?;
        if context.dex_files.is_empty() {
            return Err(TaskError::new("no dex files registered; dexing must run first"));
        }

        let out = context
            .paths
            .tmp_dir()
            .join(format!("{}-unsigned.apk", context.project.name));
        assemble_apk(
            &resource_package,
            &context.dex_files,
            &context.paths.native_libs_dir(),
            &out,
        )
        .map_err(|e| TaskError::with_cause("APK assembly failed", e))?;

        context.artifact = Some(out);
        Ok(())
    }
}

fn assemble_apk(
    resource_package: &Path,
    dex_files: &[PathBuf],
    native_libs_dir: &Path,
    out: &Path,
) -> Result<()> {
    let reader = File::open(resource_package)
        .with_context(|| format!("open {}", resource_package.display()))?;
    let mut base = zip::ZipArchive::new(reader)
        .with_context(|| format!("read {} as a zip", resource_package.display()))?;
    let mut writer = zip::ZipWriter::new(File::create(out)?);
    let options = SimpleFileOptions::default();

    // resource package entries come over unchanged
    for i in 0..base.len() {
        let mut entry = base.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        if entry.enclosed_name().is_none() {
            bail!("resource package contains an unsafe path: {}", entry.name());
        }
        let name = entry.name().to_string();
        writer.start_file(name, options)?;
        io::copy(&mut entry, &mut writer)?;
    }

    // dex files at the archive root, keeping their classesN names
    for dex in dex_files {
        let name = dex
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "classes.dex".to_string());
        writer.start_file(name, options)?;
        let mut file = File::open(dex).with_context(|| format!("open {}", dex.display()))?;
        io::copy(&mut file, &mut writer)?;
    }

    // native libraries under lib/<abi>/
    if native_libs_dir.is_dir() {
        for entry in WalkDir::new(native_libs_dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let relative = entry
                .path()
                .strip_prefix(native_libs_dir)
                .unwrap_or(entry.path());
            writer.start_file(format!("lib/{}", relative.display()), options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, &mut writer)?;
        }
    }

    writer.finish()?;
    Ok(())
}

/// Stages the bundle module layout and invokes bundletool.
#[derive(Debug)]
pub struct RunBundletool;

impl Task for RunBundletool {
    fn name(&self) -> &'static str {
        "run-bundletool"
    }

    fn applies_to(&self, kind: PackageKind) -> bool {
        kind == PackageKind::Aab
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let resource_package = require_resource_package(context)?;
        if context.dex_files.is_empty() {
            return Err(TaskError::new("no dex files registered; dexing must run first"));
        }

        let bundle_dir = context.paths.tmp_dir().join("bundle");
        let module_dir = bundle_dir.join("base");
        stage_bundle_module(context, &resource_package, &module_dir)
            .map_err(|e| TaskError::with_cause("bundle staging failed", e))?;

        let module_zip = bundle_dir.join("base.zip");
        zip_tree(&module_dir, &module_zip)
            .map_err(|e| TaskError::with_cause("bundle module packaging failed", e))?;

        let out = context
            .paths
            .tmp_dir()
            .join(format!("{}.aab", context.project.name));
        let argv = vec![
            path_arg(&context.resources.java),
            "-jar".to_string(),
            path_arg(&context.resources.bundletool_jar),
            "build-bundle".to_string(),
            format!("--modules={}", module_zip.display()),
            format!("--output={}", out.display()),
            "--overwrite".to_string(),
        ];
        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "bundletool",
            &argv,
            ToolTimeout::Long,
        ) {
            return Err(TaskError::new("bundletool failed"));
        }
        if !out.is_file() {
            return Err(TaskError::new(
                "bundletool reported success but produced no bundle",
            ));
        }
        context.artifact = Some(out);
        Ok(())
    }
}

/// Lay out `base/` the way bundletool expects: the proto manifest and
/// resources from the linked package, dex files under `dex/`, plus the
/// asset and native-library trees.
fn stage_bundle_module(
    context: &BuildContext,
    resource_package: &Path,
    module_dir: &Path,
) -> Result<()> {
    let linked = module_dir
        .parent()
        .unwrap_or(module_dir)
        .join("linked");
    extract_zip(resource_package, &linked)?;

    std::fs::create_dir_all(module_dir.join("manifest"))?;
    let manifest = linked.join("AndroidManifest.xml");
    if !manifest.is_file() {
        bail!("linked resource package has no AndroidManifest.xml");
    }
    std::fs::copy(&manifest, module_dir.join("manifest/AndroidManifest.xml"))?;

    let resources_pb = linked.join("resources.pb");
    if resources_pb.is_file() {
        std::fs::copy(&resources_pb, module_dir.join("resources.pb"))?;
    } else {
        context
            .reporter
            .warn("linked resource package has no resources.pb");
    }
    let res = linked.join("res");
    if res.is_dir() {
        copy_tree(&res, &module_dir.join("res"))?;
    }

    let dex_dir = module_dir.join("dex");
    std::fs::create_dir_all(&dex_dir)?;
    for dex in &context.dex_files {
        let name = dex
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "classes.dex".to_string());
        std::fs::copy(dex, dex_dir.join(name))?;
    }

    let assets = context.paths.assets_dir();
    if assets.is_dir() && std::fs::read_dir(&assets)?.next().is_some() {
        copy_tree(&assets, &module_dir.join("assets"))?;
    }
    let native = context.paths.native_libs_dir();
    if native.is_dir() && std::fs::read_dir(&native)?.next().is_some() {
        copy_tree(&native, &module_dir.join("lib"))?;
    }
    Ok(())
}

fn require_resource_package(context: &BuildContext) -> Result<PathBuf, TaskError> {
    context.resource_package.clone().ok_or_else(|| {
        TaskError::new("no resource package; resource processing must run first")
    })
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest)?;
    fs_extra::dir::copy(
        source,
        dest,
        &fs_extra::dir::CopyOptions::new().content_only(true).overwrite(true),
    )
    .map_err(|e| anyhow::anyhow!("copy {} failed: {e}", source.display()))?;
    Ok(())
}

fn extract_zip(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("read {} as a zip", archive_path.display()))?;
    std::fs::create_dir_all(dest)?;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            bail!("archive {} contains an unsafe path", archive_path.display());
        };
        let target = dest.join(relative);
        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

fn zip_tree(source: &Path, out: &Path) -> Result<()> {
    let mut writer = zip::ZipWriter::new(File::create(out)?);
    let options = SimpleFileOptions::default();
    for entry in WalkDir::new(source)
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let relative = entry.path().strip_prefix(source).unwrap_or(entry.path());
        writer.start_file(relative.to_string_lossy().into_owned(), options)?;
        let mut file = File::open(entry.path())?;
        io::copy(&mut file, &mut writer)?;
    }
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use std::io::Write as _;
    use tempfile::tempdir;

    fn write_resource_package(path: &Path) {
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default();
        writer.start_file("AndroidManifest.xml", options).unwrap();
        writer.write_all(b"<manifest/>").unwrap();
        writer.start_file("res/layout/main.xml", options).unwrap();
        writer.finish().unwrap();
    }

    #[test]
    fn apk_contains_resources_dex_and_native_libs() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());

        let resource_package = context.paths.tmp_dir().join("resources.ap_");
        write_resource_package(&resource_package);
        context.resource_package = Some(resource_package);

        let dex = context.paths.tmp_dir().join("classes.dex");
        std::fs::write(&dex, b"dex").unwrap();
        context.dex_files.push(dex);

        let abi = context.paths.native_libs_dir().join("armeabi-v7a");
        std::fs::create_dir_all(&abi).unwrap();
        std::fs::write(abi.join("libmedia.so"), b"elf").unwrap();

        BuildApk.execute(&mut context).unwrap();

        let apk = context.artifact.clone().unwrap();
        assert!(apk.is_file());
        let mut archive = zip::ZipArchive::new(File::open(&apk).unwrap()).unwrap();
        let names: Vec<String> = (0..archive.len())
            .map(|i| archive.by_index(i).unwrap().name().to_string())
            .collect();
        assert!(names.contains(&"AndroidManifest.xml".to_string()));
        assert!(names.contains(&"res/layout/main.xml".to_string()));
        assert!(names.contains(&"classes.dex".to_string()));
        assert!(names.contains(&"lib/armeabi-v7a/libmedia.so".to_string()));
    }

    #[test]
    fn apk_requires_dex_files() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let resource_package = context.paths.tmp_dir().join("resources.ap_");
        write_resource_package(&resource_package);
        context.resource_package = Some(resource_package);

        let err = BuildApk.execute(&mut context).unwrap_err();
        assert!(err.message().contains("no dex files"));
    }

    #[test]
    fn missing_resource_package_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let err = BuildApk.execute(&mut context).unwrap_err();
        assert!(err.message().contains("resource processing"));
    }

    #[test]
    fn bundle_staging_lays_out_the_module() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let resource_package = context.paths.tmp_dir().join("resources.ap_");
        write_resource_package(&resource_package);

        let dex = context.paths.tmp_dir().join("classes.dex");
        std::fs::write(&dex, b"dex").unwrap();
        context.dex_files.push(dex);

        let module_dir = context.paths.tmp_dir().join("bundle/base");
        stage_bundle_module(&context, &resource_package, &module_dir).unwrap();

        assert!(module_dir.join("manifest/AndroidManifest.xml").is_file());
        assert!(module_dir.join("dex/classes.dex").is_file());
        assert!(module_dir.join("res/layout/main.xml").is_file());
    }

    #[test]
    fn packaging_stages_declare_their_package_kind() {
        assert!(BuildApk.applies_to(PackageKind::Apk));
        assert!(!BuildApk.applies_to(PackageKind::Aab));
        assert!(RunBundletool.applies_to(PackageKind::Aab));
        assert!(!RunBundletool.applies_to(PackageKind::Apk));
    }
}

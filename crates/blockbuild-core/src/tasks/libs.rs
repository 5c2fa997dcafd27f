//! Library and asset attachment stages.
//!
//! Components declare what they need through the project descriptor:
//! native shared objects, archive (.aar) libraries, and asset files.
//! These stages copy them into the build tree; declared-but-missing
//! inputs are warned about and skipped, never fatal.

use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result, bail};

use crate::context::BuildContext;
use crate::task::{Task, TaskError, TaskResult};

/// Copies component native libraries into `lib/<abi>/`.
#[derive(Debug)]
pub struct AttachNativeLibs;

impl Task for AttachNativeLibs {
    fn name(&self) -> &'static str {
        "attach-native-libs"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        for entry in &context.project.components.native_libraries {
            let source = context.resources.native_dir.join(entry);
            if !source.is_file() {
                context.reporter.warn(&format!(
                    "skipping missing native library {}",
                    source.display()
                ));
                continue;
            }
            let dest = context.paths.native_libs_dir().join(entry);
            if let Some(parent) = dest.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(&source, &dest)?;
        }
        Ok(())
    }
}

/// Unpacks archive libraries: `classes.jar` joins the compile classpath,
/// `res/` trees are queued for the resource merge, `assets/` are copied
/// straight into the build's asset tree.
#[derive(Debug)]
pub struct AttachArchiveLibs;

impl Task for AttachArchiveLibs {
    fn name(&self) -> &'static str {
        "attach-archive-libs"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let archives = context.project.components.archives.clone();
        for name in &archives {
            let source = context.resources.support_jar_path(name);
            if !source.is_file() {
                context
                    .reporter
                    .warn(&format!("skipping missing archive library {}", source.display()));
                continue;
            }

            let stem = Path::new(name)
                .file_stem()
                .map_or_else(|| name.clone(), |s| s.to_string_lossy().into_owned());
            let dest = context.paths.archive_libs_dir().join(stem);
            unpack_archive(&source, &dest).map_err(|e| {
                TaskError::with_cause(format!("could not unpack {}", source.display()), e)
            })?;

            let classes_jar = dest.join("classes.jar");
            if classes_jar.is_file() {
                context.classpath_extras.push(classes_jar);
            }
            let res = dest.join("res");
            if res.is_dir() {
                context.merge_res_dirs.push(res);
            }
            let assets = dest.join("assets");
            if assets.is_dir() {
                fs_extra::dir::copy(
                    &assets,
                    context.paths.assets_dir(),
                    &fs_extra::dir::CopyOptions::new().content_only(true).overwrite(true),
                )
                .map_err(|e| {
                    TaskError::new(format!("could not copy assets from {name}: {e}"))
                })?;
            }
        }
        Ok(())
    }
}

/// Copies project and component asset files into the asset tree.
#[derive(Debug)]
pub struct AttachAssets;

impl Task for AttachAssets {
    fn name(&self) -> &'static str {
        "attach-assets"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let assets_dir = context.paths.assets_dir();

        for asset in &context.project.assets {
            let source = context.paths.project_root().join(asset);
            copy_asset(context, &source, &assets_dir)?;
        }
        for asset in &context.project.components.assets {
            let source = context.resources.component_assets_dir.join(asset);
            copy_asset(context, &source, &assets_dir)?;
        }
        Ok(())
    }
}

fn copy_asset(context: &BuildContext, source: &Path, assets_dir: &Path) -> TaskResult {
    if !source.is_file() {
        context
            .reporter
            .warn(&format!("skipping missing asset {}", source.display()));
        return Ok(());
    }
    let Some(file_name) = source.file_name() else {
        return Ok(());
    };
    std::fs::copy(source, assets_dir.join(file_name))?;
    Ok(())
}

/// Zip extraction with the usual zip-slip guard: entries that escape the
/// destination are rejected.
fn unpack_archive(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("open {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("read {} as a zip archive", archive_path.display()))?;
    std::fs::create_dir_all(dest)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(relative) = entry.enclosed_name() else {
            bail!(
                "archive {} contains an unsafe path: {}",
                archive_path.display(),
                entry.name()
            );
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
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}

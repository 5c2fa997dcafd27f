//! Resource merging and compilation.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::exec::ToolTimeout;
use crate::task::{PackageKind, Task, TaskError, TaskResult};
use crate::tasks::{path_arg, run_reported};

/// Merges the project's `res/` tree with the trees contributed by archive
/// libraries. The project wins conflicts; library-vs-library conflicts go
/// to whichever archive was attached first, with a warning either way.
#[derive(Debug)]
pub struct MergeResources;

impl Task for MergeResources {
    fn name(&self) -> &'static str {
        "merge-resources"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let target = context.paths.res_dir();

        let project_res = context.paths.project_root().join("res");
        if project_res.is_dir() {
            merge_tree(context, &project_res, &target)?;
        }
        let contributed = context.merge_res_dirs.clone();
        for source in contributed {
            merge_tree(context, &source, &target)?;
        }
        Ok(())
    }
}

fn merge_tree(context: &BuildContext, source: &Path, target: &Path) -> TaskResult {
    for entry in WalkDir::new(source)
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let dest = target.join(relative);
        if dest.exists() {
            context.reporter.warn(&format!(
                "resource conflict: {} already provided, keeping the first copy",
                relative.display()
            ));
            continue;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::copy(entry.path(), &dest)?;
    }
    Ok(())
}

/// Runs `aapt package` for APK builds: emits `R.java` into the gen dir and
/// the resource package consumed by the final zip assembly.
#[derive(Debug)]
pub struct PackageResources;

impl Task for PackageResources {
    fn name(&self) -> &'static str {
        "package-resources"
    }

    fn applies_to(&self, kind: PackageKind) -> bool {
        kind == PackageKind::Apk
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let manifest = require_manifest(context)?;
        let out = context.paths.tmp_dir().join("resources.ap_");

        let argv = vec![
            path_arg(&context.resources.aapt),
            "package".to_string(),
            "-f".to_string(),
            "-m".to_string(),
            "--auto-add-overlay".to_string(),
            "-J".to_string(),
            path_arg(&context.paths.gen_dir()),
            "-M".to_string(),
            path_arg(&manifest),
            "-S".to_string(),
            path_arg(&context.paths.res_dir()),
            "-A".to_string(),
            path_arg(&context.paths.assets_dir()),
            "-I".to_string(),
            path_arg(&context.resources.android_jar),
            "-F".to_string(),
            path_arg(&out),
        ];

        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "aapt",
            &argv,
            ToolTimeout::Long,
        ) {
            return Err(TaskError::new("resource packaging failed"));
        }
        if !out.is_file() {
            return Err(TaskError::new(
                "aapt reported success but produced no resource package",
            ));
        }
        context.resource_package = Some(out);
        Ok(())
    }
}

/// Runs `aapt2 compile` + `aapt2 link --proto-format` for AAB builds.
#[derive(Debug)]
pub struct CompileResources;

impl Task for CompileResources {
    fn name(&self) -> &'static str {
        "compile-resources"
    }

    fn applies_to(&self, kind: PackageKind) -> bool {
        kind == PackageKind::Aab
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let manifest = require_manifest(context)?;
        let compiled = context.paths.tmp_dir().join("compiled-res.zip");
        let out = context.paths.tmp_dir().join("resources.ap_");

        let compile_argv = vec![
            path_arg(&context.resources.aapt2),
            "compile".to_string(),
            "--dir".to_string(),
            path_arg(&context.paths.res_dir()),
            "-o".to_string(),
            path_arg(&compiled),
        ];
        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "aapt2 compile",
            &compile_argv,
            ToolTimeout::Long,
        ) {
            return Err(TaskError::new("resource compilation failed"));
        }

        let link_argv = vec![
            path_arg(&context.resources.aapt2),
            "link".to_string(),
            "--proto-format".to_string(),
            "--auto-add-overlay".to_string(),
            "-o".to_string(),
            path_arg(&out),
            "-I".to_string(),
            path_arg(&context.resources.android_jar),
            "--manifest".to_string(),
            path_arg(&manifest),
            "--java".to_string(),
            path_arg(&context.paths.gen_dir()),
            "-A".to_string(),
            path_arg(&context.paths.assets_dir()),
            path_arg(&compiled),
        ];
        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "aapt2 link",
            &link_argv,
            ToolTimeout::Long,
        ) {
            return Err(TaskError::new("resource linking failed"));
        }
        if !out.is_file() {
            return Err(TaskError::new(
                "aapt2 reported success but produced no resource package",
            ));
        }
        context.resource_package = Some(out);
        Ok(())
    }
}

fn require_manifest(context: &BuildContext) -> Result<PathBuf, TaskError> {
    let manifest = context.paths.manifest_path();
    if !manifest.is_file() {
        return Err(TaskError::new(
            "AndroidManifest.xml is missing; manifest generation must run first",
        ));
    }
    Ok(manifest)
}

//! The dexing stages.
//!
//! Two interchangeable implementations drive the two dexer generations:
//! [`RunD8`] (modern toolchain, proguard-style main-dex rules) and
//! [`RunDx`] (legacy toolchain, concrete main-dex class list). Both share
//! the same input assembly: pre-dexed runtime and support jars first, then
//! component libraries, extension runtime jars, and finally every compiled
//! class file; one dexer invocation over the whole list produces the final
//! `classes*.dex` set registered in the build context.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::context::{BuildContext, EXTENSION_RUNTIME_JAR};
use crate::exec::{self, ToolTimeout};
use crate::maindex::{self, MainDexSpec};
use crate::predex::{DirPredexCache, PredexCache};
use crate::task::{Task, TaskError, TaskResult};
use crate::tasks::{path_arg, run_reported};

const D8_ENTRY_POINT: &str = "com.android.tools.r8.D8";
const DX_ENTRY_POINT: &str = "com.android.dx.command.Main";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Generation {
    D8,
    Dx,
}

impl Generation {
    fn tool_name(self) -> &'static str {
        match self {
            Self::D8 => "d8",
            Self::Dx => "dx",
        }
    }
}

/// Dex stage backed by the modern dexer.
#[derive(Debug)]
pub struct RunD8;

impl Task for RunD8 {
    fn name(&self) -> &'static str {
        "dex-d8"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        execute_dex(context, Generation::D8)
    }
}

/// Dex stage backed by the legacy dexer.
#[derive(Debug)]
pub struct RunDx;

impl Task for RunDx {
    fn name(&self) -> &'static str {
        "dex-dx"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        execute_dex(context, Generation::Dx)
    }
}

fn execute_dex(context: &mut BuildContext, generation: Generation) -> TaskResult {
    let dexer_jar = dexer_jar(context, generation)?;

    let classes_dir = context.paths.classes_dir();
    if !classes_dir.is_dir() {
        return Err(TaskError::new(format!(
            "classes directory {} is missing",
            classes_dir.display()
        )));
    }

    let extension_jars = collect_extension_jars(context);

    let cache = DirPredexCache::new(context.paths.dex_cache_dir())
        .map_err(|e| TaskError::with_cause("could not open the dex cache directory", e))?;

    let min_api = context.effective_min_api();
    let mut spec = MainDexSpec::default();
    let inputs = assemble_inputs(
        context,
        &cache,
        &mut spec,
        &extension_jars,
        &dexer_jar,
        generation,
        min_api,
    );

    let out_dir = context.paths.tmp_dir();
    let main_dex_file = if maindex::requires_main_dex(min_api) {
        let path = match generation {
            Generation::D8 => {
                // The modern dexer computes the main dex from pattern
                // rules; swap the recorded class set for the equivalent
                // pattern set plus the launcher class.
                spec.clear();
                for pattern in maindex::runtime_patterns(&context.project.main_class) {
                    spec.insert(pattern);
                }
                spec.write_rules(&out_dir)?
            }
            Generation::Dx => {
                spec.insert(context.project.main_class.clone());
                spec.write_list(&out_dir)?
            }
        };
        Some(path)
    } else {
        None
    };

    let argv = full_dex_argv(
        context,
        &dexer_jar,
        generation,
        &inputs,
        main_dex_file.as_deref(),
        min_api,
        &out_dir,
    );
    if !run_reported(
        &out_dir,
        context.reporter.as_ref(),
        generation.tool_name(),
        &argv,
        ToolTimeout::Long,
    ) {
        return Err(TaskError::new(format!("{} failed", generation.tool_name())));
    }

    register_dex_outputs(context, &out_dir)
}

fn dexer_jar(context: &BuildContext, generation: Generation) -> Result<PathBuf, TaskError> {
    let jar = match generation {
        Generation::D8 => context.resources.d8_jar.clone(),
        Generation::Dx => context.resources.dx_jar.clone(),
    };
    jar.ok_or_else(|| {
        TaskError::new(format!(
            "the {} dexer jar is not configured",
            generation.tool_name()
        ))
    })
}

/// Resolve extension runtime jars, deduplicated by source path.
fn collect_extension_jars(context: &mut BuildContext) -> Vec<PathBuf> {
    let types = context.project.extensions.clone();
    let mut seen = HashSet::new();
    let mut jars = Vec::new();
    for type_name in &types {
        let Some(dir) = context.ext_comp_dir(type_name) else {
            context.reporter.warn(&format!(
                "extension {type_name} has no classpath directory; skipping"
            ));
            continue;
        };
        let jar = dir.join(EXTENSION_RUNTIME_JAR);
        if !jar.is_file() {
            context.reporter.warn(&format!(
                "extension {type_name} is missing {}; skipping",
                jar.display()
            ));
            continue;
        }
        if seen.insert(jar.clone()) {
            jars.push(jar);
        }
    }
    jars
}

/// Assemble the ordered dexer input list, recording main-dex classes as a
/// side effect. Declared-but-missing inputs are warned about and skipped.
fn assemble_inputs(
    context: &BuildContext,
    cache: &dyn PredexCache,
    spec: &mut MainDexSpec,
    extension_jars: &[PathBuf],
    dexer_jar: &Path,
    generation: Generation,
    min_api: u32,
) -> Vec<PathBuf> {
    let mut inputs = Vec::new();

    // 1. Every user-compiled class belongs in the main dex.
    spec.record_class_tree(&context.paths.classes_dir());

    // 2. Runtime jars, recorded and pre-dexed.
    let components_runtime = context.resources.components_runtime_jar.clone();
    let language_runtime = context.resources.language_runtime_jar.clone();
    add_predexed(
        context, cache, spec, &mut inputs, &components_runtime, true, dexer_jar, generation,
        min_api,
    );
    add_predexed(
        context, cache, spec, &mut inputs, &language_runtime, true, dexer_jar, generation,
        min_api,
    );

    // 3. Critical jars every practical deployment needs.
    for name in &context.resources.critical_jars {
        let jar = context.resources.support_jar_path(name);
        add_predexed(
            context, cache, spec, &mut inputs, &jar, true, dexer_jar, generation, min_api,
        );
    }

    // 4. Crash reporting, companion builds only.
    if context.for_companion() {
        let acra = context.resources.crash_report_jar.clone();
        add_predexed(
            context, cache, spec, &mut inputs, &acra, true, dexer_jar, generation, min_api,
        );
    }

    // 5. Remaining support jars, not recorded.
    for name in &context.resources.support_jars {
        if context.resources.critical_jars.contains(name) {
            continue;
        }
        let jar = context.resources.support_jar_path(name);
        add_predexed(
            context, cache, spec, &mut inputs, &jar, false, dexer_jar, generation, min_api,
        );
    }

    // 6. Component-declared library jars.
    for name in &context.project.components.libraries {
        let jar = context.resources.support_jar_path(name);
        add_predexed(
            context, cache, spec, &mut inputs, &jar, false, dexer_jar, generation, min_api,
        );
    }

    // 7. Extension runtime jars go in as-is.
    inputs.extend(extension_jars.iter().cloned());

    // 8. Every compiled class file.
    for entry in WalkDir::new(context.paths.classes_dir())
        .sort_by_file_name()
        .into_iter()
        .filter_map(std::result::Result::ok)
        .filter(|e| e.file_type().is_file())
    {
        if entry.path().extension().is_some_and(|ext| ext == "class") {
            inputs.push(entry.path().to_path_buf());
        }
    }

    inputs
}

#[allow(clippy::too_many_arguments)]
fn add_predexed(
    context: &BuildContext,
    cache: &dyn PredexCache,
    spec: &mut MainDexSpec,
    inputs: &mut Vec<PathBuf>,
    jar: &Path,
    record: bool,
    dexer_jar: &Path,
    generation: Generation,
    min_api: u32,
) {
    if !jar.is_file() {
        context
            .reporter
            .warn(&format!("skipping missing library {}", jar.display()));
        return;
    }
    if record {
        if let Err(e) = spec.record_jar(jar) {
            context.reporter.warn(&format!(
                "could not record {} for the main dex: {e}",
                jar.display()
            ));
        }
    }

    let mut compute = |staging: &Path| -> anyhow::Result<()> {
        let argv = predex_argv(context, dexer_jar, generation, jar, staging, min_api);
        let mut out = Vec::new();
        let mut err = Vec::new();
        if exec::run_autofile(
            &context.paths.tmp_dir(),
            &argv,
            &mut out,
            &mut err,
            ToolTimeout::Long,
        ) {
            Ok(())
        } else {
            anyhow::bail!(
                "{} exited with failure:\n{}",
                generation.tool_name(),
                exec::tail(&err, 5)
            )
        }
    };
    inputs.push(cache.get_or_compute(jar, context.reporter.as_ref(), &mut compute));
}

fn jvm_prefix(context: &BuildContext, dexer_jar: &Path, generation: Generation) -> Vec<String> {
    let mut argv = vec![
        path_arg(&context.resources.java),
        format!("-Xmx{}M", context.config.child_process_ram_mb),
    ];
    if generation == Generation::D8 {
        argv.push("-Xss8m".to_string());
    }
    argv.push("-cp".to_string());
    argv.push(path_arg(dexer_jar));
    argv.push(
        match generation {
            Generation::D8 => D8_ENTRY_POINT,
            Generation::Dx => DX_ENTRY_POINT,
        }
        .to_string(),
    );
    argv
}

/// Argument vector for the final whole-classpath dexer run.
fn full_dex_argv(
    context: &BuildContext,
    dexer_jar: &Path,
    generation: Generation,
    inputs: &[PathBuf],
    main_dex_file: Option<&Path>,
    min_api: u32,
    out_dir: &Path,
) -> Vec<String> {
    let mut argv = jvm_prefix(context, dexer_jar, generation);
    match generation {
        Generation::D8 => {
            argv.push("--lib".to_string());
            argv.push(path_arg(&context.resources.android_jar));
            argv.push("--classpath".to_string());
            argv.push(path_arg(&context.paths.classes_dir()));
            argv.push("--output".to_string());
            argv.push(path_arg(out_dir));
            argv.push("--min-api".to_string());
            argv.push(min_api.to_string());
            if let Some(rules) = main_dex_file {
                argv.push("--main-dex-rules".to_string());
                argv.push(path_arg(rules));
            }
        }
        Generation::Dx => {
            argv.push("--dex".to_string());
            argv.push("--positions=lines".to_string());
            if let Some(list) = main_dex_file {
                argv.push("--multi-dex".to_string());
                argv.push(format!("--main-dex-list={}", list.display()));
            }
            argv.push(format!("--output={}", out_dir.display()));
        }
    }
    argv.extend(inputs.iter().map(|p| path_arg(p)));
    argv
}

/// Argument vector for pre-dexing a single library into `staging`.
fn predex_argv(
    context: &BuildContext,
    dexer_jar: &Path,
    generation: Generation,
    input: &Path,
    staging: &Path,
    min_api: u32,
) -> Vec<String> {
    let mut argv = jvm_prefix(context, dexer_jar, generation);
    match generation {
        Generation::D8 => {
            argv.push("--intermediate".to_string());
            argv.push("--lib".to_string());
            argv.push(path_arg(&context.resources.android_jar));
            argv.push("--output".to_string());
            argv.push(path_arg(staging));
            argv.push("--min-api".to_string());
            argv.push(min_api.to_string());
        }
        Generation::Dx => {
            argv.push("--dex".to_string());
            argv.push(format!("--output={}", staging.display()));
        }
    }
    argv.push(path_arg(input));
    argv
}

/// Collect every dex file the dexer dropped in the output directory. Zero
/// files after a reported success is a contract violation, not a no-op.
fn register_dex_outputs(context: &mut BuildContext, out_dir: &Path) -> TaskResult {
    let mut produced: Vec<PathBuf> = std::fs::read_dir(out_dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "dex"))
        .collect();
    if produced.is_empty() {
        return Err(TaskError::new(
            "dexer reported success but produced no dex files",
        ));
    }
    produced.sort();
    context
        .reporter
        .info(&format!("{} dex file(s) produced", produced.len()));
    context.dex_files.extend(produced);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::{MemoryReporter, Severity};
    use crate::testutil::{test_context, test_context_with};
    use std::fs::File;
    use std::sync::Arc;
    use tempfile::tempdir;
    use zip::write::SimpleFileOptions;

    fn write_jar(path: &Path, class_entry: &str) {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        let file = File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file(class_entry, SimpleFileOptions::default())
            .unwrap();
        writer.finish().unwrap();
    }

    fn write_class(context: &BuildContext, relative: &str) {
        let path = context.paths.classes_dir().join(relative);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"\xca\xfe\xba\xbe").unwrap();
    }

    #[test]
    fn high_api_omits_main_dex_arguments() {
        let tmp = tempdir().unwrap();
        let context = test_context(tmp.path());
        let argv = full_dex_argv(
            &context,
            Path::new("/tools/d8.jar"),
            Generation::D8,
            &[PathBuf::from("/in/a.jar")],
            None,
            23,
            Path::new("/out"),
        );
        assert!(!argv.iter().any(|a| a.contains("--main-dex")));
        let pos = argv.iter().position(|a| a == "--min-api").unwrap();
        assert_eq!(argv[pos + 1], "23");
        assert_eq!(argv[1], "-Xmx2048M");
        assert!(argv.contains(&D8_ENTRY_POINT.to_string()));
        assert_eq!(argv.last().unwrap(), "/in/a.jar");
    }

    #[test]
    fn low_api_passes_main_dex_rules() {
        let tmp = tempdir().unwrap();
        let context = test_context(tmp.path());
        let argv = full_dex_argv(
            &context,
            Path::new("/tools/d8.jar"),
            Generation::D8,
            &[],
            Some(Path::new("/out/main-dex-rules.txt")),
            20,
            Path::new("/out"),
        );
        let pos = argv.iter().position(|a| a == "--main-dex-rules").unwrap();
        assert_eq!(argv[pos + 1], "/out/main-dex-rules.txt");
    }

    #[test]
    fn legacy_dexer_uses_multidex_list_form() {
        let tmp = tempdir().unwrap();
        let context = test_context(tmp.path());
        let argv = full_dex_argv(
            &context,
            Path::new("/tools/dx.jar"),
            Generation::Dx,
            &[],
            Some(Path::new("/out/main-dex-list.txt")),
            16,
            Path::new("/out"),
        );
        assert!(argv.contains(&"--multi-dex".to_string()));
        assert!(
            argv.iter()
                .any(|a| a == "--main-dex-list=/out/main-dex-list.txt")
        );
        assert!(argv.contains(&DX_ENTRY_POINT.to_string()));

        let argv = full_dex_argv(
            &context,
            Path::new("/tools/dx.jar"),
            Generation::Dx,
            &[],
            None,
            23,
            Path::new("/out"),
        );
        assert!(!argv.iter().any(|a| a.contains("main-dex")));
        assert!(!argv.contains(&"--multi-dex".to_string()));
    }

    #[test]
    fn missing_declared_inputs_are_skipped_with_warnings() {
        let tmp = tempdir().unwrap();
        let reporter = Arc::new(MemoryReporter::new());
        let mut context = test_context_with(tmp.path(), reporter.clone());
        // nothing under the tool root exists; the only real input is one class
        write_class(&context, "com/example/paint/Screen1.class");
        context.project.components.libraries = vec!["vendor-extra.jar".to_string()];

        let cache = DirPredexCache::new(context.paths.dex_cache_dir()).unwrap();
        let mut spec = MainDexSpec::default();
        let min_api = context.effective_min_api();
        let dexer = dexer_jar(&context, Generation::D8).unwrap();
        let inputs = assemble_inputs(
            &context,
            &cache,
            &mut spec,
            &[],
            &dexer,
            Generation::D8,
            min_api,
        );

        assert_eq!(inputs.len(), 1);
        assert!(inputs[0].ends_with("com/example/paint/Screen1.class"));
        let warnings = reporter.messages(Severity::Warning);
        assert!(warnings.iter().any(|m| m.contains("vendor-extra.jar")));
        assert!(
            warnings
                .iter()
                .any(|m| m.contains("components-runtime.jar"))
        );
        assert!(spec.contains("com.example.paint.Screen1"));
    }

    #[test]
    fn companion_includes_crash_reporting_jar() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        // Real jars, but a java launcher that always fails: pre-dexing
        // falls back to the originals, which is exactly what we want to
        // observe in the assembled list.
        context.resources.java = PathBuf::from("/bin/false");
        write_jar(
            &context.resources.components_runtime_jar.clone(),
            "com/blockbuild/components/runtime/Core.class",
        );
        write_jar(
            &context.resources.language_runtime_jar.clone(),
            "kawa/Interpreter.class",
        );
        write_jar(&context.resources.crash_report_jar.clone(), "org/acra/ACRA.class");
        write_class(&context, "com/example/paint/Screen1.class");

        let cache = DirPredexCache::new(context.paths.dex_cache_dir()).unwrap();
        let dexer = dexer_jar(&context, Generation::D8).unwrap();

        context.config.for_companion = true;
        let mut spec = MainDexSpec::default();
        let inputs = assemble_inputs(
            &context,
            &cache,
            &mut spec,
            &[],
            &dexer,
            Generation::D8,
            context.effective_min_api(),
        );
        let acra = context.resources.crash_report_jar.clone();
        assert!(inputs.contains(&acra));
        // runtime jars come before the crash-reporting jar
        assert_eq!(inputs[0], context.resources.components_runtime_jar);
        assert_eq!(inputs[1], context.resources.language_runtime_jar);
        assert!(spec.contains("org.acra.ACRA"));

        context.config.for_companion = false;
        let mut spec = MainDexSpec::default();
        let inputs = assemble_inputs(
            &context,
            &cache,
            &mut spec,
            &[],
            &dexer,
            Generation::D8,
            context.effective_min_api(),
        );
        assert!(!inputs.contains(&acra));
    }

    #[test]
    fn empty_output_dir_after_success_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let out_dir = context.paths.tmp_dir();
        let err = register_dex_outputs(&mut context, &out_dir).unwrap_err();
        assert!(err.message().contains("no dex files"));
    }

    #[test]
    fn dex_outputs_register_in_sorted_order() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let out_dir = context.paths.tmp_dir();
        std::fs::write(out_dir.join("classes2.dex"), b"dex").unwrap();
        std::fs::write(out_dir.join("classes.dex"), b"dex").unwrap();
        std::fs::write(out_dir.join("notes.txt"), b"not a dex").unwrap();

        register_dex_outputs(&mut context, &out_dir).unwrap();

        assert_eq!(context.dex_files.len(), 2);
        assert!(context.dex_files[0].ends_with("classes.dex"));
        assert!(context.dex_files[1].ends_with("classes2.dex"));
    }

    #[test]
    fn missing_classes_dir_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        std::fs::remove_dir_all(context.paths.classes_dir()).unwrap();
        let err = RunD8.execute(&mut context).unwrap_err();
        assert!(err.message().contains("classes directory"));
    }

    #[test]
    fn unconfigured_dexer_jar_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        context.resources.dx_jar = None;
        let err = RunDx.execute(&mut context).unwrap_err();
        assert!(err.message().contains("not configured"));
    }
}

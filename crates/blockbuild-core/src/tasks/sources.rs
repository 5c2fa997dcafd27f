//! Generated-source compilation.

use walkdir::WalkDir;

use crate::context::BuildContext;
use crate::exec::ToolTimeout;
use crate::task::{Task, TaskError, TaskResult};
use crate::tasks::{path_arg, run_reported};

/// Compiles the generated sources (`R.java` and anything else resource
/// processing dropped into the gen dir) into the classes tree, against the
/// platform stub jar and the runtime jars. The block compiler's own output
/// is already in the classes dir when the pipeline starts.
#[derive(Debug)]
pub struct CompileSources;

impl Task for CompileSources {
    fn name(&self) -> &'static str {
        "compile-sources"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let sources: Vec<String> = WalkDir::new(context.paths.gen_dir())
            .into_iter()
            .filter_map(std::result::Result::ok)
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "java"))
            .map(|e| path_arg(e.path()))
            .collect();

        if sources.is_empty() {
            context.reporter.info("no generated sources to compile");
            return Ok(());
        }

        let mut classpath = vec![
            path_arg(&context.resources.components_runtime_jar),
            path_arg(&context.resources.language_runtime_jar),
        ];
        classpath.extend(context.classpath_extras.iter().map(|p| path_arg(p)));

        let mut argv = vec![
            path_arg(&context.resources.javac),
            "-encoding".to_string(),
            "UTF-8".to_string(),
            "-bootclasspath".to_string(),
            path_arg(&context.resources.android_jar),
            "-classpath".to_string(),
            classpath.join(":"),
            "-d".to_string(),
            path_arg(&context.paths.classes_dir()),
        ];
        argv.extend(sources);

        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "javac",
            &argv,
            ToolTimeout::Long,
        ) {
            return Err(TaskError::new("source compilation failed"));
        }
        Ok(())
    }
}

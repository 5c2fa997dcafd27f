//! Launcher icon placement.

use crate::context::BuildContext;
use crate::task::{Task, TaskResult};

/// Copies the project's launcher icon into the resource tree as
/// `drawable/ic_launcher`. A missing or undeclared icon is not fatal; the
/// manifest simply omits the icon attribute and the platform default is
/// used.
#[derive(Debug)]
pub struct PrepareAppIcon;

impl Task for PrepareAppIcon {
    fn name(&self) -> &'static str {
        "prepare-app-icon"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let Some(icon) = context.project.icon.clone() else {
            context
                .reporter
                .info("no launcher icon declared; using the platform default");
            return Ok(());
        };

        let source = context.paths.project_root().join(&icon);
        if !source.is_file() {
            context.reporter.warn(&format!(
                "declared icon {} does not exist; using the platform default",
                source.display()
            ));
            return Ok(());
        }

        let extension = source
            .extension()
            .map_or_else(|| "png".to_string(), |e| e.to_string_lossy().into_owned());
        let drawable = context.paths.res_dir().join("drawable");
        std::fs::create_dir_all(&drawable)?;
        std::fs::copy(&source, drawable.join(format!("ic_launcher.{extension}")))?;
        Ok(())
    }
}

/// True when an `ic_launcher.*` drawable landed in the resource tree.
pub(crate) fn has_launcher_icon(context: &BuildContext) -> bool {
    let drawable = context.paths.res_dir().join("drawable");
    std::fs::read_dir(drawable)
        .map(|entries| {
            entries
                .filter_map(std::result::Result::ok)
                .any(|e| e.file_name().to_string_lossy().starts_with("ic_launcher."))
        })
        .unwrap_or(false)
}

//! The build stages, in pipeline order.

pub mod bundle;
pub mod dex;
pub mod icon;
pub mod libs;
pub mod manifest;
pub mod package;
pub mod resources;
pub mod sign;
pub mod sources;

pub use bundle::CreateOutputBundle;
pub use dex::{RunD8, RunDx};
pub use icon::PrepareAppIcon;
pub use libs::{AttachArchiveLibs, AttachAssets, AttachNativeLibs};
pub use manifest::CreateManifest;
pub use package::{BuildApk, RunBundletool};
pub use resources::{CompileResources, MergeResources, PackageResources};
pub use sign::{RunApkSigner, RunZipAlign};
pub use sources::CompileSources;

use std::path::Path;

use tracing::debug;

use crate::exec::{self, ToolTimeout};
use crate::reporter::Reporter;

/// Run an external tool, surfacing the tail of its stderr through the
/// reporter when it fails. The full streams go to the trace log.
pub(crate) fn run_reported(
    workdir: &Path,
    reporter: &dyn Reporter,
    tool: &str,
    argv: &[String],
    timeout: ToolTimeout,
) -> bool {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let ok = exec::run_autofile(workdir, argv, &mut out, &mut err, timeout);
    if ok {
        debug!(tool, "tool succeeded");
    } else {
        reporter.error(&format!("{tool} failed:\n{}", exec::tail(&err, 20)));
        debug!(
            tool,
            stdout = %String::from_utf8_lossy(&out),
            stderr = %String::from_utf8_lossy(&err),
            "tool failed"
        );
    }
    ok
}

pub(crate) fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

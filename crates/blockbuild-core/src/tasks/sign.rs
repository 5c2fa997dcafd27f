//! Alignment and signing, APK builds only. App bundles are signed by the
//! distribution channel downstream.

use std::path::PathBuf;

use crate::context::BuildContext;
use crate::exec::ToolTimeout;
use crate::task::{PackageKind, Task, TaskError, TaskResult};
use crate::tasks::{path_arg, run_reported};

#[derive(Debug)]
pub struct RunZipAlign;

impl Task for RunZipAlign {
    fn name(&self) -> &'static str {
        "zipalign"
    }

    fn applies_to(&self, kind: PackageKind) -> bool {
        kind == PackageKind::Apk
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let input = require_artifact(context)?;
        let out = context
            .paths
            .tmp_dir()
            .join(format!("{}-aligned.apk", context.project.name));

        let argv = vec![
            path_arg(&context.resources.zipalign),
            "-f".to_string(),
            "4".to_string(),
            path_arg(&input),
            path_arg(&out),
        ];
        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "zipalign",
            &argv,
            ToolTimeout::Short,
        ) {
            return Err(TaskError::new("zipalign failed"));
        }
        if !out.is_file() {
            return Err(TaskError::new(
                "zipalign reported success but produced no output",
            ));
        }
        context.artifact = Some(out);
        Ok(())
    }
}

#[derive(Debug)]
pub struct RunApkSigner;

impl Task for RunApkSigner {
    fn name(&self) -> &'static str {
        "apksigner"
    }

    fn applies_to(&self, kind: PackageKind) -> bool {
        kind == PackageKind::Apk
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let input = require_artifact(context)?;
        ensure_keystore(context)?;

        let out = context
            .paths
            .tmp_dir()
            .join(format!("{}-signed.apk", context.project.name));
        let argv = vec![
            path_arg(&context.resources.apksigner),
            "sign".to_string(),
            "--ks".to_string(),
            path_arg(&context.resources.keystore),
            "--ks-pass".to_string(),
            format!("pass:{}", context.resources.keystore_pass),
            "--ks-key-alias".to_string(),
            context.resources.key_alias.clone(),
            "--out".to_string(),
            path_arg(&out),
            path_arg(&input),
        ];
        if !run_reported(
            &context.paths.tmp_dir(),
            context.reporter.as_ref(),
            "apksigner",
            &argv,
            ToolTimeout::Short,
        ) {
            return Err(TaskError::new("apksigner failed"));
        }
        if !out.is_file() {
            return Err(TaskError::new(
                "apksigner reported success but produced no output",
            ));
        }
        context.artifact = Some(out);
        Ok(())
    }
}

/// Generate a debug keystore next to the configured location when none
/// exists yet. `keytool` ships with the JDK, so it is resolved next to the
/// configured java launcher first.
fn ensure_keystore(context: &BuildContext) -> TaskResult {
    let keystore = &context.resources.keystore;
    if keystore.is_file() {
        return Ok(());
    }
    context.reporter.info(&format!(
        "keystore {} not found; generating a debug keystore",
        keystore.display()
    ));
    if let Some(parent) = keystore.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let argv = vec![
        path_arg(&keytool_path(context)),
        "-genkey".to_string(),
        "-v".to_string(),
        "-keystore".to_string(),
        path_arg(keystore),
        "-storepass".to_string(),
        context.resources.keystore_pass.clone(),
        "-keypass".to_string(),
        context.resources.keystore_pass.clone(),
        "-alias".to_string(),
        context.resources.key_alias.clone(),
        "-keyalg".to_string(),
        "RSA".to_string(),
        "-keysize".to_string(),
        "2048".to_string(),
        "-validity".to_string(),
        "10000".to_string(),
        "-dname".to_string(),
        "CN=Android Debug,O=Android,C=US".to_string(),
    ];
    if !run_reported(
        &context.paths.tmp_dir(),
        context.reporter.as_ref(),
        "keytool",
        &argv,
        ToolTimeout::Short,
    ) {
        return Err(TaskError::new("could not generate a debug keystore"));
    }
    Ok(())
}

fn keytool_path(context: &BuildContext) -> PathBuf {
    context
        .resources
        .java
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("keytool"), |dir| dir.join("keytool"))
}

fn require_artifact(context: &BuildContext) -> Result<PathBuf, TaskError> {
    context
        .artifact
        .clone()
        .ok_or_else(|| TaskError::new("no app package to process; packaging must run first"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use tempfile::tempdir;

    #[test]
    fn signing_stages_are_apk_only() {
        assert!(RunZipAlign.applies_to(PackageKind::Apk));
        assert!(!RunZipAlign.applies_to(PackageKind::Aab));
        assert!(RunApkSigner.applies_to(PackageKind::Apk));
        assert!(!RunApkSigner.applies_to(PackageKind::Aab));
    }

    #[test]
    fn missing_artifact_is_fatal() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let err = RunZipAlign.execute(&mut context).unwrap_err();
        assert!(err.message().contains("packaging must run first"));
    }

    #[test]
    fn existing_keystore_is_left_alone() {
        let tmp = tempdir().unwrap();
        let context = test_context(tmp.path());
        std::fs::create_dir_all(context.resources.keystore.parent().unwrap()).unwrap();
        std::fs::write(&context.resources.keystore, b"keystore").unwrap();

        ensure_keystore(&context).unwrap();
        assert_eq!(std::fs::read(&context.resources.keystore).unwrap(), b"keystore");
    }

    #[test]
    fn keytool_resolves_next_to_java() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        context.resources.java = PathBuf::from("/opt/jdk/bin/java");
        assert_eq!(keytool_path(&context), PathBuf::from("/opt/jdk/bin/keytool"));

        context.resources.java = PathBuf::from("java");
        assert_eq!(keytool_path(&context), PathBuf::from("keytool"));
    }
}

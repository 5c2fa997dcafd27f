//! Final artifact assembly.

use crate::context::BuildContext;
use crate::task::{Task, TaskError, TaskResult};

/// Copies the finished package into the deploy directory under the app's
/// name. A missing artifact at this point means an upstream stage lied
/// about succeeding, which is fatal.
#[derive(Debug)]
pub struct CreateOutputBundle;

impl Task for CreateOutputBundle {
    fn name(&self) -> &'static str {
        "create-output-bundle"
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult {
        let artifact = context
            .artifact
            .clone()
            .ok_or_else(|| TaskError::new("no app package was produced"))?;
        if !artifact.is_file() {
            return Err(TaskError::new(format!(
                "app package {} is missing on disk",
                artifact.display()
            )));
        }

        let dest = context.paths.deploy_dir().join(format!(
            "{}.{}",
            context.project.name,
            context.kind().extension()
        ));
        std::fs::create_dir_all(context.paths.deploy_dir())?;
        std::fs::copy(&artifact, &dest)?;
        context
            .reporter
            .info(&format!("built {}", dest.display()));
        context.artifact = Some(dest);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use tempfile::tempdir;

    #[test]
    fn copies_artifact_into_deploy_dir() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let signed = context.paths.tmp_dir().join("Paint-signed.apk");
        std::fs::write(&signed, b"apk").unwrap();
        context.artifact = Some(signed);

        CreateOutputBundle.execute(&mut context).unwrap();

        let deployed = context.paths.deploy_dir().join("Paint.apk");
        assert!(deployed.is_file());
        assert_eq!(context.artifact.as_deref(), Some(deployed.as_path()));
    }

    #[test]
    fn vanished_artifact_is_a_contract_violation() {
        let tmp = tempdir().unwrap();
        let mut context = test_context(tmp.path());
        context.artifact = Some(context.paths.tmp_dir().join("gone.apk"));

        let err = CreateOutputBundle.execute(&mut context).unwrap_err();
        assert!(err.message().contains("missing on disk"));
    }
}

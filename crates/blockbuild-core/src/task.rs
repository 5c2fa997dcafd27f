//! The stage interface and the pipeline driver.
//!
//! A build is an ordered list of [`Task`]s run against one shared
//! [`BuildContext`]; the first failing stage aborts the rest. Stages carry
//! no private state across invocations — everything they produce goes into
//! the context.

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use thiserror::Error;
use tracing::debug;

use crate::context::BuildContext;

/// The distribution artifact format a pipeline produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PackageKind {
    /// Standalone installable package.
    Apk,
    /// App bundle, signed downstream by the distribution channel.
    Aab,
}

impl PackageKind {
    /// File extension of the final artifact.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Apk => "apk",
            Self::Aab => "aab",
        }
    }
}

impl fmt::Display for PackageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for PackageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "apk" => Ok(Self::Apk),
            "aab" => Ok(Self::Aab),
            other => Err(format!("unknown package kind {other:?} (expected apk or aab)")),
        }
    }
}

/// A failed stage: human-readable message plus the underlying cause when
/// one exists. Immutable once produced.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaskError {
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            cause: None,
        }
    }

    pub fn with_cause(
        message: impl Into<String>,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            cause: Some(cause.into()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        Self::with_cause("I/O error", err)
    }
}

impl From<anyhow::Error> for TaskError {
    fn from(err: anyhow::Error) -> Self {
        let message = err.to_string();
        Self {
            message,
            cause: Some(err.into()),
        }
    }
}

/// Outcome of one stage; a pipeline run is the reduction of its stage list
/// to the first error, or success.
pub type TaskResult = Result<(), TaskError>;

/// One named, ordered unit of the build.
pub trait Task {
    /// Stable stage name, used for reporting and logs.
    fn name(&self) -> &'static str;

    /// Which package kinds this stage participates in. Stages that apply
    /// everywhere keep the default.
    fn applies_to(&self, kind: PackageKind) -> bool {
        let _ = kind;
        true
    }

    fn execute(&self, context: &mut BuildContext) -> TaskResult;
}

/// An ordered stage sequence bound to one package kind.
pub struct Pipeline {
    kind: PackageKind,
    tasks: Vec<Box<dyn Task>>,
}

impl Pipeline {
    pub fn new(kind: PackageKind, tasks: Vec<Box<dyn Task>>) -> Self {
        Self { kind, tasks }
    }

    pub fn kind(&self) -> PackageKind {
        self.kind
    }

    /// Names of the stages that will actually run, in order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|t| t.applies_to(self.kind))
            .map(|t| t.name())
            .collect()
    }

    /// Run every applicable stage in order, stopping at the first error.
    pub fn run(&self, context: &mut BuildContext) -> TaskResult {
        for task in &self.tasks {
            if !task.applies_to(self.kind) {
                debug!(stage = task.name(), kind = %self.kind, "stage skipped");
                continue;
            }
            context.reporter.task_start(task.name());
            let started = Instant::now();
            match task.execute(context) {
                Ok(()) => {
                    context.reporter.task_done(task.name(), started.elapsed());
                }
                Err(err) => {
                    context
                        .reporter
                        .error(&format!("{}: {err}", task.name()));
                    return Err(err);
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("kind", &self.kind)
            .field("stages", &self.stage_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::test_context;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Recorded {
        name: &'static str,
        fail: bool,
        apk_only: bool,
        runs: Arc<AtomicUsize>,
    }

    impl Task for Recorded {
        fn name(&self) -> &'static str {
            self.name
        }
        fn applies_to(&self, kind: PackageKind) -> bool {
            !self.apk_only || kind == PackageKind::Apk
        }
        fn execute(&self, _: &mut BuildContext) -> TaskResult {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(TaskError::new(format!("{} exploded", self.name)))
            } else {
                Ok(())
            }
        }
    }

    fn stage(name: &'static str, fail: bool, apk_only: bool) -> (Box<dyn Task>, Arc<AtomicUsize>) {
        let runs = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Recorded {
                name,
                fail,
                apk_only,
                runs: runs.clone(),
            }),
            runs,
        )
    }

    #[test]
    fn failure_short_circuits_remaining_stages() {
        let tmp = tempfile::tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let (first, first_runs) = stage("first", false, false);
        let (second, second_runs) = stage("second", true, false);
        let (third, third_runs) = stage("third", false, false);

        let pipeline = Pipeline::new(PackageKind::Apk, vec![first, second, third]);
        let err = pipeline.run(&mut context).unwrap_err();

        assert_eq!(err.message(), "second exploded");
        assert_eq!(first_runs.load(Ordering::SeqCst), 1);
        assert_eq!(second_runs.load(Ordering::SeqCst), 1);
        assert_eq!(third_runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn inapplicable_stages_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let mut context = test_context(tmp.path());
        let (signing, signing_runs) = stage("sign", false, true);

        let pipeline = Pipeline::new(PackageKind::Aab, vec![signing]);
        pipeline.run(&mut context).unwrap();

        assert_eq!(signing_runs.load(Ordering::SeqCst), 0);
        assert!(pipeline.stage_names().is_empty());
    }

    #[test]
    fn package_kind_parses() {
        assert_eq!("apk".parse::<PackageKind>().unwrap(), PackageKind::Apk);
        assert_eq!("AAB".parse::<PackageKind>().unwrap(), PackageKind::Aab);
        assert!("ipa".parse::<PackageKind>().is_err());
    }

    #[test]
    fn task_error_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err = TaskError::with_cause("dexer input missing", io);
        assert_eq!(err.message(), "dexer input missing");
        assert!(std::error::Error::source(&err).is_some());
    }
}

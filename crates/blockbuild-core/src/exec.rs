//! External tool execution.
//!
//! Every native tool the pipeline drives (dexer, resource compiler,
//! signer, zip aligner) goes through [`run`]: synchronous, bounded by a
//! timeout class, stdout/stderr captured into caller-provided sinks.
//! Success is strictly "exited with status zero within the deadline" —
//! spawn failures and timeouts are reported the same way a non-zero exit
//! is, with the details only in the captured streams.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;

use tempfile::TempDir;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

/// Timeout classes for external tools.
///
/// Light tools (zipalign, apksigner, keytool) get [`Short`]; heavyweight
/// dex/compile/link steps get [`Long`]. A timeout is indistinguishable
/// from a failed exit for the caller.
///
/// [`Short`]: ToolTimeout::Short
/// [`Long`]: ToolTimeout::Long
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolTimeout {
    Short,
    Long,
}

impl ToolTimeout {
    pub fn duration(self) -> Duration {
        match self {
            Self::Short => Duration::from_secs(2 * 60),
            Self::Long => Duration::from_secs(15 * 60),
        }
    }
}

/// Command lines longer than this are spilled to an `@argfile`.
const ARGFILE_THRESHOLD: usize = 32 * 1024;

/// Run `argv` in `workdir`, capturing output into the given sinks.
///
/// Returns `true` only on a zero exit status within the deadline. The
/// child is killed on timeout.
pub fn run(
    workdir: &Path,
    argv: &[String],
    out: &mut dyn Write,
    err: &mut dyn Write,
    timeout: ToolTimeout,
) -> bool {
    run_with_deadline(workdir, argv, out, err, timeout.duration())
}

/// Like [`run`], but spills everything after the program to a JVM-style
/// `@argfile` when the flattened command line exceeds the threshold.
/// Dexer input lists routinely blow past OS argument limits; callers get
/// one capability instead of choosing an invocation style.
pub fn run_autofile(
    workdir: &Path,
    argv: &[String],
    out: &mut dyn Write,
    err: &mut dyn Write,
    timeout: ToolTimeout,
) -> bool {
    let flattened: usize = argv.iter().map(|a| a.len() + 1).sum();
    if argv.len() < 2 || flattened <= ARGFILE_THRESHOLD {
        return run(workdir, argv, out, err, timeout);
    }

    match write_argfile(&argv[1..]) {
        Ok((scratch, argfile)) => {
            let spilled = vec![argv[0].clone(), format!("@{}", argfile.display())];
            let ok = run(workdir, &spilled, out, err, timeout);
            drop(scratch);
            ok
        }
        Err(e) => {
            warn!("could not write argfile ({e}); falling back to direct argv");
            run(workdir, argv, out, err, timeout)
        }
    }
}

fn run_with_deadline(
    workdir: &Path,
    argv: &[String],
    out: &mut dyn Write,
    err: &mut dyn Write,
    deadline: Duration,
) -> bool {
    let Some((program, args)) = argv.split_first() else {
        let _ = writeln!(err, "empty argument vector");
        return false;
    };

    debug!(program = %program, args = args.len(), "spawning external tool");

    let mut child = match Command::new(program)
        .args(args)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            let _ = writeln!(err, "failed to spawn {program}: {e}");
            return false;
        }
    };

    // Drain both pipes on background threads so a chatty child cannot
    // deadlock against a full pipe while we block in wait.
    let stdout_thread = child.stdout.take().map(drain);
    let stderr_thread = child.stderr.take().map(drain);

    let status = match child.wait_timeout(deadline) {
        Ok(Some(status)) => Some(status),
        Ok(None) => {
            let _ = child.kill();
            let _ = child.wait();
            None
        }
        Err(e) => {
            let _ = writeln!(err, "failed waiting for {program}: {e}");
            let _ = child.kill();
            let _ = child.wait();
            None
        }
    };

    if let Some(handle) = stdout_thread {
        let _ = out.write_all(&handle.join().unwrap_or_default());
    }
    if let Some(handle) = stderr_thread {
        let _ = err.write_all(&handle.join().unwrap_or_default());
    }

    match status {
        Some(status) if status.success() => true,
        Some(status) => {
            let _ = writeln!(err, "{program} exited with {status}");
            false
        }
        None => {
            let _ = writeln!(err, "{program} timed out after {}s", deadline.as_secs());
            false
        }
    }
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        buf
    })
}

/// Write one quoted argument per line, JVM argfile style. The scratch dir
/// keeps the file alive until the tool has exited.
fn write_argfile(args: &[String]) -> std::io::Result<(TempDir, PathBuf)> {
    let scratch = tempfile::Builder::new().prefix("blockbuild-args-").tempdir()?;
    let path = scratch.path().join("argv.txt");
    let mut file = File::create(&path)?;
    for arg in args {
        writeln!(file, "\"{}\"", escape_argfile(arg))?;
    }
    file.sync_all()?;
    Ok((scratch, path))
}

fn escape_argfile(arg: &str) -> String {
    arg.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Last `n` lines of a captured stream, for error reporting.
pub fn tail(captured: &[u8], n: usize) -> String {
    let text = String::from_utf8_lossy(captured);
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".to_string(), "-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout_and_succeeds() {
        let tmp = tempdir().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let ok = run(
            tmp.path(),
            &sh("echo hello"),
            &mut out,
            &mut err,
            ToolTimeout::Short,
        );
        assert!(ok);
        assert_eq!(String::from_utf8_lossy(&out).trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_failure_with_diagnostics() {
        let tmp = tempdir().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let ok = run(
            tmp.path(),
            &sh("echo oops >&2; exit 3"),
            &mut out,
            &mut err,
            ToolTimeout::Short,
        );
        assert!(!ok);
        let err = String::from_utf8_lossy(&err);
        assert!(err.contains("oops"));
        assert!(err.contains("exited with"));
    }

    #[test]
    fn missing_executable_is_failure() {
        let tmp = tempdir().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let argv = vec!["/definitely/not/a/real/tool".to_string()];
        assert!(!run(tmp.path(), &argv, &mut out, &mut err, ToolTimeout::Short));
        assert!(String::from_utf8_lossy(&err).contains("failed to spawn"));
    }

    #[test]
    fn timeout_kills_the_child() {
        let tmp = tempdir().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let ok = run_with_deadline(
            tmp.path(),
            &sh("sleep 30"),
            &mut out,
            &mut err,
            Duration::from_millis(200),
        );
        assert!(!ok);
        assert!(String::from_utf8_lossy(&err).contains("timed out"));
    }

    #[test]
    fn runs_in_the_working_directory() {
        let tmp = tempdir().unwrap();
        let mut out = Vec::new();
        let mut err = Vec::new();
        assert!(run(
            tmp.path(),
            &sh("pwd"),
            &mut out,
            &mut err,
            ToolTimeout::Short,
        ));
        let reported = String::from_utf8_lossy(&out);
        let canonical = tmp.path().canonicalize().unwrap();
        assert_eq!(
            Path::new(reported.trim()).canonicalize().unwrap(),
            canonical
        );
    }

    #[test]
    fn argfile_escaping_round_trips() {
        assert_eq!(escape_argfile(r#"a"b"#), r#"a\"b"#);
        assert_eq!(escape_argfile(r"C:\tmp"), r"C:\\tmp");
    }

    #[test]
    fn argfile_holds_one_quoted_argument_per_line() {
        let args = vec!["a b".to_string(), "c\"d".to_string()];
        let (scratch, path) = write_argfile(&args).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "\"a b\"\n\"c\\\"d\"\n");
        drop(scratch);
    }

    #[test]
    fn tail_returns_last_lines() {
        let captured = b"one\ntwo\nthree\n";
        assert_eq!(tail(captured, 2), "two\nthree");
        assert_eq!(tail(captured, 10), "one\ntwo\nthree");
    }
}

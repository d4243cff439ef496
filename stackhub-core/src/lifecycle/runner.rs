//! Running component verbs as external processes.

use crate::error::{HubError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, instrument};

/// One verb invocation of one component.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub component: String,
    /// Script name, `<verb>` or `<verb>-test`
    pub verb: String,
    pub dir: PathBuf,
    pub env: BTreeMap<String, String>,
    /// Copy child output to our stdout/stderr while capturing it
    pub relay: bool,
}

#[derive(Debug, Clone, Default)]
pub struct RunOutcome {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Runs component verbs.
#[async_trait]
pub trait ComponentRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> Result<RunOutcome>;
}

/// How a component implements a verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Implementation {
    /// Executable `<dir>/<verb>` or `<dir>/bin/<verb>`
    Executable(PathBuf),
    /// `<dir>/<verb>.sh`, run with `sh`
    Shell(PathBuf),
    /// `make <verb>` in `<dir>`
    Make,
}

/// Memoized implementation lookups, keyed by directory and verb.
#[derive(Debug, Default)]
pub struct ImplementationCache {
    entries: HashMap<(PathBuf, String), Option<Implementation>>,
}

impl ImplementationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&mut self, dir: &Path, verb: &str) -> Option<Implementation> {
        self.entries
            .entry((dir.to_path_buf(), verb.to_string()))
            .or_insert_with(|| detect(dir, verb))
            .clone()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn detect(dir: &Path, verb: &str) -> Option<Implementation> {
    for candidate in [dir.join(verb), dir.join("bin").join(verb)] {
        if is_executable(&candidate) {
            return Some(Implementation::Executable(candidate));
        }
    }
    let script = dir.join(format!("{}.sh", verb));
    if script.is_file() {
        return Some(Implementation::Shell(script));
    }
    if makefile_has_target(dir, verb) {
        return Some(Implementation::Make);
    }
    None
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn makefile_has_target(dir: &Path, verb: &str) -> bool {
    let Ok(content) = std::fs::read_to_string(dir.join("Makefile")) else {
        return false;
    };
    let target = format!("{}:", verb);
    content.lines().any(|line| line.starts_with(&target))
}

/// Runs verbs as child processes of this one.
#[derive(Debug, Default)]
pub struct ProcessRunner {
    cache: Mutex<ImplementationCache>,
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn implementation(&self, dir: &Path, verb: &str) -> Option<Implementation> {
        match self.cache.lock() {
            Ok(mut cache) => cache.lookup(dir, verb),
            Err(_) => detect(dir, verb),
        }
    }
}

#[async_trait]
impl ComponentRunner for ProcessRunner {
    #[instrument(skip_all, fields(component = %invocation.component, verb = %invocation.verb))]
    async fn run(&self, invocation: &Invocation) -> Result<RunOutcome> {
        let implementation = self.implementation(&invocation.dir, &invocation.verb).ok_or_else(|| {
            HubError::NoImplementation {
                component: invocation.component.clone(),
                verb: invocation.verb.clone(),
                dir: invocation.dir.clone(),
            }
        })?;
        debug!("Running {:?}", implementation);

        let (program, mut cmd) = match &implementation {
            Implementation::Executable(path) => (path.display().to_string(), Command::new(path)),
            Implementation::Shell(path) => {
                let mut cmd = Command::new("sh");
                cmd.arg(path);
                (format!("sh {}", path.display()), cmd)
            }
            Implementation::Make => {
                let mut cmd = Command::new("make");
                cmd.arg(&invocation.verb);
                (format!("make {}", invocation.verb), cmd)
            }
        };

        cmd.current_dir(&invocation.dir)
            .env_clear()
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn().map_err(|e| HubError::SpawnFailed {
            component: invocation.component.clone(),
            program: program.clone(),
            source: e,
        })?;

        let stdout = child.stdout.take().map(|s| tokio::spawn(pump(s, invocation.relay, false)));
        let stderr = child.stderr.take().map(|s| tokio::spawn(pump(s, invocation.relay, true)));

        let status = child.wait().await.map_err(|e| HubError::SpawnFailed {
            component: invocation.component.clone(),
            program,
            source: e,
        })?;

        // Both readers finish before the step counts as done.
        let stdout = collect(stdout, &invocation.component).await?;
        let stderr = collect(stderr, &invocation.component).await?;

        Ok(RunOutcome { code: status.code().unwrap_or(-1), stdout, stderr })
    }
}

async fn collect(
    handle: Option<JoinHandle<io::Result<String>>>,
    component: &str,
) -> Result<String> {
    let Some(handle) = handle else {
        return Ok(String::new());
    };
    handle
        .await
        .map_err(HubError::internal)?
        .map_err(|e| HubError::OutputCapture { component: component.to_string(), source: e })
}

/// Read a child stream to the end, optionally echoing each line.
///
/// Bytes that are not UTF-8 are replaced, the stream is still drained.
async fn pump<R: AsyncRead + Unpin>(stream: R, relay: bool, to_stderr: bool) -> io::Result<String> {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    let mut captured = String::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim_end_matches(&['\n', '\r'][..]);
        if relay {
            if to_stderr {
                eprintln!("{}", line);
            } else {
                println!("{}", line);
            }
        }
        captured.push_str(line);
        captured.push('\n');
    }
    Ok(captured)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(path: &Path, body: &str) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn test_detect_order() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect(dir.path(), "deploy"), None);

        std::fs::write(dir.path().join("Makefile"), "deploy:\n\techo hi\n").unwrap();
        assert_eq!(detect(dir.path(), "deploy"), Some(Implementation::Make));
        assert_eq!(detect(dir.path(), "backup"), None);

        std::fs::write(dir.path().join("deploy.sh"), "echo hi\n").unwrap();
        assert!(matches!(detect(dir.path(), "deploy"), Some(Implementation::Shell(_))));

        write_script(&dir.path().join("bin").join("deploy"), "true");
        assert_eq!(
            detect(dir.path(), "deploy"),
            Some(Implementation::Executable(dir.path().join("bin").join("deploy")))
        );

        write_script(&dir.path().join("deploy"), "true");
        assert_eq!(
            detect(dir.path(), "deploy"),
            Some(Implementation::Executable(dir.path().join("deploy")))
        );
    }

    #[test]
    fn test_cache_memoizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ImplementationCache::new();
        assert_eq!(cache.lookup(dir.path(), "deploy"), None);
        write_script(&dir.path().join("deploy"), "true");
        // Still the memoized miss.
        assert_eq!(cache.lookup(dir.path(), "deploy"), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_run_captures_streams_and_env() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            &dir.path().join("deploy"),
            &[
                "echo \"component=$HUB_COMPONENT\"",
                "echo oops >&2",
                "echo Outputs:",
                "echo \"x = $VALUE\"",
                "exit 3",
            ]
            .join("\n"),
        );
        let invocation = Invocation {
            component: "app".into(),
            verb: "deploy".into(),
            dir: dir.path().to_path_buf(),
            env: BTreeMap::from([
                ("HUB_COMPONENT".to_string(), "app".to_string()),
                ("VALUE".to_string(), "42".to_string()),
            ]),
            relay: false,
        };
        let outcome = ProcessRunner::new().run(&invocation).await.unwrap();
        assert_eq!(outcome.code, 3);
        assert!(!outcome.success());
        assert!(outcome.stdout.contains("component=app"));
        assert!(outcome.stdout.contains("x = 42"));
        assert_eq!(outcome.stderr, "oops\n");
    }

    #[tokio::test]
    async fn test_pump_replaces_invalid_utf8_and_keeps_reading() {
        let input: &[u8] = b"caf\xe9\r\nOutputs:\nx = 1";
        let captured = pump(input, false, false).await.unwrap();
        assert_eq!(captured, "caf\u{fffd}\nOutputs:\nx = 1\n");
    }

    #[tokio::test]
    async fn test_run_captures_outputs_after_latin1_bytes() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            &dir.path().join("deploy"),
            &[
                "printf 'caf\\351\\n'",
                "i=0",
                "while [ $i -lt 2000 ]; do echo filler; i=$((i+1)); done",
                "echo Outputs:",
                "echo 'x = 1'",
            ]
            .join("\n"),
        );
        let invocation = Invocation {
            component: "app".into(),
            verb: "deploy".into(),
            dir: dir.path().to_path_buf(),
            env: BTreeMap::new(),
            relay: false,
        };
        let outcome = ProcessRunner::new().run(&invocation).await.unwrap();
        assert!(outcome.success());
        assert!(outcome.stdout.starts_with("caf\u{fffd}\n"));
        assert!(outcome.stdout.contains("x = 1"));
        assert_eq!(outcome.stdout.lines().filter(|l| *l == "filler").count(), 2000);
    }

    #[tokio::test]
    async fn test_missing_implementation() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = Invocation {
            component: "app".into(),
            verb: "deploy-test".into(),
            dir: dir.path().to_path_buf(),
            env: BTreeMap::new(),
            relay: false,
        };
        let err = ProcessRunner::new().run(&invocation).await.unwrap_err();
        assert!(matches!(err, HubError::NoImplementation { .. }));
    }
}

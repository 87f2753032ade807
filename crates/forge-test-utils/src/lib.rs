//! Testing utilities for the Forge workspace
//!
//! - [`FakeRuntime`]: scripted container runtime CLI
//! - [`ScriptedGenerator`] / [`ScriptedTester`]: canned capability replies
//! - [`TestProject`]: temporary project tree with an orchestrator preset
//!
//! Only for use from `tests/` directories.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc, clippy::unwrap_used)]

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use forge_core::{
    CapabilityError, CodeGenerator, ForgeConfig, GenerationRequest, OrchestratorBuilder,
    PipelineConfig, ProgressEvent, TestGenerator, TestRequest,
};
use forge_core::guard::{GuardConfig, ManualClock, StabilityGuard};
use forge_sandbox::{Sandbox, SandboxConfig};

// ---------------------------------------------------------------------------
// Container runtime

const FAKE_RUNTIME: &str = r#"#!/bin/sh
STATE='@STATE@'
echo "$*" >> "$STATE/invocations.log"
cmd="$1"
shift
case "$cmd" in
  info)
    code=0
    [ -f "$STATE/info_exit" ] && code=$(cat "$STATE/info_exit")
    exit "$code"
    ;;
  run)
    if [ -f "$STATE/daemon_down" ]; then
      echo "docker: Cannot connect to the Docker daemon at unix:///var/run/docker.sock. Is the docker daemon running?" >&2
      exit 125
    fi
    name=""
    script=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --name) name="$2"; shift 2 ;;
        -e) export "$2"; shift 2 ;;
        -c) script="$2"; shift 2 ;;
        *) shift ;;
      esac
    done
    echo "$name" >> "$STATE/containers"
    exec sh -c "$script"
    ;;
  rm)
    for arg in "$@"; do
      case "$arg" in
        -*) ;;
        *)
          touch "$STATE/containers"
          grep -vxF "$arg" "$STATE/containers" > "$STATE/containers.tmp"
          mv "$STATE/containers.tmp" "$STATE/containers"
          ;;
      esac
    done
    exit 0
    ;;
  ps)
    filter=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --filter) filter="${2#name=}"; shift 2 ;;
        *) shift ;;
      esac
    done
    [ -f "$STATE/containers" ] && grep -F "$filter" "$STATE/containers"
    exit 0
    ;;
esac
exit 0
"#;

/// Shell script standing in for `docker`.
///
/// Logs every invocation, tracks started containers until `rm -f`, runs the
/// container command with `sh -c` in the caller's working directory, and can
/// simulate an unreachable runtime or a daemon outage.
#[derive(Debug)]
pub struct FakeRuntime {
    dir: TempDir,
}

impl FakeRuntime {
    pub fn install() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = FAKE_RUNTIME.replace("@STATE@", &dir.path().display().to_string());
        let path = dir.path().join("fake-docker");
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        Self { dir }
    }

    /// Executable to configure as the runtime
    pub fn path(&self) -> PathBuf {
        self.dir.path().join("fake-docker")
    }

    /// Sandbox config pointing at this runtime
    pub fn config(&self) -> SandboxConfig {
        SandboxConfig::default().with_runtime(self.path().display().to_string())
    }

    /// Exit code of `info` calls
    pub fn set_info_exit(&self, code: i32) {
        fs::write(self.dir.path().join("info_exit"), code.to_string()).unwrap();
    }

    /// Make `run` fail like an unreachable daemon
    pub fn set_daemon_down(&self, down: bool) {
        let flag = self.dir.path().join("daemon_down");
        if down {
            fs::write(flag, "").unwrap();
        } else {
            let _ = fs::remove_file(flag);
        }
    }

    /// Argument lists of every call so far
    pub fn invocations(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("invocations.log"))
    }

    /// Containers started and not yet removed
    pub fn containers(&self) -> Vec<String> {
        read_lines(&self.dir.path().join("containers"))
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// Capabilities

/// Code generator replaying canned replies.
///
/// Once the script runs out, the last reply repeats.
#[derive(Debug)]
pub struct ScriptedGenerator {
    replies: Mutex<VecDeque<Result<String, CapabilityError>>>,
    last: Mutex<Option<Result<String, CapabilityError>>>,
    requests: Mutex<Vec<GenerationRequest>>,
    delay: Option<std::time::Duration>,
}

impl ScriptedGenerator {
    pub fn sequence(replies: Vec<Result<String, CapabilityError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    pub fn always(code: impl Into<String>) -> Self {
        Self::sequence(vec![Ok(code.into())])
    }

    /// Sleep before every reply
    #[must_use]
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl CodeGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, CapabilityError> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        next_reply(&self.replies, &self.last).unwrap_or(Err(CapabilityError::Empty))
    }
}

/// Test generator replaying canned plans.
///
/// `{session}` inside any string field is replaced by the request's session,
/// so concurrent pipelines get distinct test files.
#[derive(Debug)]
pub struct ScriptedTester {
    plans: Mutex<VecDeque<Result<Value, CapabilityError>>>,
    last: Mutex<Option<Result<Value, CapabilityError>>>,
    requests: Mutex<Vec<TestRequest>>,
}

impl ScriptedTester {
    pub fn sequence(plans: Vec<Result<Value, CapabilityError>>) -> Self {
        Self {
            plans: Mutex::new(plans.into()),
            last: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(plan: Value) -> Self {
        Self::sequence(vec![Ok(plan)])
    }

    pub fn requests(&self) -> Vec<TestRequest> {
        self.requests.lock().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl TestGenerator for ScriptedTester {
    async fn generate_tests(&self, request: &TestRequest) -> Result<Value, CapabilityError> {
        self.requests.lock().push(request.clone());
        let plan = next_reply(&self.plans, &self.last).unwrap_or(Err(CapabilityError::Empty))?;
        Ok(substitute(plan, &request.session))
    }
}

fn next_reply<T: Clone>(
    queue: &Mutex<VecDeque<T>>,
    last: &Mutex<Option<T>>,
) -> Option<T> {
    let mut last = last.lock();
    if let Some(next) = queue.lock().pop_front() {
        *last = Some(next);
    }
    last.clone()
}

fn substitute(value: Value, session: &str) -> Value {
    match value {
        Value::String(s) => Value::String(s.replace("{session}", session)),
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, session)))
                .collect(),
        ),
        other => other,
    }
}

/// Plan whose test program writes `observations` and exits `exit_code`
pub fn shell_plan(observations: &[i64], exit_code: i32) -> Value {
    let array = serde_json::to_string(observations).unwrap();
    json!({
        "test_file_path": "forge_test_{session}.sh",
        "test_code": format!("#!/bin/sh\nprintf '%s' '{array}' > \"$FORGE_OBSERVATIONS\"\nexit {exit_code}\n"),
        "lint_command": "sh -n forge_test_{session}.sh",
        "test_command": "sh forge_test_{session}.sh",
    })
}

/// `n` passing trials
pub fn passing_plan(n: usize) -> Value {
    shell_plan(&vec![0; n], 0)
}

/// `n` failing trials
pub fn failing_plan(n: usize) -> Value {
    shell_plan(&vec![1; n], 1)
}

// ---------------------------------------------------------------------------
// Project fixture

/// Temporary project tree
#[derive(Debug)]
pub struct TestProject {
    dir: TempDir,
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    #[must_use]
    pub fn with_file(self, relative: &str, content: &str) -> Self {
        self.write(relative, content);
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, content: &str) {
        let path = self.dir.path().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.dir.path().join(relative)).unwrap()
    }

    pub fn exists(&self, relative: &str) -> bool {
        self.dir.path().join(relative).exists()
    }

    /// Backups, generated test files and session directories left behind
    pub fn leftovers(&self) -> Vec<PathBuf> {
        let mut found = Vec::new();
        collect_leftovers(self.dir.path(), self.dir.path(), &mut found);
        found.sort();
        found
    }

    /// Guard over this project with a manual clock
    pub fn guard(&self, clock: Arc<ManualClock>) -> StabilityGuard {
        StabilityGuard::with_config(self.dir.path(), GuardConfig::default(), clock)
    }

    /// Orchestrator preset: native sandbox, short deadlines
    pub fn orchestrator(
        &self,
        generator: Arc<dyn CodeGenerator>,
        tester: Arc<dyn TestGenerator>,
    ) -> OrchestratorBuilder {
        let config = ForgeConfig::default().with_pipeline(
            PipelineConfig::default()
                .with_test_timeout_secs(5)
                .with_generation_timeout_secs(5),
        );
        OrchestratorBuilder::new(self.dir.path())
            .config(config)
            .generator(generator)
            .test_generator(tester)
            .sandbox(Arc::new(Sandbox::native(SandboxConfig::default())))
    }
}

fn collect_leftovers(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = path.strip_prefix(root).unwrap().to_path_buf();
        if path.is_dir() {
            if relative == Path::new(".forge/sessions") {
                if fs::read_dir(&path).map(|mut d| d.next().is_some()).unwrap_or(false) {
                    out.push(relative);
                }
            } else {
                collect_leftovers(root, &path, out);
            }
        } else if name.ends_with(".bak") || name.starts_with("forge_test_") {
            out.push(relative);
        }
    }
}

/// Drain a finished event stream
pub fn drain(rx: &mut UnboundedReceiver<ProgressEvent>) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

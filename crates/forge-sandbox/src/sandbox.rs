//! Container-first execution with native fallback

use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Command;

use crate::process::{run_captured, Captured};
use crate::{
    CancelToken, SandboxConfig, SandboxError, SandboxReport, CONTAINER_PREFIX, CONTAINER_WORKDIR,
    CPU_LIMIT, MEMORY_LIMIT, NETWORK_MODE,
};

/// Default hard deadline for one command
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for `rm -f` and `ps` housekeeping calls
const HOUSEKEEPING_TIMEOUT: Duration = Duration::from_secs(10);

/// Runtime stderr fragments that mean the daemon, not the command, failed
const DAEMON_ERRORS: &[&str] = &[
    "cannot connect to the docker daemon",
    "is the docker daemon running",
    "error during connect",
];

/// One command to run against a project tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecRequest {
    /// Shell command line
    pub command: String,
    /// Project root; mounted read-only in containers, cwd natively
    pub root: PathBuf,
    /// Root-relative directories the command may write to
    pub writable: Vec<PathBuf>,
    /// Extra environment variables
    pub env: Vec<(String, String)>,
    /// Hard deadline
    pub timeout: Duration,
}

impl ExecRequest {
    /// Request with the default deadline and no writable paths
    #[must_use]
    pub fn new(command: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            root: root.into(),
            writable: Vec::new(),
            env: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set the deadline
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allow writes below a root-relative directory
    #[inline]
    #[must_use]
    pub fn with_writable(mut self, relative: impl Into<PathBuf>) -> Self {
        self.writable.push(relative.into());
        self
    }

    /// Add an environment variable
    #[inline]
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Where commands currently run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Isolated container
    Container,
    /// Plain subprocess
    Native,
}

/// Isolated execution service.
///
/// Clones share the degraded flag: once the runtime fails, every clone
/// stays native for the rest of the session.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
    mode: Arc<Mutex<Mode>>,
}

impl Sandbox {
    /// Ask the container runtime for `info` and pick a mode
    pub async fn connect(config: SandboxConfig) -> Self {
        if !config.prefer_container {
            return Self::native(config);
        }
        let mut info = Command::new(&config.runtime);
        info.arg("info");
        let timeout = Duration::from_secs(config.info_timeout_secs);
        let mode = match run_captured(info, &config.runtime, timeout, &CancelToken::never(), false)
            .await
        {
            Ok(c) if c.exit_code == Some(0) => Mode::Container,
            Ok(c) => {
                tracing::warn!(
                    "container runtime {} unavailable (exit {:?}), isolation will be simulated",
                    config.runtime,
                    c.exit_code
                );
                Mode::Native
            }
            Err(e) => {
                tracing::warn!("container runtime check failed, isolation will be simulated: {}", e);
                Mode::Native
            }
        };
        Self {
            config,
            mode: Arc::new(Mutex::new(mode)),
        }
    }

    /// Never use containers
    #[must_use]
    pub fn native(config: SandboxConfig) -> Self {
        Self {
            config,
            mode: Arc::new(Mutex::new(Mode::Native)),
        }
    }

    /// Current mode
    #[inline]
    #[must_use]
    pub fn mode(&self) -> Mode {
        *self.mode.lock()
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Run `req`, in a container if possible.
    ///
    /// A runtime outage mid-session degrades this sandbox to native mode and
    /// reruns the command there.
    ///
    /// # Errors
    /// Returns [`SandboxError`] only when the native shell cannot be spawned.
    pub async fn run(
        &self,
        req: &ExecRequest,
        cancel: &CancelToken,
    ) -> Result<SandboxReport, SandboxError> {
        if self.mode() == Mode::Container {
            match self.run_container(req, cancel).await {
                Ok(report) => return Ok(report),
                Err(RuntimeFailure::Unavailable(detail)) => {
                    tracing::warn!("container runtime failed mid-session, degrading: {}", detail);
                }
                Err(RuntimeFailure::Spawn(e)) => {
                    tracing::warn!("container runtime could not start, degrading: {}", e);
                }
            }
            *self.mode.lock() = Mode::Native;
            metrics::counter!("forge_sandbox_degraded_total").increment(1);
        }
        self.run_native(req, cancel).await
    }

    /// Runtime arguments for a container named `name` running `req`
    #[must_use]
    pub fn container_args(&self, name: &str, req: &ExecRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "run", "--rm", "--name", name, "--network", NETWORK_MODE, "--memory", MEMORY_LIMIT,
            "--cpus", CPU_LIMIT,
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        args.push("-v".into());
        args.push(format!("{}:{CONTAINER_WORKDIR}:ro", req.root.display()));
        for rel in &req.writable {
            args.push("-v".into());
            args.push(format!(
                "{}:{CONTAINER_WORKDIR}/{}:rw",
                req.root.join(rel).display(),
                slash_path(rel)
            ));
        }
        for (key, value) in &req.env {
            args.push("-e".into());
            args.push(format!("{key}={value}"));
        }
        args.extend([
            "-w".to_string(),
            CONTAINER_WORKDIR.to_string(),
            self.config.image.clone(),
            "sh".to_string(),
            "-c".to_string(),
            req.command.clone(),
        ]);
        args
    }

    /// Names of containers (running or not) whose name contains `filter`
    ///
    /// # Errors
    /// Returns [`SandboxError`] if the runtime cannot be spawned.
    pub async fn leftover_containers(&self, filter: &str) -> Result<Vec<String>, SandboxError> {
        let mut cmd = Command::new(&self.config.runtime);
        cmd.args(["ps", "-a", "--filter"])
            .arg(format!("name={filter}"))
            .args(["--format", "{{.Names}}"]);
        let captured = run_captured(
            cmd,
            &self.config.runtime,
            HOUSEKEEPING_TIMEOUT,
            &CancelToken::never(),
            false,
        )
        .await?;
        if captured.exit_code != Some(0) {
            tracing::debug!("container listing failed: {}", captured.stderr.trim());
            return Ok(Vec::new());
        }
        Ok(captured
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn run_container(
        &self,
        req: &ExecRequest,
        cancel: &CancelToken,
    ) -> Result<SandboxReport, RuntimeFailure> {
        let name = container_name();
        let mut cmd = Command::new(&self.config.runtime);
        cmd.args(self.container_args(&name, req)).current_dir(&req.root);

        let guard = ContainerGuard::new(&self.config.runtime, &name);
        let result = run_captured(cmd, &self.config.runtime, req.timeout, cancel, false).await;
        guard.remove().await;

        let captured = result.map_err(RuntimeFailure::Spawn)?;
        if runtime_unavailable(&captured) {
            return Err(RuntimeFailure::Unavailable(format!(
                "exit {:?}: {}",
                captured.exit_code,
                captured.stderr.trim()
            )));
        }
        metrics::counter!("forge_sandbox_runs_total", "mode" => "container").increment(1);
        tracing::debug!(
            container = %name,
            exit = ?captured.exit_code,
            timed_out = captured.timed_out,
            "container run finished"
        );
        Ok(into_report(captured, false, Some(name)))
    }

    async fn run_native(
        &self,
        req: &ExecRequest,
        cancel: &CancelToken,
    ) -> Result<SandboxReport, SandboxError> {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&req.command).current_dir(&req.root);
        cmd.env_clear();
        cmd.env(
            "PATH",
            std::env::var("PATH").unwrap_or_else(|_| "/usr/local/bin:/usr/bin:/bin".to_string()),
        );
        cmd.env("TERM", "xterm-256color");
        cmd.env("LANG", "C.UTF-8");
        for (key, value) in &req.env {
            cmd.env(key, value);
        }

        let captured = run_captured(cmd, "sh", req.timeout, cancel, true).await?;
        metrics::counter!("forge_sandbox_runs_total", "mode" => "native").increment(1);
        tracing::debug!(
            exit = ?captured.exit_code,
            timed_out = captured.timed_out,
            "native run finished"
        );
        Ok(into_report(captured, true, None))
    }
}

enum RuntimeFailure {
    Unavailable(String),
    Spawn(SandboxError),
}

/// Force-removes a container; falls back to a detached blocking removal if
/// dropped before [`ContainerGuard::remove`] completed.
#[derive(Debug)]
struct ContainerGuard {
    runtime: String,
    name: String,
    armed: bool,
}

impl ContainerGuard {
    fn new(runtime: &str, name: &str) -> Self {
        Self {
            runtime: runtime.to_string(),
            name: name.to_string(),
            armed: true,
        }
    }

    async fn remove(mut self) {
        let status = tokio::time::timeout(
            HOUSEKEEPING_TIMEOUT,
            Command::new(&self.runtime)
                .args(["rm", "-f", self.name.as_str()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status(),
        )
        .await;
        match status {
            Ok(Ok(_)) => self.armed = false,
            Ok(Err(e)) => tracing::warn!(container = %self.name, "container removal failed: {}", e),
            Err(_) => tracing::warn!(container = %self.name, "container removal timed out"),
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let runtime = std::mem::take(&mut self.runtime);
        let name = std::mem::take(&mut self.name);
        tracing::debug!(container = %name, "removing container from drop");
        std::thread::spawn(move || {
            let _ = std::process::Command::new(runtime)
                .args(["rm", "-f", name.as_str()])
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();
        });
    }
}

fn container_name() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("{CONTAINER_PREFIX}{}", &id[..8])
}

fn runtime_unavailable(captured: &Captured) -> bool {
    if captured.timed_out || captured.cancelled || captured.exit_code == Some(0) {
        return false;
    }
    if captured.exit_code == Some(125) {
        return true;
    }
    let stderr = captured.stderr.to_lowercase();
    DAEMON_ERRORS.iter().any(|fragment| stderr.contains(fragment))
}

fn into_report(captured: Captured, simulated: bool, container: Option<String>) -> SandboxReport {
    SandboxReport {
        stdout: captured.stdout,
        stderr: captured.stderr,
        exit_code: captured.exit_code,
        timed_out: captured.timed_out,
        cancelled: captured.cancelled,
        simulated,
        container,
        elapsed_ms: u64::try_from(captured.elapsed.as_millis()).unwrap_or(u64::MAX),
    }
}

fn slash_path(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

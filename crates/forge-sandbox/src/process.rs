//! Spawn, capture incrementally, and kill on deadline or cancellation

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;

use crate::{CancelToken, SandboxError};

/// Grace period for pipe readers after the child is gone; orphaned
/// grandchildren may keep the pipes open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

type Buffer = Arc<Mutex<Vec<u8>>>;

/// Raw result of one process
#[derive(Debug, Default)]
pub(crate) struct Captured {
    pub(crate) stdout: String,
    pub(crate) stderr: String,
    pub(crate) exit_code: Option<i32>,
    pub(crate) timed_out: bool,
    pub(crate) cancelled: bool,
    pub(crate) elapsed: Duration,
}

#[derive(Clone, Copy)]
enum Ending {
    Exited(std::process::ExitStatus),
    TimedOut,
    Cancelled,
}

/// Run `cmd` to completion, deadline, or cancellation.
///
/// Output read before a kill is preserved. With `own_group` the child leads
/// a new process group which is killed as a whole.
pub(crate) async fn run_captured(
    mut cmd: Command,
    program: &str,
    timeout: Duration,
    cancel: &CancelToken,
    own_group: bool,
) -> Result<Captured, SandboxError> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    {
        if own_group {
            cmd.process_group(0);
        }
    }

    let started = Instant::now();
    let mut child = cmd.spawn().map_err(|source| SandboxError::Spawn {
        program: program.to_string(),
        source,
    })?;

    let stdout_buf = Buffer::default();
    let stderr_buf = Buffer::default();
    let readers = [
        child.stdout.take().map(|pipe| drain(pipe, stdout_buf.clone())),
        child.stderr.take().map(|pipe| drain(pipe, stderr_buf.clone())),
    ];

    let ending = tokio::select! {
        status = child.wait() => Ending::Exited(status?),
        () = tokio::time::sleep(timeout) => Ending::TimedOut,
        () = cancel.cancelled() => Ending::Cancelled,
    };

    let mut captured = Captured::default();
    match ending {
        Ending::Exited(status) => captured.exit_code = status.code(),
        Ending::TimedOut | Ending::Cancelled => {
            captured.timed_out = matches!(ending, Ending::TimedOut);
            captured.cancelled = matches!(ending, Ending::Cancelled);
            if own_group {
                kill_group(child.id());
            }
            if let Err(e) = child.start_kill() {
                tracing::debug!("kill after deadline failed: {}", e);
            }
            let _ = tokio::time::timeout(DRAIN_GRACE * 4, child.wait()).await;
        }
    }

    for reader in readers.into_iter().flatten() {
        let abort = reader.abort_handle();
        if tokio::time::timeout(DRAIN_GRACE, reader).await.is_err() {
            abort.abort();
        }
    }

    captured.stdout = String::from_utf8_lossy(&stdout_buf.lock()).into_owned();
    captured.stderr = String::from_utf8_lossy(&stderr_buf.lock()).into_owned();
    captured.elapsed = started.elapsed();
    Ok(captured)
}

fn drain<R>(mut pipe: R, sink: Buffer) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => sink.lock().extend_from_slice(&chunk[..n]),
            }
        }
    })
}

/// SIGKILL the child's process group, grandchildren included
fn kill_group(pid: Option<u32>) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        let Some(pid) = pid.and_then(|pid| i32::try_from(pid).ok()) else {
            tracing::warn!("process group kill skipped: child pid unknown");
            return;
        };
        match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
            // group already gone
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => tracing::warn!(pid, "process group kill failed: {}", e),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
    }
}

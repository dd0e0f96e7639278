//! Process driver: spawn, decode, and terminate one child process per
//! session.

pub mod codec;
pub mod command;
pub mod runner;
pub mod stream;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Handle to a session's running job.
///
/// Holds everything the rest of the server needs to control the child
/// without owning the `Child` itself (which lives inside the runner
/// task): the process-group id for signalling, stdin for plan-gate
/// tokens, and the cancellation token tying the reader tasks together.
#[derive(Debug)]
pub struct JobHandle {
    /// Unique id distinguishing this job from any successor, so a stale
    /// exit notification for an already-replaced handle is a no-op.
    pub id: Uuid,
    /// Process-group id of the child, when known.
    pub pgid: Option<i32>,
    /// Child stdin for plan approve/reject tokens.
    pub stdin: Option<ChildStdin>,
    /// Cancels the runner and stderr tasks; the child has
    /// `kill_on_drop` set, so dropping it in the runner kills it.
    pub cancel: CancellationToken,
    /// Plan-gate latch: set once `plan_waiting` has been emitted for
    /// the current response cycle, cleared on approval.
    pub plan_latch: Arc<AtomicBool>,
}

impl JobHandle {
    /// Request termination: signal the process group and cancel the
    /// reader tasks.
    ///
    /// Immediate-request, best-effort-complete: the caller clears the
    /// session's handle synchronously while OS-level termination
    /// finishes asynchronously.
    pub fn kill(&self) {
        #[cfg(unix)]
        if let Some(pgid) = self.pgid {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;
            if let Err(err) = killpg(Pid::from_raw(pgid), Signal::SIGTERM) {
                debug!(pgid, %err, "killpg failed (process may already be gone)");
            }
        }
        self.cancel.cancel();
    }
}

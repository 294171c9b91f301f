//! Process-group signalling for commands started by an environment.
//!
//! Each command runs in its own process group (unix) so that interrupting or
//! killing it also reaches any children it spawned.

use tokio::process::{Child, Command};

/// Puts the command in a fresh process group.
pub(super) fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    cmd.process_group(0);
    #[cfg(not(unix))]
    let _ = cmd;
}

/// Sends SIGINT to the process group led by `pid`.
#[cfg(unix)]
pub(super) fn interrupt(pid: u32) {
    signal_group(pid, libc::SIGINT);
}

/// Graceful interrupts are not supported on this platform.
#[cfg(not(unix))]
pub(super) fn interrupt(_pid: u32) {}

/// Kills the child (and its process group on unix) and waits for it to exit.
pub(super) async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        signal_group(pid, libc::SIGKILL);
    }
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Kills whatever is left of the process group led by `pid`, such as
/// background children that outlived the command itself.
#[cfg(unix)]
pub(super) fn kill_group(pid: u32) {
    signal_group(pid, libc::SIGKILL);
}

#[cfg(not(unix))]
pub(super) fn kill_group(_pid: u32) {}

#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pgid only yields ESRCH.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

/// Signal that terminated the process, if any.
#[cfg(unix)]
pub(super) fn exit_signal(status: &std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
pub(super) fn exit_signal(_status: &std::process::ExitStatus) -> Option<i32> {
    None
}

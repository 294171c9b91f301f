//! # Shutdown signals for long-running daemons.
//!
//! [`shutdown_signal`] completes with the name of the first termination
//! signal the process receives, so the caller can log what stopped it.
//!
//! | Platform | Signals                        |
//! |----------|--------------------------------|
//! | Unix     | `SIGINT`, `SIGTERM`, `SIGQUIT` |
//! | other    | Ctrl-C                         |
//!
//! Child processes started by an [`Environment`](crate::Environment) live in
//! their own process groups, so a Ctrl-C in the terminal reaches the daemon
//! only and in-flight runs are stopped through cancellation.

/// Waits for a termination signal and returns its name.
///
/// Fails only if the signal handlers cannot be registered.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let name = tokio::select! {
        _ = sigint.recv() => "SIGINT",
        _ = sigterm.recv() => "SIGTERM",
        _ = sigquit.recv() => "SIGQUIT",
    };
    Ok(name)
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("ctrl-c")
}

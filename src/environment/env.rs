//! # Environment: working directory, services and cancellable execution.
//!
//! ## Flow of `run_cli`
//! ```text
//! run_cli(name, args)
//!   ├─► canceled? ──────────────────────────► Err(Canceled)
//!   ├─► spawn (cwd = path, own process group, piped stdout/stderr)
//!   ├─► wait for exit  ◄─┬─ token cancelled ─► kill group, reap ─► Err(Canceled)
//!   │                    └─ cancel(false)    ─► SIGINT group (keeps waiting)
//!   ├─► append stdout + stderr to transcript
//!   └─► exit 0 ─► Ok | interrupted ─► Err(Canceled) | code ─► Err(Exit) | signal ─► Err(Signal)
//! ```
//!
//! ## Rules
//! - No retries: every failure goes straight back to the caller.
//! - The environment does not own the run; it is handed services and a token.
//! - Clones share state; a clone is what [`Environment::run_func`] hands to the function.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::future::Future;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::process;
use crate::error::EnvError;

/// Bytes of stderr kept in [`EnvError::Exit`].
const STDERR_TAIL: usize = 1024;

/// Per-attempt execution sandbox.
///
/// `S` is the bundle of platform services made available to code running
/// inside the environment; it is reachable through [`services`](Self::services)
/// or directly via `Deref`.
pub struct Environment<S: ?Sized> {
    inner: Arc<Inner<S>>,
}

struct Inner<S: ?Sized> {
    path: PathBuf,
    token: CancellationToken,
    interrupted: AtomicBool,
    pids: Mutex<HashSet<u32>>,
    transcript: Mutex<Vec<u8>>,
    services: Arc<S>,
}

impl<S: ?Sized> Clone for Environment<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: ?Sized> Deref for Environment<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.inner.services
    }
}

impl<S: ?Sized + Send + Sync + 'static> Environment<S> {
    /// Creates an environment rooted at `path`, governed by `token`.
    pub fn new(path: impl Into<PathBuf>, services: Arc<S>, token: CancellationToken) -> Self {
        Self {
            inner: Arc::new(Inner {
                path: path.into(),
                token,
                interrupted: AtomicBool::new(false),
                pids: Mutex::new(HashSet::new()),
                transcript: Mutex::new(Vec::new()),
                services,
            }),
        }
    }

    /// Working directory for everything run in this environment.
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Platform services.
    pub fn services(&self) -> &Arc<S> {
        &self.inner.services
    }

    /// The governing cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.inner.token
    }

    /// True once the environment was canceled (gracefully or forcefully).
    pub fn is_canceled(&self) -> bool {
        self.inner.interrupted.load(Ordering::SeqCst) || self.inner.token.is_cancelled()
    }

    /// Cancels the environment.
    ///
    /// - `force = true`: cancels the governing token; in-flight commands are killed.
    /// - `force = false`: interrupts in-flight commands with SIGINT and lets them
    ///   wind down; no new command or function will start.
    pub fn cancel(&self, force: bool) {
        if force {
            self.inner.token.cancel();
            return;
        }
        self.inner.interrupted.store(true, Ordering::SeqCst);
        for pid in self.pids().iter() {
            debug!(pid, path = %self.inner.path.display(), "interrupting process");
            process::interrupt(*pid);
        }
    }

    /// Everything written to stdout and stderr by commands so far.
    pub fn output(&self) -> String {
        String::from_utf8_lossy(&self.transcript()).into_owned()
    }

    /// Runs an external program with the working directory set to [`path`](Self::path).
    ///
    /// Blocks until the program exits or the environment is canceled. A non-zero
    /// exit or signal termination is an error; so is a cancellation, reported as
    /// [`EnvError::Canceled`].
    pub async fn run_cli<I, A>(&self, name: &str, args: I) -> Result<(), EnvError>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<OsStr>,
    {
        if self.is_canceled() {
            return Err(EnvError::Canceled);
        }

        let mut cmd = Command::new(name);
        cmd.args(args)
            .current_dir(&self.inner.path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        process::isolate(&mut cmd);

        let mut child = cmd.spawn().map_err(|error| EnvError::Spawn {
            program: name.to_string(),
            error,
        })?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.pids().insert(pid);
        }
        let mut stdout = collect(child.stdout.take());
        let mut stderr = collect(child.stderr.take());
        debug!(program = name, pid, path = %self.inner.path.display(), "started process");

        // a graceful cancel may have raced the spawn
        if self.inner.interrupted.load(Ordering::SeqCst) {
            if let Some(pid) = pid {
                process::interrupt(pid);
            }
        }

        let status = tokio::select! {
            status = child.wait() => status,
            _ = self.inner.token.cancelled() => {
                process::terminate(&mut child).await;
                self.forget(pid);
                stdout.abort();
                stderr.abort();
                debug!(program = name, pid, "process killed on cancellation");
                return Err(EnvError::Canceled);
            }
        };
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                self.forget(pid);
                return Err(e.into());
            }
        };

        // background children may still hold the pipes open
        let drained = tokio::select! {
            out = async { ((&mut stdout).await, (&mut stderr).await) } => Some(out),
            _ = self.inner.token.cancelled() => None,
        };
        self.forget(pid);
        let Some((out, err)) = drained else {
            if let Some(pid) = pid {
                process::kill_group(pid);
            }
            stdout.abort();
            stderr.abort();
            debug!(program = name, pid, "process group killed on cancellation");
            return Err(EnvError::Canceled);
        };
        let out = out.unwrap_or_default();
        let err = err.unwrap_or_default();
        {
            let mut transcript = self.transcript();
            transcript.extend_from_slice(&out);
            transcript.extend_from_slice(&err);
        }

        if status.success() {
            return Ok(());
        }
        if self.is_canceled() {
            return Err(EnvError::Canceled);
        }
        match status.code() {
            Some(code) => Err(EnvError::Exit {
                program: name.to_string(),
                code,
                stderr: tail(&err),
            }),
            None => Err(EnvError::Signal {
                program: name.to_string(),
                signal: process::exit_signal(&status).unwrap_or_default(),
            }),
        }
    }

    /// Runs an in-process function inside this environment.
    ///
    /// The function receives the governing token and a handle to the
    /// environment, so it can run further commands and reach platform
    /// services. Its result is returned as is.
    pub async fn run_func<F, Fut>(&self, f: F) -> Result<(), EnvError>
    where
        F: FnOnce(CancellationToken, Environment<S>) -> Fut,
        Fut: Future<Output = Result<(), EnvError>>,
    {
        if self.is_canceled() {
            return Err(EnvError::Canceled);
        }
        f(self.inner.token.clone(), self.clone()).await
    }

    fn forget(&self, pid: Option<u32>) {
        if let Some(pid) = pid {
            self.pids().remove(&pid);
        }
    }

    fn pids(&self) -> MutexGuard<'_, HashSet<u32>> {
        self.inner.pids.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn transcript(&self) -> MutexGuard<'_, Vec<u8>> {
        self.inner.transcript.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Drains a pipe in the background so the child never blocks on a full pipe.
fn collect<R>(pipe: Option<R>) -> JoinHandle<Vec<u8>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

fn tail(bytes: &[u8]) -> String {
    let start = bytes.len().saturating_sub(STDERR_TAIL);
    String::from_utf8_lossy(&bytes[start..]).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use super::*;

    #[derive(Default)]
    struct Services {
        progress: AtomicUsize,
    }

    impl Services {
        fn report(&self) {
            self.progress.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn env(dir: &tempfile::TempDir) -> Environment<Services> {
        Environment::new(
            dir.path(),
            Arc::new(Services::default()),
            CancellationToken::new(),
        )
    }

    fn cancel_after(token: CancellationToken, after: Duration) {
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            token.cancel();
        });
    }

    fn alive(pid: i32) -> bool {
        // a zombie waiting for its reaper counts as gone
        if let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            let state = stat.rsplit(')').next().unwrap_or("").trim_start();
            return !state.starts_with('Z');
        }
        // SAFETY: signal 0 only checks for existence.
        unsafe { libc::kill(pid, 0) == 0 }
    }

    async fn eventually_dead(pid: i32) -> bool {
        for _ in 0..100 {
            if !alive(pid) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        env.run_cli("sh", ["-c", "echo hello; touch marker"])
            .await
            .unwrap();
        assert!(dir.path().join("marker").exists());
        assert!(env.output().contains("hello"));
    }

    #[tokio::test]
    async fn non_zero_exit_is_an_error_with_stderr() {
        let dir = tempfile::tempdir().unwrap();
        let err = env(&dir)
            .run_cli("sh", ["-c", "echo broken state >&2; exit 3"])
            .await
            .unwrap_err();
        match err {
            EnvError::Exit { code, stderr, .. } => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "broken state");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let err = env(&dir)
            .run_cli("definitely-not-a-real-program", Vec::<String>::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EnvError::Spawn { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn cancel_kills_in_flight_command() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        cancel_after(env.token().clone(), Duration::from_millis(100));

        let started = Instant::now();
        let err = env
            .run_cli("sh", ["-c", "echo $$ > pid; exec sleep 30"])
            .await
            .unwrap_err();
        assert!(err.is_canceled(), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = std::fs::read_to_string(dir.path().join("pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(eventually_dead(pid).await, "process {pid} survived cancellation");
    }

    #[tokio::test]
    async fn cancel_reaches_background_children_holding_the_pipes() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        cancel_after(env.token().clone(), Duration::from_millis(300));

        let started = Instant::now();
        let err = env
            .run_cli("sh", ["-c", "sleep 8 & echo $! > pid; exit 0"])
            .await
            .unwrap_err();
        assert!(err.is_canceled(), "{err:?}");
        assert!(started.elapsed() < Duration::from_secs(5));

        let pid: i32 = std::fs::read_to_string(dir.path().join("pid"))
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        assert!(eventually_dead(pid).await, "background process {pid} survived cancellation");
    }

    #[tokio::test]
    async fn calls_after_cancel_fail_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        env.cancel(true);

        let err = env.run_cli("sh", ["-c", "touch marker"]).await.unwrap_err();
        assert!(err.is_canceled());
        assert!(!dir.path().join("marker").exists());

        let called = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&called);
        let err = env
            .run_func(|_ctx, _env| async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(err.is_canceled());
        assert!(!called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn graceful_cancel_interrupts_without_killing_the_token() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        let handle = env.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            handle.cancel(false);
        });

        let err = env.run_cli("sleep", ["30"]).await.unwrap_err();
        assert!(err.is_canceled(), "{err:?}");
        assert!(!env.token().is_cancelled());
        assert!(env.run_cli("true", Vec::<String>::new()).await.unwrap_err().is_canceled());
    }

    #[tokio::test]
    async fn run_func_threads_cancellation_into_nested_cli() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        cancel_after(env.token().clone(), Duration::from_millis(100));

        let err = env
            .run_func(|_ctx, env| async move { env.run_cli("sleep", ["30"]).await })
            .await
            .unwrap_err();
        assert!(err.is_canceled(), "{err:?}");
    }

    #[tokio::test]
    async fn run_func_sees_token_and_services() {
        let dir = tempfile::tempdir().unwrap();
        let env = env(&dir);
        cancel_after(env.token().clone(), Duration::from_millis(50));

        env.run_func(|ctx, env| async move {
            env.report();
            ctx.cancelled().await;
            env.services().report();
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(env.progress.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn run_func_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let err = env(&dir)
            .run_func(|_ctx, _env| async { Err(EnvError::failed("plan rejected")) })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "function failed: plan rejected");
    }
}

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use remoteops::{
    Daemon, DaemonConfig, EnvError, Environment, ExecutionMode, HandlerFn, MemorySource, Run,
    RunStatus, SpoolerConfig, WorkerConfig,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
enum Report {
    Started(String),
    Finished { run: String, canceled: bool, output: String },
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn queued(id: &str, mode: ExecutionMode) -> Run {
    Run::new(id, "acme", "networking", mode).with_status(RunStatus::PlanQueued)
}

async fn next(rx: &mut mpsc::UnboundedReceiver<Report>) -> Report {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a report")
        .expect("report channel closed")
}

/// Runs `script` with `sh -c` for every run and reports progress.
fn shell_daemon(
    source: Arc<MemorySource>,
    root: &std::path::Path,
    script: &'static str,
) -> (
    Arc<Daemon<Arc<MemorySource>, (), impl remoteops::RunHandler<()>>>,
    mpsc::UnboundedReceiver<Report>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = HandlerFn::arc(move |run: Run, env: Environment<()>| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(Report::Started(run.id.to_string()));
            let res = env.run_cli("sh", ["-c", script]).await;
            let _ = tx.send(Report::Finished {
                run: run.id.to_string(),
                canceled: matches!(res, Err(EnvError::Canceled)),
                output: env.output(),
            });
            res
        }
    });
    let cfg = DaemonConfig {
        spooler: SpoolerConfig::server("acme"),
        worker: WorkerConfig {
            concurrency: 2,
            workdir_root: root.to_path_buf(),
            grace: Duration::from_secs(5),
            ..WorkerConfig::default()
        },
    };
    (Arc::new(Daemon::new(source, Arc::new(()), handler, cfg)), rx)
}

#[tokio::test]
async fn replays_backlog_then_follows_live_runs() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(64));
    source.seed(queued("backlog", ExecutionMode::Remote));
    source.seed(queued("agent-only", ExecutionMode::Agent));

    let (daemon, mut rx) = shell_daemon(Arc::clone(&source), root.path(), "echo hello; pwd");
    let token = CancellationToken::new();
    let d = Arc::clone(&daemon);
    let t = token.clone();
    let handle = tokio::spawn(async move { d.run(t).await });

    assert!(matches!(next(&mut rx).await, Report::Started(id) if id == "backlog"));
    match next(&mut rx).await {
        Report::Finished { run, canceled, output } => {
            assert_eq!(run, "backlog");
            assert!(!canceled);
            assert!(output.starts_with("hello\n"));
            // commands run in a directory under the configured root
            assert!(output.contains(root.path().file_name().unwrap().to_str().unwrap()));
        }
        other => panic!("unexpected report: {other:?}"),
    }

    source.upsert(queued("live", ExecutionMode::Remote));
    assert!(matches!(next(&mut rx).await, Report::Started(id) if id == "live"));

    token.cancel();
    handle.await.unwrap().unwrap();
    assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn force_cancel_kills_running_command() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(64));

    let (daemon, mut rx) = shell_daemon(Arc::clone(&source), root.path(), "sleep 30");
    let token = CancellationToken::new();
    let d = Arc::clone(&daemon);
    let t = token.clone();
    let handle = tokio::spawn(async move { d.run(t).await });

    // publish only once the initial listing is done, so the run is seen once
    while source.subscriber_count() == 0 || source.list_calls() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    let run = queued("long", ExecutionMode::Remote);
    source.upsert(run.clone());
    assert!(matches!(next(&mut rx).await, Report::Started(id) if id == "long"));

    source.upsert(run.with_status(RunStatus::ForceCanceled));
    match next(&mut rx).await {
        Report::Finished { run, canceled, .. } => {
            assert_eq!(run, "long");
            assert!(canceled);
        }
        other => panic!("unexpected report: {other:?}"),
    }
    while !daemon.worker().terminator().in_flight().is_empty() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    token.cancel();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn shutdown_kills_in_flight_runs_within_grace() {
    init_tracing();
    let root = tempfile::tempdir().unwrap();
    let source = Arc::new(MemorySource::new(64));
    source.seed(queued("a", ExecutionMode::Remote));
    source.seed(queued("b", ExecutionMode::Remote));

    let (daemon, mut rx) = shell_daemon(Arc::clone(&source), root.path(), "sleep 30");
    let token = CancellationToken::new();
    let d = Arc::clone(&daemon);
    let t = token.clone();
    let handle = tokio::spawn(async move { d.run(t).await });

    for _ in 0..2 {
        assert!(matches!(next(&mut rx).await, Report::Started(_)));
    }

    let stopped = std::time::Instant::now();
    token.cancel();
    handle.await.unwrap().unwrap();
    assert!(stopped.elapsed() < Duration::from_secs(5));

    let mut canceled = 0;
    while let Ok(report) = rx.try_recv() {
        if let Report::Finished { canceled: true, .. } = report {
            canceled += 1;
        }
    }
    assert_eq!(canceled, 2);
}

#![forbid(unsafe_code)]

use crate::aggregator::Aggregator;
use crate::artifacts::ArtifactStore;
use crate::control::{Command, CommandServer, EventPublisher};
use crate::error::Error;
use crate::observation::{FanotifySource, ForkObserver};
use crate::resolver;
use config::Settings;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Control-channel sockets plus the shutdown signal. Signal handlers hold
/// just the token, which is enough to trigger an idempotent close.
pub struct RuntimeHandles {
    pub command: CommandServer,
    pub events: EventPublisher,
    shutdown: CancellationToken,
}

impl RuntimeHandles {
    pub fn close(&self) {
        self.shutdown.cancel();
    }
}

/// Orchestrates one observation run: spawn the target, run the capture
/// pipeline, wait for the terminator, finalize artifacts, acknowledge.
pub struct RunController {
    settings: Settings,
    target: Vec<String>,
}

impl RunController {
    pub fn new(settings: Settings, target: Vec<String>) -> Result<Self, Error> {
        if target.is_empty() {
            return Err(Error::MissingTarget);
        }
        Ok(Self { settings, target })
    }

    pub async fn run(self) -> Result<(), Error> {
        let Self { settings, target } = self;

        remove_stale_ipc(&settings.paths.stale_ipc);

        let shutdown = CancellationToken::new();
        spawn_signal_handlers(shutdown.clone(), settings.paths.stale_ipc.clone());

        // Observation pipeline comes up before the target so the target's
        // own exec is the first delivered event.
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let source = FanotifySource::start(&settings.paths.mount_point, event_tx)?;
        let fork_observer = ForkObserver::try_new();

        let stop = CancellationToken::new();
        let (report_tx, report_rx) = oneshot::channel();
        let aggregator =
            Aggregator::new(std::process::id() as i32, nix::unistd::getppid().as_raw());
        let aggregation = tokio::spawn(aggregator.run(event_rx, stop.clone(), report_tx));

        let mut child = std::process::Command::new(&target[0])
            .args(&target[1..])
            .spawn()
            .map_err(|source| Error::TargetSpawn {
                path: PathBuf::from(&target[0]),
                source,
            })?;
        info!(pid = child.id(), target = %target[0], "target app started");

        tokio::time::sleep(settings.timing.startup_grace).await;

        let events = EventPublisher::bind(
            &settings.channels.event_addr,
            settings.channels.io_deadline,
            shutdown.clone(),
        )
        .await?;
        let (command, mut commands) = CommandServer::bind(
            &settings.channels.command_addr,
            settings.channels.io_deadline,
            shutdown.clone(),
        )
        .await?;
        let handles = RuntimeHandles {
            command,
            events,
            shutdown: shutdown.clone(),
        };

        info!("waiting for the terminator");
        let mut heartbeat = tokio::time::interval_at(
            tokio::time::Instant::now() + settings.timing.heartbeat,
            settings.timing.heartbeat,
        );
        let finished = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break false,
                command = commands.recv() => match command {
                    Some(Command::Finish) => {
                        info!("stopping the monitor");
                        break true;
                    }
                    None => break false,
                },
                _ = heartbeat.tick() => {
                    let mut stderr = std::io::stderr();
                    let _ = write!(stderr, ".");
                    let _ = stderr.flush();
                }
            }
        };

        source.stop();
        if let Some(observer) = &fork_observer {
            observer.stop();
        }

        if !finished {
            handles.close();
            reap_target(&mut child);
            return Ok(());
        }

        // DRAINING -> FINALIZING: the report moves from the aggregator to
        // this task exactly once.
        stop.cancel();
        let report = report_rx.await.map_err(|_| Error::ReportLost)?;
        let _ = aggregation.await;

        if let Some(observer) = &fork_observer {
            let forks = observer.drain();
            debug!(parents = forks.len(), "fork map collected");
        }

        let observed = report.observed_paths();
        let resolved = resolver::resolve(&observed, &settings.paths.mount_point);
        let mut store = ArtifactStore::new(settings.paths.artifact_dir.clone(), &report, resolved);
        store.prepare();
        store.save();
        store.write_report()?;

        for attempt in 1..=settings.channels.publish_attempts {
            match handles.events.publish("monitor.finish.completed").await {
                Ok(()) => {
                    info!("completion event published");
                    break;
                }
                Err(err) if err.kind() == std::io::ErrorKind::TimedOut => {
                    warn!(attempt, "publish timed out")
                }
                Err(err) => warn!(attempt, %err, "publish failed"),
            }
        }

        handles.close();
        reap_target(&mut child);
        Ok(())
    }
}

fn remove_stale_ipc(paths: &[PathBuf]) {
    for path in paths {
        match std::fs::remove_file(path) {
            Ok(()) => info!(path = %path.display(), "removed stale IPC socket"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), %err, "stale IPC cleanup failed"),
        }
    }
}

fn reap_target(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(status)) => info!(%status, "target exited"),
        Ok(None) => debug!("target still running at shutdown"),
        Err(err) => warn!(%err, "target wait failed"),
    }
}

fn spawn_signal_handlers(shutdown: CancellationToken, stale_ipc: Vec<PathBuf>) {
    use tokio::signal::unix::{signal, SignalKind};

    let kinds = [
        SignalKind::interrupt(),
        SignalKind::terminate(),
        SignalKind::quit(),
        SignalKind::hangup(),
        SignalKind::from_raw(nix::libc::SIGSTOP),
        SignalKind::from_raw(nix::libc::SIGCONT),
    ];

    for kind in kinds {
        let mut stream = match signal(kind) {
            Ok(stream) => stream,
            Err(err) => {
                // SIGSTOP is uncatchable; registration fails on every kernel
                debug!(signal = kind.as_raw_value(), %err, "signal not registrable");
                continue;
            }
        };
        let shutdown = shutdown.clone();
        let stale_ipc = stale_ipc.clone();
        tokio::spawn(async move {
            if stream.recv().await.is_some() {
                info!(signal = kind.as_raw_value(), "cleanup on signal");
                shutdown.cancel();
                remove_stale_ipc(&stale_ipc);
                // give socket tasks a beat to observe the token
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                std::process::exit(0);
            }
        });
    }
}

#![forbid(unsafe_code)]

use crate::observation::FileEvent;
use crate::procinfo;
use crate::report::{FileRecord, MonitorReport, ProcessRecord};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Introspect = fn(i32) -> Option<ProcessRecord>;

/// Consumes the normalized event stream and maintains the in-memory
/// [`MonitorReport`]. The report is owned exclusively by this task while
/// events flow and moves to the controller exactly once on stop.
pub struct Aggregator {
    report: MonitorReport,
    introspect: Introspect,
}

impl Aggregator {
    pub fn new(monitor_pid: i32, monitor_parent_pid: i32) -> Self {
        Self::with_introspector(monitor_pid, monitor_parent_pid, procinfo::lookup)
    }

    pub(crate) fn with_introspector(
        monitor_pid: i32,
        monitor_parent_pid: i32,
        introspect: Introspect,
    ) -> Self {
        Self {
            report: MonitorReport::new(monitor_pid, monitor_parent_pid),
            introspect,
        }
    }

    /// Fold one event into the report.
    ///
    /// The very first event seeds `main_process`; later events add process
    /// records lazily. An event whose pid cannot be introspected still
    /// counts, it just has no record and can never match `exe_path`.
    pub fn observe(&mut self, event: &FileEvent) {
        self.report.event_count += 1;

        if event.id == 1 {
            if let Some(record) = (self.introspect)(event.pid) {
                self.report.main_process = Some(record.clone());
                self.report.processes.insert(event.pid, record);
            }
        } else if !self.report.processes.contains_key(&event.pid) {
            if let Some(record) = (self.introspect)(event.pid) {
                self.report.processes.insert(event.pid, record);
            }
        }

        let exe_match = self
            .report
            .processes
            .get(&event.pid)
            .is_some_and(|record| record.exe_path == event.path);

        let files = self.report.process_files.entry(event.pid).or_default();
        match files.get_mut(&event.path) {
            None => {
                files.insert(
                    event.path.clone(),
                    FileRecord {
                        event_count: 1,
                        first_event_id: event.id,
                        reads: u32::from(event.read),
                        writes: u32::from(event.write),
                        execs: u32::from(exe_match),
                    },
                );
            }
            Some(existing) => {
                existing.event_count += 1;
                if event.read {
                    existing.reads += 1;
                }
                if event.write {
                    existing.writes += 1;
                }
                if exe_match {
                    existing.execs += 1;
                }
            }
        }
    }

    pub fn report(&self) -> &MonitorReport {
        &self.report
    }

    pub fn into_report(self) -> MonitorReport {
        self.report
    }

    /// Run until the stop token fires or the event source ends, then deliver
    /// the completed report. At most one additional event is folded in after
    /// stop is requested; delivery happens exactly once.
    pub async fn run(
        mut self,
        mut events: UnboundedReceiver<FileEvent>,
        stop: CancellationToken,
        done: oneshot::Sender<MonitorReport>,
    ) {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.observe(&event),
                    None => break,
                },
            }
        }

        let report = self.report;
        info!(event_count = report.event_count, "aggregation complete");
        if done.send(report).is_err() {
            warn!("report receiver dropped before delivery");
        }
    }
}

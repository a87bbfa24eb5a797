#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Immutable snapshot of a process derived from `/proc`, taken the first
/// time an event mentions the pid.
///
/// The JSON field names are the wire contract of the downstream report
/// consumer and predate this implementation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessRecord {
    pub pid: i32,
    pub name: String,
    #[serde(rename = "path")]
    pub exe_path: PathBuf,
    #[serde(rename = "cmd")]
    pub cmdline: String,
    pub cwd: PathBuf,
    pub root: PathBuf,
    #[serde(rename = "ppid")]
    pub parent_pid: i32,
}

/// Per-(pid, path) counters. `reads + writes` may be less than
/// `event_count`: open-only events count toward neither.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileRecord {
    pub event_count: u32,
    #[serde(rename = "first_eid")]
    pub first_event_id: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub reads: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub writes: u32,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub execs: u32,
}

fn is_zero(count: &u32) -> bool {
    *count == 0
}

/// The aggregated observation window. Owned exclusively by the aggregator
/// while events flow, handed to the controller for finalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MonitorReport {
    pub monitor_pid: i32,
    #[serde(rename = "monitor_ppid")]
    pub monitor_parent_pid: i32,
    pub event_count: u32,
    pub main_process: Option<ProcessRecord>,
    #[serde(with = "pid_key_map")]
    pub processes: BTreeMap<i32, ProcessRecord>,
    #[serde(with = "pid_key_map")]
    pub process_files: BTreeMap<i32, BTreeMap<PathBuf, FileRecord>>,
}

impl MonitorReport {
    pub fn new(monitor_pid: i32, monitor_parent_pid: i32) -> Self {
        Self {
            monitor_pid,
            monitor_parent_pid,
            event_count: 0,
            main_process: None,
            processes: BTreeMap::new(),
            process_files: BTreeMap::new(),
        }
    }

    /// Union of every observed path across all processes.
    pub fn observed_paths(&self) -> std::collections::BTreeSet<PathBuf> {
        self.process_files
            .values()
            .flat_map(|files| files.keys().cloned())
            .collect()
    }
}

/// Pids are numeric keys internally and decimal strings on the wire.
mod pid_key_map {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::BTreeMap;

    pub fn serialize<S, V>(map: &BTreeMap<i32, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        serializer.collect_map(map.iter().map(|(pid, value)| (pid.to_string(), value)))
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<i32, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let raw = BTreeMap::<String, V>::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(key, value)| {
                key.parse::<i32>()
                    .map(|pid| (pid, value))
                    .map_err(D::Error::custom)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(pid: i32) -> ProcessRecord {
        ProcessRecord {
            pid,
            name: "true".into(),
            exe_path: "/bin/true".into(),
            cmdline: "/bin/true".into(),
            cwd: "/".into(),
            root: "/".into(),
            parent_pid: 1,
        }
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let mut report = MonitorReport::new(42, 1);
        report.event_count = 3;
        report.main_process = Some(sample_record(100));
        report.processes.insert(100, sample_record(100));
        report.process_files.entry(100).or_default().insert(
            PathBuf::from("/bin/true"),
            FileRecord {
                event_count: 3,
                first_event_id: 1,
                reads: 1,
                writes: 0,
                execs: 2,
            },
        );

        let json = serde_json::to_string(&report).unwrap();
        let restored: MonitorReport = serde_json::from_str(&json).unwrap();
        assert_eq!(report, restored);
    }

    #[test]
    fn pids_render_as_string_keys() {
        let mut report = MonitorReport::new(7, 1);
        report.processes.insert(100, sample_record(100));
        report
            .process_files
            .entry(100)
            .or_default()
            .insert(PathBuf::from("/etc/hostname"), FileRecord::default());

        let value: serde_json::Value =
            serde_json::to_value(&report).unwrap();
        assert!(value["processes"].get("100").is_some());
        assert!(value["process_files"]["100"].get("/etc/hostname").is_some());
        assert_eq!(value["monitor_ppid"], 1);
    }

    #[test]
    fn zero_counters_are_omitted() {
        let record = FileRecord {
            event_count: 1,
            first_event_id: 4,
            reads: 0,
            writes: 1,
            execs: 0,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert!(value.get("reads").is_none());
        assert!(value.get("execs").is_none());
        assert_eq!(value["writes"], 1);
        assert_eq!(value["first_eid"], 4);
    }

    #[test]
    fn missing_main_process_serializes_as_null() {
        let report = MonitorReport::new(7, 1);
        let value = serde_json::to_value(&report).unwrap();
        assert!(value["main_process"].is_null());
    }

    #[test]
    fn process_record_uses_wire_names() {
        let value = serde_json::to_value(sample_record(9)).unwrap();
        assert_eq!(value["path"], "/bin/true");
        assert_eq!(value["cmd"], "/bin/true");
        assert_eq!(value["ppid"], 1);
        assert!(value.get("exe_path").is_none());
    }
}

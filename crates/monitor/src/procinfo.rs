#![forbid(unsafe_code)]

use crate::report::ProcessRecord;
use procfs::process::Process;
use tracing::debug;

/// Snapshot a process from `/proc/<pid>`. The target may exit at any moment,
/// so every failure maps to `None`; the caller counts the event regardless.
pub fn lookup(pid: i32) -> Option<ProcessRecord> {
    match read_record(pid) {
        Ok(record) => Some(record),
        Err(err) => {
            debug!(pid, %err, "process introspection failed");
            None
        }
    }
}

fn read_record(pid: i32) -> Result<ProcessRecord, procfs::ProcError> {
    let process = Process::new(pid)?;
    let exe_path = process.exe()?;
    let cwd = process.cwd()?;
    let root = process.root()?;
    // argv arrives NUL-separated with trailing NULs already trimmed
    let cmdline = process.cmdline()?.join(" ");
    let stat = process.stat()?;

    Ok(ProcessRecord {
        pid,
        name: stat.comm,
        exe_path,
        cmdline,
        cwd,
        root,
        parent_pid: stat.ppid,
    })
}

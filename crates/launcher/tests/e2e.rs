#![forbid(unsafe_code)]

//! End-to-end runs of the launcher binary. fanotify needs CAP_SYS_ADMIN,
//! so everything here is skipped unless the suite runs as root.

use nix::sys::signal::{kill, Signal};
use nix::unistd::{Pid, Uid};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::Mutex;
use std::thread::sleep;
use std::time::{Duration, Instant};

// Both sockets bind fixed ports; runs must not overlap.
static PORT_LOCK: Mutex<()> = Mutex::new(());

const STALE_IPC: &str = "/tmp/docker-slim-launcher.cmds.ipc";
const REPORT_PATH: &str = "/opt/dockerslim/artifacts/creport.json";

fn running_as_root() -> bool {
    if Uid::effective().is_root() {
        true
    } else {
        eprintln!("skipping: fanotify requires root");
        false
    }
}

fn spawn_launcher(target: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_launcher"))
        .args(target)
        .env("RUST_LOG", "info")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("launcher spawns")
}

fn wait_with_timeout(child: &mut Child, limit: Duration) -> ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("wait") {
            return status;
        }
        if start.elapsed() > limit {
            let _ = child.kill();
            panic!("launcher did not exit within {limit:?}");
        }
        sleep(Duration::from_millis(100));
    }
}

#[test]
fn finish_command_produces_report_and_completion_event() {
    if !running_as_root() {
        return;
    }
    let _guard = PORT_LOCK.lock().unwrap();

    std::fs::write(STALE_IPC, b"stale").unwrap();
    let _ = std::fs::remove_file(REPORT_PATH);

    // the shell and libc it loads are guaranteed to live on the root mount
    let mut child = spawn_launcher(&["/bin/sh", "-c", "cat /etc/hostname >/dev/null; sleep 30"]);

    // startup grace is 3s; the sockets come up right after
    sleep(Duration::from_secs(4));

    assert!(
        !std::path::Path::new(STALE_IPC).exists(),
        "stale IPC socket must be removed before the event loop starts"
    );

    let events = TcpStream::connect("127.0.0.1:65502").expect("event socket");
    events
        .set_read_timeout(Some(Duration::from_secs(120)))
        .unwrap();

    let mut commands = TcpStream::connect("127.0.0.1:65501").expect("command socket");
    commands
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    let mut command_lines = BufReader::new(commands.try_clone().unwrap());

    // unknown commands are acknowledged and change nothing
    commands.write_all(b"status.probe\n").unwrap();
    let mut ack = String::new();
    command_lines.read_line(&mut ack).unwrap();
    assert_eq!(ack.trim(), "ok");

    commands.write_all(b"monitor.finish\n").unwrap();
    ack.clear();
    command_lines.read_line(&mut ack).unwrap();
    assert_eq!(ack.trim(), "ok");

    let mut event = String::new();
    BufReader::new(events).read_line(&mut event).unwrap();
    assert_eq!(event.trim(), "monitor.finish.completed");

    let status = wait_with_timeout(&mut child, Duration::from_secs(180));
    assert!(status.success(), "launcher must exit 0: {status:?}");

    let report = std::fs::read_to_string(REPORT_PATH).expect("creport.json written");
    let value: serde_json::Value = serde_json::from_str(&report).unwrap();

    assert!(value["monitor"]["event_count"].as_u64().unwrap() >= 1);
    assert!(!value["monitor"]["process_files"]
        .as_object()
        .unwrap()
        .is_empty());

    let files = value["image"]["files"].as_array().unwrap();
    assert!(!files.is_empty(), "the shell and its libraries must be captured");
    let paths: Vec<&str> = files
        .iter()
        .map(|file| file["file_path"].as_str().unwrap())
        .collect();
    let mut sorted = paths.clone();
    sorted.sort_unstable();
    assert_eq!(paths, sorted, "image.files must be sorted by path");

    let regular = files
        .iter()
        .find(|file| file["file_type"] == "File")
        .expect("at least one regular file");
    assert_eq!(regular["sha1_hash"].as_str().unwrap().len(), 40);
    assert!(regular["mode"].as_str().unwrap().len() == 10);
}

#[test]
fn termination_signal_exits_zero() {
    if !running_as_root() {
        return;
    }
    let _guard = PORT_LOCK.lock().unwrap();

    let mut child = spawn_launcher(&["/bin/sleep", "30"]);
    sleep(Duration::from_secs(4));

    kill(Pid::from_raw(child.id() as i32), Signal::SIGTERM).unwrap();

    let status = wait_with_timeout(&mut child, Duration::from_secs(10));
    assert!(status.success(), "signalled shutdown must exit 0");
}

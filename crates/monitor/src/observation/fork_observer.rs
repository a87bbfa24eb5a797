use nix::libc;
use std::collections::HashMap;
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use tracing::{info, trace, warn};

// Proc connector ABI. These are fixed by the kernel and absent from libc.
const CN_IDX_PROC: u32 = 1;
const CN_VAL_PROC: u32 = 1;
const PROC_CN_MCAST_LISTEN: u32 = 1;
const PROC_EVENT_FORK: u32 = 0x0000_0001;
const NLMSG_DONE: u16 = 3;
const NLMSG_HDR_LEN: usize = 16;
const CN_MSG_LEN: usize = 20;
const PROC_EVENT_HDR_LEN: usize = 16;

/// Subscribes to process-lifecycle netlink events and records every fork as
/// `parent_pid -> [child_pid, ...]`.
///
/// The map is retained for the report phase but not consulted during
/// aggregation; file attribution relies solely on event pids. Missing
/// privilege (CAP_NET_ADMIN) disables the observer instead of failing the
/// run.
pub struct ForkObserver {
    forks: Arc<Mutex<HashMap<i32, Vec<i32>>>>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ForkObserver {
    pub fn try_new() -> Option<Self> {
        let socket = match NetlinkSocket::connect() {
            Ok(socket) => socket,
            Err(err) => {
                warn!(%err, "proc connector unavailable (need CAP_NET_ADMIN)");
                return None;
            }
        };

        if let Err(err) = socket.send(&listen_request(std::process::id())) {
            warn!(%err, "proc connector subscription failed");
            return None;
        }

        let forks = Arc::new(Mutex::new(HashMap::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let forks = Arc::clone(&forks);
            let stop = Arc::clone(&stop);
            match std::thread::Builder::new()
                .name("fork-observer".into())
                .spawn(move || Self::reader_loop(socket, forks, stop))
            {
                Ok(handle) => handle,
                Err(err) => {
                    warn!(%err, "failed to spawn fork observer thread");
                    return None;
                }
            }
        };

        info!("fork observer started");
        Some(Self {
            forks,
            stop,
            handle: Some(handle),
        })
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Take the accumulated parent -> children map.
    pub fn drain(&self) -> HashMap<i32, Vec<i32>> {
        let mut guard = match self.forks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *guard)
    }

    fn reader_loop(
        socket: NetlinkSocket,
        forks: Arc<Mutex<HashMap<i32, Vec<i32>>>>,
        stop: Arc<AtomicBool>,
    ) {
        let mut buf = vec![0u8; 4096];

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let len = match socket.recv(&mut buf) {
                Ok(len) => len,
                Err(err)
                    if matches!(
                        err.kind(),
                        io::ErrorKind::WouldBlock
                            | io::ErrorKind::TimedOut
                            | io::ErrorKind::Interrupted
                    ) =>
                {
                    continue;
                }
                Err(err) => {
                    warn!(%err, "netlink read failed");
                    break;
                }
            };

            for (parent, child) in parse_forks(&buf[..len]) {
                trace!(parent, child, "fork observed");
                let mut map = match forks.lock() {
                    Ok(map) => map,
                    Err(poisoned) => poisoned.into_inner(),
                };
                map.entry(parent).or_default().push(child);
            }
        }

        trace!("fork observer loop exited");
    }
}

impl Drop for ForkObserver {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Minimal owned netlink datagram socket. The 250ms receive timeout keeps
/// the reader thread responsive to the stop flag.
struct NetlinkSocket {
    fd: RawFd,
}

impl NetlinkSocket {
    fn connect() -> io::Result<Self> {
        // SAFETY: plain socket(2); the returned fd is owned by the wrapper.
        let fd = unsafe {
            libc::socket(
                libc::AF_NETLINK,
                libc::SOCK_DGRAM | libc::SOCK_CLOEXEC,
                libc::NETLINK_CONNECTOR,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let socket = Self { fd };

        // SAFETY: sockaddr_nl is plain-old-data; zeroed is a valid value.
        let mut addr: libc::sockaddr_nl = unsafe { std::mem::zeroed() };
        addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
        addr.nl_pid = 0; // kernel assigns a unique port id
        addr.nl_groups = CN_IDX_PROC;

        // SAFETY: addr is fully initialized and the length matches its type.
        let rc = unsafe {
            libc::bind(
                socket.fd,
                std::ptr::from_ref(&addr).cast::<libc::sockaddr>(),
                std::mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        let timeout = libc::timeval {
            tv_sec: 0,
            tv_usec: 250_000,
        };
        // SAFETY: setsockopt reads exactly size_of::<timeval> bytes.
        let rc = unsafe {
            libc::setsockopt(
                socket.fd,
                libc::SOL_SOCKET,
                libc::SO_RCVTIMEO,
                std::ptr::from_ref(&timeout).cast::<libc::c_void>(),
                std::mem::size_of::<libc::timeval>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(socket)
    }

    fn send(&self, buf: &[u8]) -> io::Result<()> {
        // SAFETY: buf is a live slice for the duration of the call.
        let rc = unsafe { libc::send(self.fd, buf.as_ptr().cast::<libc::c_void>(), buf.len(), 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        // SAFETY: buf is a live mutable slice for the duration of the call.
        let rc =
            unsafe { libc::recv(self.fd, buf.as_mut_ptr().cast::<libc::c_void>(), buf.len(), 0) };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(rc as usize)
    }
}

impl Drop for NetlinkSocket {
    fn drop(&mut self) {
        // SAFETY: fd is owned and closed exactly once.
        unsafe {
            libc::close(self.fd);
        }
    }
}

/// nlmsghdr + cn_msg + PROC_CN_MCAST_LISTEN, native endianness throughout.
fn listen_request(pid: u32) -> Vec<u8> {
    let total = NLMSG_HDR_LEN + CN_MSG_LEN + 4;
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(&(total as u32).to_ne_bytes()); // nlmsg_len
    buf.extend_from_slice(&NLMSG_DONE.to_ne_bytes()); // nlmsg_type
    buf.extend_from_slice(&0u16.to_ne_bytes()); // nlmsg_flags
    buf.extend_from_slice(&0u32.to_ne_bytes()); // nlmsg_seq
    buf.extend_from_slice(&pid.to_ne_bytes()); // nlmsg_pid
    buf.extend_from_slice(&CN_IDX_PROC.to_ne_bytes()); // cn_msg.id.idx
    buf.extend_from_slice(&CN_VAL_PROC.to_ne_bytes()); // cn_msg.id.val
    buf.extend_from_slice(&0u32.to_ne_bytes()); // cn_msg.seq
    buf.extend_from_slice(&0u32.to_ne_bytes()); // cn_msg.ack
    buf.extend_from_slice(&4u16.to_ne_bytes()); // cn_msg.len
    buf.extend_from_slice(&0u16.to_ne_bytes()); // cn_msg.flags
    buf.extend_from_slice(&PROC_CN_MCAST_LISTEN.to_ne_bytes());
    buf
}

/// Walk every netlink message in a datagram and pick out whole-process
/// forks. Thread clones (pid != tgid) are skipped.
fn parse_forks(datagram: &[u8]) -> Vec<(i32, i32)> {
    let mut forks = Vec::new();
    let mut offset = 0;

    while offset + NLMSG_HDR_LEN <= datagram.len() {
        let Some(header) = datagram.get(offset..offset + 4) else {
            break;
        };
        let Ok(header) = header.try_into() else {
            break;
        };
        let msg_len = u32::from_ne_bytes(header) as usize;
        if msg_len < NLMSG_HDR_LEN || offset + msg_len > datagram.len() {
            break;
        }
        let body = &datagram[offset + NLMSG_HDR_LEN..offset + msg_len];
        if let Some(fork) = parse_fork_event(body) {
            forks.push(fork);
        }
        // NLMSG_ALIGN
        offset += (msg_len + 3) & !3;
    }

    forks
}

fn parse_fork_event(body: &[u8]) -> Option<(i32, i32)> {
    let event = body.get(CN_MSG_LEN..)?;
    let what = u32::from_ne_bytes(event.get(0..4)?.try_into().ok()?);
    if what != PROC_EVENT_FORK {
        return None;
    }

    let data = event.get(PROC_EVENT_HDR_LEN..PROC_EVENT_HDR_LEN + 16)?;
    let parent_pid = i32::from_ne_bytes(data[0..4].try_into().ok()?);
    let parent_tgid = i32::from_ne_bytes(data[4..8].try_into().ok()?);
    let child_pid = i32::from_ne_bytes(data[8..12].try_into().ok()?);
    let child_tgid = i32::from_ne_bytes(data[12..16].try_into().ok()?);
    if parent_pid != parent_tgid || child_pid != child_tgid {
        return None;
    }
    Some((parent_tgid, child_tgid))
}

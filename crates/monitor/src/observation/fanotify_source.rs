#![forbid(unsafe_code)]

use crate::error::Error;
use crate::observation::FileEvent;
use nix::sys::fanotify::{EventFFlags, Fanotify, InitFlags, MarkFlags, MaskFlags};
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, trace, warn};

/// Kernel notification source for one mount point.
///
/// A dedicated reader thread turns raw fanotify events into the normalized
/// [`FileEvent`] stream. Initialization failures (missing kernel support or
/// privilege) are fatal for the run; everything after that is either dropped
/// (overflow, fd decode races) or ends the stream.
pub struct FanotifySource {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl FanotifySource {
    /// Initialize fanotify, mark `mount_point` for open/access/modify events
    /// and start the reader thread feeding `events`.
    pub fn start(mount_point: &Path, events: UnboundedSender<FileEvent>) -> Result<Self, Error> {
        let fan = Fanotify::init(
            InitFlags::FAN_CLOEXEC | InitFlags::FAN_CLASS_NOTIF | InitFlags::FAN_NONBLOCK,
            EventFFlags::O_RDONLY | EventFFlags::O_CLOEXEC | EventFFlags::O_LARGEFILE,
        )
        .map_err(Error::NotifyInit)?;

        let mount = std::fs::File::open(mount_point).map_err(|source| Error::MountOpen {
            path: mount_point.to_path_buf(),
            source,
        })?;

        fan.mark(
            MarkFlags::FAN_MARK_ADD | MarkFlags::FAN_MARK_MOUNT,
            MaskFlags::FAN_OPEN | MaskFlags::FAN_ACCESS | MaskFlags::FAN_MODIFY,
            &mount,
            None::<&Path>,
        )
        .map_err(|source| Error::NotifyMark {
            path: mount_point.to_path_buf(),
            source,
        })?;

        let stop = Arc::new(AtomicBool::new(false));
        let handle = {
            let stop = Arc::clone(&stop);
            std::thread::Builder::new()
                .name("fanotify-reader".into())
                .spawn(move || Self::reader_loop(fan, events, stop))
                .map_err(Error::Io)?
        };

        info!(mount = %mount_point.display(), "notification source started");
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    /// Request the reader thread to wind down. It notices on its next
    /// nonblocking read.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    fn reader_loop(fan: Fanotify, events: UnboundedSender<FileEvent>, stop: Arc<AtomicBool>) {
        let mut next_id: u32 = 0;

        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }

            let batch = match fan.read_events() {
                Ok(batch) => batch,
                Err(nix::errno::Errno::EAGAIN) => {
                    std::thread::sleep(Duration::from_millis(100));
                    continue;
                }
                Err(nix::errno::Errno::EINTR) => continue,
                Err(err) => {
                    warn!(?err, "fanotify read failed");
                    break;
                }
            };

            for event in batch {
                let mask = event.mask();
                if mask.contains(MaskFlags::FAN_Q_OVERFLOW) {
                    // Aggregation under-counts from here on; accepted.
                    debug!("notification queue overflow");
                    continue;
                }

                let open = mask.contains(MaskFlags::FAN_OPEN);
                let read = mask.contains(MaskFlags::FAN_ACCESS);
                let write = mask.contains(MaskFlags::FAN_MODIFY);
                if !(open || read || write) {
                    continue;
                }

                let pid = event.pid();
                let path = {
                    let Some(fd) = event.fd() else {
                        continue;
                    };
                    std::fs::read_link(format!("/proc/self/fd/{}", fd.as_raw_fd()))
                };
                // The event owns the fd; dropping it here keeps the fd table
                // bounded no matter how fast events arrive.
                drop(event);

                let path = match path {
                    Ok(path) => path,
                    Err(err) => {
                        // The opener raced us to exit; nothing left to attribute.
                        debug!(%err, "event fd decode failed");
                        continue;
                    }
                };

                next_id += 1;
                let sent = events.send(FileEvent {
                    id: next_id,
                    pid,
                    path,
                    read,
                    write,
                    open,
                });
                if sent.is_err() {
                    trace!("event receiver gone");
                    return;
                }
            }
        }

        trace!("fanotify reader loop exited");
    }
}

impl Drop for FanotifySource {
    fn drop(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

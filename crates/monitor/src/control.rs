#![forbid(unsafe_code)]

use crate::error::Error;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Commands accepted on the command socket. Anything unrecognized is
/// acknowledged, logged and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Finish,
}

/// Reply-role command socket. One textual command per line; each one is
/// acknowledged with the literal payload `ok` before the next frame is
/// read (reply-before-receive is mandatory on this protocol).
pub struct CommandServer {
    local_addr: SocketAddr,
}

impl CommandServer {
    pub async fn bind(
        addr: &str,
        deadline: Duration,
        shutdown: CancellationToken,
    ) -> Result<(Self, UnboundedReceiver<Command>), Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::ChannelBind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::accept_loop(listener, deadline, shutdown, commands_tx));

        info!(%local_addr, "command server listening");
        Ok((Self { local_addr }, commands_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn accept_loop(
        listener: TcpListener,
        deadline: Duration,
        shutdown: CancellationToken,
        commands: UnboundedSender<Command>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "command client connected");
                        tokio::spawn(Self::serve_client(
                            stream,
                            deadline,
                            shutdown.clone(),
                            commands.clone(),
                        ));
                    }
                    Err(err) => warn!(%err, "command accept failed"),
                },
            }
        }
        debug!("command server closed");
    }

    async fn serve_client(
        stream: TcpStream,
        deadline: Duration,
        shutdown: CancellationToken,
        commands: UnboundedSender<Command>,
    ) {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = tokio::time::timeout(deadline, lines.next_line()) => match line {
                    // deadline tick; go re-check shutdown
                    Err(_elapsed) => continue,
                    Ok(Ok(Some(line))) => line,
                    Ok(Ok(None)) => break,
                    Ok(Err(err)) => {
                        debug!(%err, "command read failed");
                        break;
                    }
                },
            };

            let command = line.trim();
            debug!(command, "received command");
            match command {
                "monitor.finish" => {
                    let _ = commands.send(Command::Finish);
                }
                other => info!(command = other, "ignoring unrecognized command"),
            }

            if let Err(err) = writer.write_all(b"ok\n").await {
                debug!(%err, "command ack failed");
                break;
            }
        }
    }
}

/// Publish-role event socket. Subscribers connect and receive every event
/// published afterwards; publishing with zero subscribers succeeds.
pub struct EventPublisher {
    subscribers: Arc<Mutex<Vec<OwnedWriteHalf>>>,
    deadline: Duration,
    local_addr: SocketAddr,
}

impl EventPublisher {
    pub async fn bind(
        addr: &str,
        deadline: Duration,
        shutdown: CancellationToken,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| Error::ChannelBind {
                addr: addr.to_string(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        let subscribers = Arc::new(Mutex::new(Vec::new()));

        {
            let subscribers = Arc::clone(&subscribers);
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        accepted = listener.accept() => match accepted {
                            Ok((stream, peer)) => {
                                debug!(%peer, "event subscriber connected");
                                let (_read, write) = stream.into_split();
                                subscribers.lock().await.push(write);
                            }
                            Err(err) => warn!(%err, "event accept failed"),
                        },
                    }
                }
                debug!("event publisher closed");
            });
        }

        info!(%local_addr, "event publisher listening");
        Ok(Self {
            subscribers,
            deadline,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Send `event` to every subscriber. A send deadline produces a
    /// `TimedOut` error the caller may retry; subscribers with hard write
    /// errors are dropped from the list.
    pub async fn publish(&self, event: &str) -> io::Result<()> {
        let mut subscribers = self.subscribers.lock().await;
        if subscribers.is_empty() {
            debug!(event, "publishing without subscribers");
            return Ok(());
        }

        let frame = format!("{event}\n");
        let mut kept = Vec::with_capacity(subscribers.len());
        let mut result = Ok(());

        for mut subscriber in subscribers.drain(..) {
            match tokio::time::timeout(self.deadline, subscriber.write_all(frame.as_bytes())).await
            {
                Ok(Ok(())) => kept.push(subscriber),
                Ok(Err(err)) => {
                    debug!(%err, "event subscriber dropped");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
                Err(_elapsed) => {
                    kept.push(subscriber);
                    if result.is_ok() {
                        result = Err(io::Error::new(io::ErrorKind::TimedOut, "publish timed out"));
                    }
                }
            }
        }

        *subscribers = kept;
        result
    }
}

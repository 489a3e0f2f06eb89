//! The TCP connection manager: single-client policy, request loop,
//! watchdog, and write arbitration.
//!
//! Exactly one client may be bound at a time, keyed by source IP. A
//! connection from a different IP is refused with
//! `120 connection rejected` and the live session is untouched; a
//! connection from the bound IP displaces the stale session. All
//! writes on a session, synchronous responses and asynchronous pushes
//! alike, go through one exclusive writer lock so messages never
//! interleave on the wire.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::DeckCodec;
use crate::deck::Deck;
use crate::error::DeckError;
use crate::protocol::{status, Command};

type Writer = Arc<Mutex<SplitSink<Framed<TcpStream, DeckCodec>, String>>>;
type Reader = SplitStream<Framed<TcpStream, DeckCodec>>;

// ── Session binding ──────────────────────────────────────────────

struct Session {
    ip: IpAddr,
    writer: Writer,
    cancel: CancellationToken,
}

/// Clone-handle for asynchronous pushes into whichever session is
/// currently bound. With no session bound, sends are dropped silently.
///
/// This is the seam that lets the transport layer notify the client
/// without knowing anything about the server: both sides share the
/// session slot.
#[derive(Clone, Default)]
pub struct Pusher {
    session: Arc<Mutex<Option<Session>>>,
}

impl Pusher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send an asynchronous message to the bound client, if any.
    pub async fn send(&self, message: String) {
        let session = self.session.lock().await;
        let Some(session) = session.as_ref() else {
            return;
        };
        let mut writer = session.writer.lock().await;
        if let Err(e) = writer.send(message).await {
            debug!("async push failed: {e}");
        }
    }

    pub async fn has_session(&self) -> bool {
        self.session.lock().await.is_some()
    }
}

// ── DeckServer ───────────────────────────────────────────────────

/// The TCP front of the deck. Accepts connections, enforces the
/// single-client policy, and runs one request loop per session.
pub struct DeckServer {
    deck: Arc<dyn Deck>,
    listener: TcpListener,
    local_addr: std::net::SocketAddr,
    pusher: Pusher,
    running: AtomicBool,
    shutdown: Notify,
}

impl DeckServer {
    /// Bind the listening socket. Port 0 picks an ephemeral port;
    /// `local_addr` reports what was actually bound.
    pub async fn bind(
        deck: Arc<dyn Deck>,
        port: u16,
        pusher: Pusher,
    ) -> Result<Arc<Self>, DeckError> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        let local_addr = listener.local_addr()?;
        Ok(Arc::new(Self {
            deck,
            listener,
            local_addr,
            pusher,
            running: AtomicBool::new(false),
            shutdown: Notify::new(),
        }))
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    /// Accept connections until [`Self::stop`] is called. Accept
    /// errors are logged and the loop continues.
    pub async fn run(self: Arc<Self>) {
        self.running.store(true, Ordering::SeqCst);
        info!(addr = %self.local_addr, "deck server listening");

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.shutdown.notified() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let server = Arc::clone(&self);
                        tokio::spawn(async move {
                            if let Err(e) = server.handle_accept(stream, peer.ip()).await {
                                warn!(%peer, "connection ended with error: {e}");
                            }
                        });
                    }
                    Err(e) => warn!("accept failed: {e}"),
                },
            }
        }
        info!("deck server stopped accepting");
    }

    /// Stop accepting and close the live session, if any.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.notify_waiters();
        let mut binding = self.pusher.session.lock().await;
        if let Some(session) = binding.take() {
            session.cancel.cancel();
            info!(ip = %session.ip, "closed live session on shutdown");
        }
    }

    async fn handle_accept(&self, stream: TcpStream, ip: IpAddr) -> Result<(), DeckError> {
        let framed = Framed::new(stream, DeckCodec);

        let (writer, reader, cancel) = {
            let mut binding = self.pusher.session.lock().await;
            if let Some(bound) = binding.as_ref() {
                if bound.ip != ip {
                    info!(%ip, bound = %bound.ip, "rejecting second client");
                    let mut framed = framed;
                    let _ = framed.send(status::ERR_CONNECTION_REJECTED.to_string()).await;
                    return Ok(());
                }
            }
            // Same IP or unbound: adopt, displacing any stale session.
            if let Some(stale) = binding.take() {
                debug!(%ip, "displacing stale session");
                stale.cancel.cancel();
            }
            let (sink, reader) = framed.split();
            let writer: Writer = Arc::new(Mutex::new(sink));
            let cancel = CancellationToken::new();
            *binding = Some(Session {
                ip,
                writer: Arc::clone(&writer),
                cancel: cancel.clone(),
            });
            (writer, reader, cancel)
        };

        info!(%ip, "client bound");
        let outcome = match self.send_banner(&writer).await {
            Ok(()) => self.session_loop(Arc::clone(&writer), reader, cancel, ip).await,
            Err(e) => Err(e),
        };
        if outcome.is_err() {
            // A failed write means this session is dead; free the IP
            // binding so it cannot lock out other clients.
            self.release_binding(&writer).await;
        }
        outcome
    }

    async fn send_banner(&self, writer: &Writer) -> Result<(), DeckError> {
        let mut banner = Command::new(status::ASYNC_CONNECTION_INFO);
        banner.push("protocol version", self.deck.protocol_version());
        banner.push("model", self.deck.model());
        writer.lock().await.send(banner.marshall()).await
    }

    async fn session_loop(
        &self,
        writer: Writer,
        mut reader: Reader,
        cancel: CancellationToken,
        ip: IpAddr,
    ) -> Result<(), DeckError> {
        // Inactivity watchdog; disarmed until a client arms it.
        let mut period: Option<Duration> = None;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            let watchdog = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            let line = tokio::select! {
                _ = cancel.cancelled() => {
                    // Displaced by a reconnect or server shutdown; the
                    // displacer owns the binding now.
                    debug!(%ip, "session displaced");
                    return Ok(());
                }
                _ = watchdog => {
                    info!(%ip, "watchdog expired, closing session");
                    self.release_binding(&writer).await;
                    return Ok(());
                }
                line = reader.next() => line,
            };

            let line = match line {
                Some(Ok(line)) => line,
                // Read and write errors propagate; the caller frees
                // the binding on every error exit.
                Some(Err(e)) => return Err(e),
                None => {
                    debug!(%ip, "client disconnected");
                    self.release_binding(&writer).await;
                    return Ok(());
                }
            };

            let cmd = Command::parse(&line);
            if cmd.is_empty() {
                continue;
            }
            // Any parsed request feeds the watchdog.
            if let Some(p) = period {
                deadline = Some(tokio::time::Instant::now() + p);
            }

            match cmd.name() {
                "ping" => self.write_response(&writer, status::OK.into()).await?,
                "quit" => {
                    info!(%ip, "client quit");
                    self.release_binding(&writer).await;
                    return Ok(());
                }
                "watchdog" => {
                    let response = match cmd.get("period").map(str::parse::<u64>) {
                        Some(Ok(0)) => {
                            period = None;
                            deadline = None;
                            status::OK
                        }
                        Some(Ok(secs)) => {
                            let p = Duration::from_secs(secs);
                            period = Some(p);
                            deadline = Some(tokio::time::Instant::now() + p);
                            status::OK
                        }
                        _ => status::ERR_SYNTAX,
                    };
                    self.write_response(&writer, response.into()).await?;
                }
                _ => {
                    let response = self.deck.process_command(&cmd).await;
                    self.write_response(&writer, response).await?;
                }
            }
        }
    }

    /// Write a synchronous response, then yield so a pending
    /// asynchronous push can slip in between responses rather than
    /// waiting behind the next read.
    async fn write_response(&self, writer: &Writer, response: String) -> Result<(), DeckError> {
        writer.lock().await.send(response).await?;
        tokio::task::yield_now().await;
        Ok(())
    }

    /// Free the client-IP binding, but only if it still belongs to
    /// this session. A displacing reconnect already owns the slot.
    async fn release_binding(&self, writer: &Writer) {
        let mut binding = self.pusher.session.lock().await;
        if binding
            .as_ref()
            .is_some_and(|s| Arc::ptr_eq(&s.writer, writer))
        {
            *binding = None;
        }
    }
}

//! HTTP/2 session lifecycle.
//!
//! The [`SessionManager`] owns one session slot per endpoint: `push` for
//! device delivery and broadcast, `manage` for channel management. A slot
//! moves through `Idle -> Connecting -> Open -> Closed/Destroyed`; only an
//! open slot hands out sessions, anything else (re)connects first. The
//! slot mutex is held across establishment, so concurrent first users
//! coalesce onto a single connect. The connection driver task marks the
//! slot closed when the transport ends (error, GOAWAY, socket close) and
//! the next request reconnects.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use h2::client::SendRequest;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{ApnsError, Endpoint, Result, Transport};

/// Which of the two sessions a request runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SessionKind {
    /// Device delivery and broadcast (`/3/device/*`, `/4/broadcasts/*`).
    Push,
    /// Channel management (`/1/apps/*`).
    Manage,
}

impl SessionKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Manage => "manage",
        }
    }
}

/// How long a gracefully closing session may wait for in-flight streams
/// to settle before it is destroyed.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A live session handle, cheap to clone per request.
#[derive(Clone, Debug)]
pub(crate) struct Session {
    pub(crate) send: SendRequest<Bytes>,
    closed: Arc<AtomicBool>,
}

impl Session {
    /// Whether the underlying connection has ended.
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

struct Live {
    send: SendRequest<Bytes>,
    closed: Arc<AtomicBool>,
    driver: JoinHandle<()>,
    pinger: Option<JoinHandle<()>>,
}

impl Live {
    /// Abrupt close for the error-driven paths (socket/frame errors,
    /// GOAWAY, retry-exhausted 500s).
    fn destroy(self) {
        self.closed.store(true, Ordering::Release);
        if let Some(pinger) = self.pinger {
            pinger.abort();
        }
        self.driver.abort();
    }

    /// Graceful close for shutdown: stop the heartbeat, release the
    /// manager's handle so the connection winds down once in-flight
    /// streams settle through their own outcomes, and destroy only
    /// after the grace period.
    async fn close(self) {
        if let Some(pinger) = self.pinger {
            pinger.abort();
        }
        // In-flight requests hold their own session handles; with the
        // manager's handle gone the connection closes once their
        // streams end.
        drop(self.send);
        let mut driver = self.driver;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut driver).await.is_err() {
            driver.abort();
        }
        self.closed.store(true, Ordering::Release);
    }
}

struct Slot {
    kind: SessionKind,
    endpoint: Endpoint,
    transport: Arc<dyn Transport>,
    live: Mutex<Option<Live>>,
}

/// Owns the push and manage sessions.
pub(crate) struct SessionManager {
    push: Slot,
    manage: Slot,
    heartbeat: Duration,
    shut_down: AtomicBool,
}

impl SessionManager {
    pub(crate) fn new(
        push_endpoint: Endpoint,
        push_transport: Arc<dyn Transport>,
        manage_endpoint: Endpoint,
        manage_transport: Arc<dyn Transport>,
        heartbeat: Duration,
    ) -> Self {
        Self {
            push: Slot {
                kind: SessionKind::Push,
                endpoint: push_endpoint,
                transport: push_transport,
                live: Mutex::new(None),
            },
            manage: Slot {
                kind: SessionKind::Manage,
                endpoint: manage_endpoint,
                transport: manage_transport,
                live: Mutex::new(None),
            },
            heartbeat,
            shut_down: AtomicBool::new(false),
        }
    }

    fn slot(&self, kind: SessionKind) -> &Slot {
        match kind {
            SessionKind::Push => &self.push,
            SessionKind::Manage => &self.manage,
        }
    }

    /// The endpoint a session kind talks to (`:authority` source).
    pub(crate) fn endpoint(&self, kind: SessionKind) -> &Endpoint {
        &self.slot(kind).endpoint
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Hand out an open session, (re)connecting if necessary.
    ///
    /// The slot mutex is held for the whole establishment, so concurrent
    /// callers share one connect attempt.
    pub(crate) async fn acquire(&self, kind: SessionKind) -> Result<Session> {
        if self.is_shut_down() {
            return Err(ApnsError::SessionClosed);
        }
        let slot = self.slot(kind);
        let mut live = slot.live.lock().await;
        if let Some(current) = live.as_ref() {
            if !current.closed.load(Ordering::Acquire) {
                return Ok(Session {
                    send: current.send.clone(),
                    closed: current.closed.clone(),
                });
            }
        }

        let established = self.establish(slot).await?;
        let session = Session {
            send: established.send.clone(),
            closed: established.closed.clone(),
        };
        if let Some(old) = live.replace(established) {
            old.destroy();
        }
        Ok(session)
    }

    async fn establish(&self, slot: &Slot) -> Result<Live> {
        let kind = slot.kind;
        info!(kind = kind.as_str(), endpoint = %slot.endpoint, "establishing session");
        let io = slot.transport.connect(&slot.endpoint).await?;
        let (send, mut connection) = h2::client::handshake(io).await?;
        let ping_pong = connection.ping_pong();
        let closed = Arc::new(AtomicBool::new(false));

        let driver = tokio::spawn({
            let closed = closed.clone();
            async move {
                match connection.await {
                    Ok(()) => info!(kind = kind.as_str(), "session closed"),
                    Err(e) => warn!(kind = kind.as_str(), error = %e, "session terminated"),
                }
                closed.store(true, Ordering::Release);
            }
        });

        let pinger = ping_pong.map(|ping_pong| {
            tokio::spawn(heartbeat_loop(
                kind,
                ping_pong,
                self.heartbeat,
                closed.clone(),
            ))
        });

        Ok(Live {
            send,
            closed,
            driver,
            pinger,
        })
    }

    /// Close and destroy one session slot so the next request reconnects.
    pub(crate) async fn teardown(&self, kind: SessionKind) {
        let slot = self.slot(kind);
        let mut live = slot.live.lock().await;
        if let Some(session) = live.take() {
            info!(kind = kind.as_str(), "destroying session");
            session.destroy();
        }
    }

    /// Shut the manager down. Idempotent: only the first call does work.
    ///
    /// Stops both heartbeats, then closes each session gracefully
    /// before destroying it. Outstanding requests are not cancelled
    /// explicitly; they settle through their own stream outcomes as
    /// aborted/error failures.
    pub(crate) async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutting down session manager");
        tokio::join!(self.close_slot(&self.push), self.close_slot(&self.manage));
    }

    async fn close_slot(&self, slot: &Slot) {
        let mut live = slot.live.lock().await;
        if let Some(session) = live.take() {
            info!(kind = slot.kind.as_str(), "closing session");
            session.close().await;
        }
    }
}

/// Periodic PING while the session is open.
///
/// A failed PING is logged but does not destroy the session; the
/// connection driver observes the transport failure itself.
async fn heartbeat_loop(
    kind: SessionKind,
    mut ping_pong: h2::PingPong,
    interval: Duration,
    closed: Arc<AtomicBool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick of a tokio interval completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if closed.load(Ordering::Acquire) {
            break;
        }
        let started = Instant::now();
        match ping_pong.ping(h2::Ping::opaque()).await {
            Ok(_pong) => {
                debug!(
                    kind = kind.as_str(),
                    rtt_ms = started.elapsed().as_millis() as u64,
                    "heartbeat ping"
                );
            }
            Err(e) => {
                warn!(kind = kind.as_str(), error = %e, "heartbeat ping failed");
                break;
            }
        }
    }
}

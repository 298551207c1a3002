//! Correlation of outbound requests with their replies.
//!
//! [`RequestCorrelator`] allocates request ids, keeps one pending slot per
//! id, and completes the slot when the dispatcher hands it the matching
//! reply. Every terminal event (reply, timeout, teardown, or the issuing
//! future being dropped) removes the pending entry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tracing::{debug, warn};

use crate::envelope::{JsonRpcRequest, Reply};
use crate::error::CorrelationError;
use crate::transport::FrameSink;

const CORRELATOR_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::correlator");

type Slot = oneshot::Sender<Result<Reply, CorrelationError>>;

struct PendingRequest {
    slot: Slot,
    created_at: Instant,
    method: String,
}

struct PendingTable {
    next_id: i64,
    pending: HashMap<i64, PendingRequest>,
    closed: bool,
}

/// Outcome of handing a reply to [`RequestCorrelator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The reply completed a pending request.
    Delivered,
    /// The id was issued earlier but is no longer pending: a duplicate, or
    /// a reply arriving after its request timed out.
    Stale,
    /// The id was never issued on this connection.
    Unknown,
}

/// Per-connection table of in-flight requests.
pub struct RequestCorrelator {
    sink: Arc<dyn FrameSink>,
    timeout: Duration,
    table: Mutex<PendingTable>,
    unmatched: AtomicU64,
}

impl std::fmt::Debug for RequestCorrelator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCorrelator")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending_count())
            .field("unmatched", &self.unmatched_replies())
            .finish_non_exhaustive()
    }
}

impl RequestCorrelator {
    /// Creates a correlator writing requests to `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn FrameSink>, timeout: Duration) -> Self {
        Self {
            sink,
            timeout,
            table: Mutex::new(PendingTable {
                next_id: 1,
                pending: HashMap::new(),
                closed: false,
            }),
            unmatched: AtomicU64::new(0),
        }
    }

    /// Sends a request and waits for its reply.
    ///
    /// The returned reply may be error-shaped; interpreting it is left to
    /// the caller.
    ///
    /// # Errors
    ///
    /// Returns [`CorrelationError::ConnectionClosed`] when the correlator is
    /// closed before or while waiting, [`CorrelationError::Timeout`] when no
    /// reply arrives in time, and [`CorrelationError::Transport`] when the
    /// request cannot be written.
    pub async fn issue(
        &self,
        method: &str,
        params: Option<Value>,
    ) -> Result<Reply, CorrelationError> {
        let (id, mut receiver) = self.register(method)?;
        let _guard = PendingGuard {
            correlator: self,
            id,
        };

        let request = JsonRpcRequest::with_id(id, method, params);
        let frame =
            serde_json::to_string(&request).map_err(|source| CorrelationError::Encode { source })?;

        // The deadline covers the write as well: a peer that stops reading
        // must not stall the caller past its timeout.
        let deadline = Instant::now() + self.timeout;
        let exchange = async {
            debug!(target: CORRELATOR_TARGET, id, method, "sending request");
            self.sink
                .send(frame)
                .await
                .map_err(|source| CorrelationError::Transport { id, source })?;
            (&mut receiver)
                .await
                .unwrap_or(Err(CorrelationError::ConnectionClosed { id }))
        };
        let outcome = time::timeout_at(deadline, exchange).await;

        match outcome {
            Ok(result) => result,
            Err(_) => self.expire(id, method, &mut receiver),
        }
    }

    /// Routes a reply to the request it answers.
    ///
    /// Replies that match nothing are logged, counted, and dropped.
    pub fn resolve(&self, reply: Reply) -> Resolution {
        let Some(id) = reply.numeric_id() else {
            self.unmatched.fetch_add(1, Ordering::Relaxed);
            warn!(
                target: CORRELATOR_TARGET,
                id = ?reply.id,
                "dropping reply without an integer id"
            );
            return Resolution::Unknown;
        };

        let lookup = {
            let mut table = self.lock();
            match table.pending.remove(&id) {
                Some(pending) => Ok(pending),
                None if id >= 1 && id < table.next_id => Err(Resolution::Stale),
                None => Err(Resolution::Unknown),
            }
        };

        match lookup {
            Ok(pending) => {
                debug!(
                    target: CORRELATOR_TARGET,
                    id,
                    method = %pending.method,
                    elapsed_ms = pending.created_at.elapsed().as_millis(),
                    "reply delivered"
                );
                if pending.slot.send(Ok(reply)).is_err() {
                    debug!(target: CORRELATOR_TARGET, id, "caller stopped waiting");
                }
                Resolution::Delivered
            }
            Err(resolution) => {
                self.unmatched.fetch_add(1, Ordering::Relaxed);
                let kind = if resolution == Resolution::Stale {
                    "stale"
                } else {
                    "unknown"
                };
                warn!(target: CORRELATOR_TARGET, id, kind, "dropping unmatched reply");
                resolution
            }
        }
    }

    /// Fails every pending request with `ConnectionClosed` and refuses new
    /// ones.
    ///
    /// Returns how many waiting callers were failed. Calling it again
    /// returns zero.
    pub fn close(&self) -> usize {
        let drained: Vec<(i64, PendingRequest)> = {
            let mut table = self.lock();
            table.closed = true;
            table.pending.drain().collect()
        };

        let failed = drained.len();
        for (id, pending) in drained {
            debug!(
                target: CORRELATOR_TARGET,
                id,
                method = %pending.method,
                "failing pending request on close"
            );
            let _ = pending
                .slot
                .send(Err(CorrelationError::ConnectionClosed { id }));
        }
        if failed > 0 {
            warn!(target: CORRELATOR_TARGET, failed, "connection closed with requests pending");
        }
        failed
    }

    /// Whether [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// Number of replies dropped because they matched no pending request.
    #[must_use]
    pub fn unmatched_replies(&self) -> u64 {
        self.unmatched.load(Ordering::Relaxed)
    }

    /// The fixed per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    fn register(
        &self,
        method: &str,
    ) -> Result<(i64, oneshot::Receiver<Result<Reply, CorrelationError>>), CorrelationError> {
        let mut table = self.lock();
        if table.closed {
            return Err(CorrelationError::ConnectionClosed { id: 0 });
        }
        let id = table.next_id;
        table.next_id += 1;
        let (slot, receiver) = oneshot::channel();
        table.pending.insert(
            id,
            PendingRequest {
                slot,
                created_at: Instant::now(),
                method: method.to_owned(),
            },
        );
        Ok((id, receiver))
    }

    /// Handles an elapsed timeout.
    ///
    /// If the entry is already gone, a reply or teardown won the race and
    /// its outcome is sitting in the receiver.
    fn expire(
        &self,
        id: i64,
        method: &str,
        receiver: &mut oneshot::Receiver<Result<Reply, CorrelationError>>,
    ) -> Result<Reply, CorrelationError> {
        if self.remove(id) {
            warn!(
                target: CORRELATOR_TARGET,
                id,
                method,
                timeout_ms = self.timeout.as_millis(),
                "request timed out"
            );
            return Err(CorrelationError::Timeout {
                id,
                timeout: self.timeout,
            });
        }
        receiver
            .try_recv()
            .unwrap_or(Err(CorrelationError::ConnectionClosed { id }))
    }

    fn remove(&self, id: i64) -> bool {
        self.lock().pending.remove(&id).is_some()
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes a pending entry when the issuing future finishes or is dropped.
struct PendingGuard<'a> {
    correlator: &'a RequestCorrelator,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.correlator.remove(self.id) {
            debug!(target: CORRELATOR_TARGET, id = self.id, "request abandoned");
        }
    }
}

//! The single read loop of a connection.
//!
//! Frames are handled strictly in arrival order. Replies are resolved
//! inline; work items run as tasks in a [`JoinSet`] so a slow engine never
//! stalls the loop. When the loop ends, pending requests fail, in-flight
//! work is aborted and answered with a closing error, and the session moves
//! to `Closing`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::sync::watch;
use tokio::task::{self, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use formbridge_config::EarlyWorkPolicy;

use crate::capability::CapabilitySet;
use crate::envelope::{Frame, WorkItem, WorkReply};
use crate::error::{SessionError, TransportError};
use crate::session::{SessionState, Shared};
use crate::transport::FrameSource;

const DISPATCHER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::dispatcher");

/// Why the read loop stopped.
#[derive(Debug)]
pub enum DispatchExit {
    /// The peer disconnected.
    Disconnected,
    /// The session was cancelled locally.
    Cancelled,
    /// The transport reported a failure.
    TransportFailed(TransportError),
}

impl std::fmt::Display for DispatchExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => f.write_str("disconnected"),
            Self::Cancelled => f.write_str("cancelled"),
            Self::TransportFailed(error) => write!(f, "transport failed: {error}"),
        }
    }
}

/// Frame counters maintained by the read loop.
#[derive(Debug, Default)]
pub(crate) struct DispatchStats {
    malformed: AtomicU64,
    ignored: AtomicU64,
    work_items: AtomicU64,
}

/// Snapshot of a session's frame counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Frames that were not decodable JSON objects.
    pub malformed_frames: u64,
    /// Peer-initiated requests and objects of no recognised shape.
    pub ignored_frames: u64,
    /// Replies that matched no pending request.
    pub unmatched_replies: u64,
    /// Work items accepted from the peer.
    pub work_items: u64,
}

impl DispatchStats {
    pub(crate) fn snapshot(&self, unmatched_replies: u64) -> SessionCounters {
        SessionCounters {
            malformed_frames: self.malformed.load(Ordering::Relaxed),
            ignored_frames: self.ignored.load(Ordering::Relaxed),
            unmatched_replies,
            work_items: self.work_items.load(Ordering::Relaxed),
        }
    }
}

/// Result of a finished read loop.
#[derive(Debug)]
pub(crate) struct DispatchOutcome {
    pub(crate) exit: DispatchExit,
    pub(crate) failed_pending: usize,
}

pub(crate) struct Dispatcher {
    shared: Arc<Shared>,
    source: Box<dyn FrameSource>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
    work: JoinSet<()>,
    /// `messageId` of every work task still running.
    in_flight: HashMap<task::Id, Option<Value>>,
    queued: Vec<WorkItem>,
}

impl Dispatcher {
    pub(crate) fn new(
        shared: Arc<Shared>,
        source: Box<dyn FrameSource>,
        cancel: CancellationToken,
    ) -> Self {
        let state = shared.subscribe();
        Self {
            shared,
            source,
            cancel,
            state,
            work: JoinSet::new(),
            in_flight: HashMap::new(),
            queued: Vec::new(),
        }
    }

    pub(crate) async fn run(mut self) -> DispatchOutcome {
        let exit = loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break DispatchExit::Cancelled,
                changed = self.state.changed(), if !self.queued.is_empty() => {
                    if changed.is_ok() {
                        self.release_queued();
                    }
                }
                Some(joined) = self.work.join_next_with_id(), if !self.work.is_empty() => {
                    self.reap(joined).await;
                }
                received = self.source.receive() => match received {
                    Ok(Some(text)) => self.route(&text).await,
                    Ok(None) => break DispatchExit::Disconnected,
                    Err(error) => break DispatchExit::TransportFailed(error),
                },
            }
        };
        self.shutdown(exit).await
    }

    async fn route(&mut self, text: &str) {
        match Frame::decode(text) {
            Ok(Frame::Reply(reply)) => {
                self.shared.correlator().resolve(reply);
            }
            Ok(Frame::Work(item)) => self.accept(item).await,
            Ok(Frame::PeerRequest { method, id }) => {
                self.shared.stats().ignored.fetch_add(1, Ordering::Relaxed);
                warn!(
                    target: DISPATCHER_TARGET,
                    method,
                    id = ?id,
                    "ignoring peer-initiated request"
                );
            }
            Ok(Frame::Unrecognised) => {
                self.shared.stats().ignored.fetch_add(1, Ordering::Relaxed);
                warn!(target: DISPATCHER_TARGET, "ignoring frame of unrecognised shape");
            }
            Err(error) => {
                self.shared.stats().malformed.fetch_add(1, Ordering::Relaxed);
                warn!(target: DISPATCHER_TARGET, %error, "skipping malformed frame");
            }
        }
    }

    async fn accept(&mut self, item: WorkItem) {
        self.shared
            .stats()
            .work_items
            .fetch_add(1, Ordering::Relaxed);

        if let Some(tools) = self.shared.ready_tools().cloned() {
            self.start(tools, item);
            return;
        }

        match self.shared.early_work() {
            EarlyWorkPolicy::Reject => {
                debug!(target: DISPATCHER_TARGET, "rejecting work received before ready");
                let reply = WorkReply::failure(
                    SessionError::EngineNotReady.to_string(),
                    item.message_id().cloned(),
                );
                self.shared.send_work_reply(&reply).await;
            }
            EarlyWorkPolicy::Queue => {
                debug!(target: DISPATCHER_TARGET, queued = self.queued.len() + 1, "queueing work until ready");
                self.queued.push(item);
                // Discovery may have completed between the check and the push.
                self.release_queued();
            }
        }
    }

    fn start(&mut self, tools: CapabilitySet, item: WorkItem) {
        let message_id = item.message_id().cloned();
        let handle = self
            .work
            .spawn(process(Arc::clone(&self.shared), tools, item));
        self.in_flight.insert(handle.id(), message_id);
    }

    fn release_queued(&mut self) {
        let Some(tools) = self.shared.ready_tools().cloned() else {
            return;
        };
        for item in std::mem::take(&mut self.queued) {
            self.start(tools.clone(), item);
        }
    }

    /// Settles a finished work task. A task that ended without sending its
    /// reply, by panicking or being aborted, is answered here instead.
    async fn reap(&mut self, joined: Result<(task::Id, ()), JoinError>) {
        let error = match joined {
            Ok((id, ())) => {
                self.in_flight.remove(&id);
                return;
            }
            Err(error) => error,
        };
        let message_id = self.in_flight.remove(&error.id()).flatten();
        let reply = if error.is_panic() {
            warn!(target: DISPATCHER_TARGET, %error, "work task panicked");
            WorkReply::failure("work failed", message_id)
        } else {
            WorkReply::failure(SessionError::Closed.to_string(), message_id)
        };
        self.shared.send_work_reply(&reply).await;
    }

    async fn shutdown(mut self, exit: DispatchExit) -> DispatchOutcome {
        info!(target: DISPATCHER_TARGET, %exit, "read loop stopped");
        self.shared.begin_closing();

        for item in std::mem::take(&mut self.queued) {
            let reply = WorkReply::failure(
                SessionError::Closed.to_string(),
                item.message_id().cloned(),
            );
            self.shared.send_work_reply(&reply).await;
        }

        let failed_pending = self.shared.correlator().close();

        self.work.abort_all();
        while let Some(joined) = self.work.join_next_with_id().await {
            self.reap(joined).await;
        }

        DispatchOutcome {
            exit,
            failed_pending,
        }
    }
}

/// Runs one work item through the engine and sends its reply.
async fn process(shared: Arc<Shared>, tools: CapabilitySet, item: WorkItem) {
    let message_id = item.message_id().cloned();
    let reply = match shared.engine().respond(&tools, item.message()).await {
        Ok(output) => WorkReply::success(output, message_id),
        Err(error) => {
            warn!(target: DISPATCHER_TARGET, %error, "engine failed to respond");
            WorkReply::failure(error.to_string(), message_id)
        }
    };
    shared.send_work_reply(&reply).await;
}

//! Lifecycle of one physical connection.
//!
//! A [`ConnectionSession`] moves through
//! `Connecting -> Listening -> Ready -> Closing -> Closed`. The read loop
//! starts before any outbound request so discovery replies can be routed,
//! and only a `Ready` session hands work to the reasoning engine.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use formbridge_config::{Config, EarlyWorkPolicy};

use crate::capability::{self, CapabilityMethods, CapabilitySet};
use crate::correlator::RequestCorrelator;
use crate::dispatcher::{DispatchExit, DispatchStats, Dispatcher, SessionCounters};
use crate::engine::ReasoningEngine;
use crate::envelope::WorkReply;
use crate::error::SessionError;
use crate::transport::{FrameSink, FrameSource};

const SESSION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::session");

/// Lifecycle state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, read loop not yet running.
    Connecting,
    /// Read loop running, capabilities not yet bound.
    Listening,
    /// Capabilities bound; work reaches the engine.
    Ready,
    /// Read loop stopped; pending requests have been failed.
    Closing,
    /// Fully torn down.
    Closed,
}

impl SessionState {
    /// Whether the session has begun tearing down.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Listening => "listening",
            Self::Ready => "ready",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Per-session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Timeout applied to every correlated request.
    pub request_timeout: Duration,
    /// Discovery and invocation method names.
    pub methods: CapabilityMethods,
    /// Handling of work that arrives before the session is ready.
    pub early_work: EarlyWorkPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(formbridge_config::DEFAULT_REQUEST_TIMEOUT_SECS),
            methods: CapabilityMethods::default(),
            early_work: EarlyWorkPolicy::default(),
        }
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            methods: CapabilityMethods {
                list: config.capability_list_method().to_owned(),
                call: config.capability_call_method().to_owned(),
            },
            early_work: config.early_work(),
        }
    }
}

/// Summary of a finished session.
#[derive(Debug)]
pub struct SessionReport {
    /// Why the read loop stopped.
    pub exit: DispatchExit,
    /// Requests still pending at teardown, all failed with
    /// `ConnectionClosed`.
    pub failed_pending: usize,
    /// Frame counters at teardown.
    pub counters: SessionCounters,
}

/// State shared between the session handle, its read loop and its work
/// tasks.
pub(crate) struct Shared {
    sink: Arc<dyn FrameSink>,
    correlator: Arc<RequestCorrelator>,
    engine: Arc<dyn ReasoningEngine>,
    tools: OnceLock<CapabilitySet>,
    state: watch::Sender<SessionState>,
    early_work: EarlyWorkPolicy,
    stats: DispatchStats,
}

impl Shared {
    pub(crate) fn correlator(&self) -> &Arc<RequestCorrelator> {
        &self.correlator
    }

    pub(crate) fn engine(&self) -> &dyn ReasoningEngine {
        self.engine.as_ref()
    }

    pub(crate) fn tools(&self) -> Option<&CapabilitySet> {
        self.tools.get()
    }

    /// The bound capabilities, but only while the session is `Ready`.
    ///
    /// Capabilities are bound before the move to `Ready`, so a session
    /// that loses the race to `Closing` never hands them out.
    pub(crate) fn ready_tools(&self) -> Option<&CapabilitySet> {
        if self.state() == SessionState::Ready {
            self.tools.get()
        } else {
            None
        }
    }

    pub(crate) const fn early_work(&self) -> EarlyWorkPolicy {
        self.early_work
    }

    pub(crate) const fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Moves to `to` only when the current state is `from`.
    fn advance(&self, from: SessionState, to: SessionState) -> bool {
        self.state.send_if_modified(|state| {
            if *state == from {
                *state = to;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn begin_closing(&self) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                false
            } else {
                *state = SessionState::Closing;
                true
            }
        });
    }

    fn finish(&self) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
    }

    pub(crate) async fn send_work_reply(&self, reply: &WorkReply) {
        let frame = match serde_json::to_string(reply) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(target: SESSION_TARGET, %error, "failed to encode work reply");
                return;
            }
        };
        if let Err(error) = self.sink.send(frame).await {
            debug!(target: SESSION_TARGET, %error, "work reply not delivered");
        }
    }
}

/// Everything scoped to one physical duplex connection.
pub struct ConnectionSession {
    shared: Arc<Shared>,
    source: Option<Box<dyn FrameSource>>,
    methods: CapabilityMethods,
    cancel: CancellationToken,
    listener: Option<JoinHandle<crate::dispatcher::DispatchOutcome>>,
    report: Option<Arc<SessionReport>>,
}

impl fmt::Debug for ConnectionSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSession")
            .field("state", &self.state())
            .field("correlator", &self.shared.correlator)
            .finish_non_exhaustive()
    }
}

impl ConnectionSession {
    /// Creates a session in the `Connecting` state.
    #[must_use]
    pub fn new(
        sink: Arc<dyn FrameSink>,
        source: Box<dyn FrameSource>,
        engine: Arc<dyn ReasoningEngine>,
        config: SessionConfig,
    ) -> Self {
        let correlator = Arc::new(RequestCorrelator::new(
            Arc::clone(&sink),
            config.request_timeout,
        ));
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            shared: Arc::new(Shared {
                sink,
                correlator,
                engine,
                tools: OnceLock::new(),
                state,
                early_work: config.early_work,
                stats: DispatchStats::default(),
            }),
            source: Some(source),
            methods: config.methods,
            cancel: CancellationToken::new(),
            listener: None,
            report: None,
        }
    }

    /// Starts the read loop and moves to `Listening`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless the session is
    /// `Connecting`.
    pub fn start_listening(&mut self) -> Result<(), SessionError> {
        let source = match (self.state(), self.source.take()) {
            (SessionState::Connecting, Some(source)) => source,
            (actual, source) => {
                self.source = source;
                return Err(SessionError::InvalidState {
                    expected: SessionState::Connecting,
                    actual,
                });
            }
        };

        let dispatcher = Dispatcher::new(Arc::clone(&self.shared), source, self.cancel.clone());
        self.listener = Some(tokio::spawn(dispatcher.run()));
        self.shared
            .advance(SessionState::Connecting, SessionState::Listening);
        debug!(target: SESSION_TARGET, "listening");
        Ok(())
    }

    /// Discovers the peer's capabilities, binds them, and moves to `Ready`.
    ///
    /// Returns the number of capabilities bound, which may be zero.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidState`] unless the session is
    /// `Listening`, and [`SessionError::Discovery`] when the connection
    /// closes during discovery.
    pub async fn discover(&mut self) -> Result<usize, SessionError> {
        let actual = self.state();
        if actual != SessionState::Listening {
            return Err(SessionError::InvalidState {
                expected: SessionState::Listening,
                actual,
            });
        }

        let tools = capability::discover(self.shared.correlator(), &self.methods)
            .await
            .map_err(SessionError::Discovery)?;
        let count = tools.len();

        if self.shared.tools.set(tools).is_err() {
            return Err(SessionError::InvalidState {
                expected: SessionState::Listening,
                actual: self.state(),
            });
        }
        if !self
            .shared
            .advance(SessionState::Listening, SessionState::Ready)
        {
            return Err(SessionError::InvalidState {
                expected: SessionState::Listening,
                actual: self.state(),
            });
        }
        info!(target: SESSION_TARGET, tools = count, "session ready");
        Ok(count)
    }

    /// Starts listening and discovers capabilities in one step.
    ///
    /// # Errors
    ///
    /// Propagates the errors of [`start_listening`](Self::start_listening)
    /// and [`discover`](Self::discover).
    pub async fn establish(&mut self) -> Result<usize, SessionError> {
        self.start_listening()?;
        self.discover().await
    }

    /// Waits for the read loop to stop, then finishes teardown.
    ///
    /// Repeated calls return the same report.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listener`] when the read loop panicked.
    pub async fn run(&mut self) -> Result<Arc<SessionReport>, SessionError> {
        if let Some(report) = &self.report {
            return Ok(Arc::clone(report));
        }

        let (exit, failed_pending) = match self.listener.take() {
            Some(listener) => {
                let outcome = listener.await.map_err(|error| {
                    self.shared.correlator().close();
                    self.shared.begin_closing();
                    self.shared.finish();
                    SessionError::Listener(error)
                })?;
                (outcome.exit, outcome.failed_pending)
            }
            None => {
                self.shared.begin_closing();
                (DispatchExit::Cancelled, self.shared.correlator().close())
            }
        };
        self.shared.finish();

        let report = Arc::new(SessionReport {
            exit,
            failed_pending,
            counters: self.counters(),
        });
        info!(
            target: SESSION_TARGET,
            exit = %report.exit,
            failed_pending = report.failed_pending,
            "session closed"
        );
        self.report = Some(Arc::clone(&report));
        Ok(report)
    }

    /// Cancels the read loop and finishes teardown. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Listener`] when the read loop panicked.
    pub async fn close(&mut self) -> Result<Arc<SessionReport>, SessionError> {
        self.cancel.cancel();
        self.run().await
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.shared.state()
    }

    /// Receiver observing every state transition.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.subscribe()
    }

    /// Token cancelling this session's read loop.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// The session's correlator, for issuing requests outside a proxy.
    #[must_use]
    pub fn correlator(&self) -> &Arc<RequestCorrelator> {
        self.shared.correlator()
    }

    /// Capabilities bound at discovery, once `Ready`.
    #[must_use]
    pub fn tools(&self) -> Option<&CapabilitySet> {
        self.shared.tools()
    }

    /// Current frame counters.
    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        self.shared
            .stats()
            .snapshot(self.shared.correlator().unmatched_replies())
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

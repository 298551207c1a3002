//! Structured health reporting for daemon and connection lifecycle events.

use std::net::SocketAddr;
use std::sync::Arc;

use formbridge_config::Config;
use formbridge_session::{SessionError, SessionReport};

use crate::bootstrap::BootstrapError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer trait used to surface lifecycle events to telemetry sinks.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener socket is bound.
    fn listener_bound(&self, address: SocketAddr, chat_path: &str);

    /// Invoked when a peer completes the WebSocket upgrade.
    fn connection_accepted(&self);

    /// Invoked when a session finishes discovery.
    fn session_ready(&self, tools: usize);

    /// Invoked when a session cannot complete its start-up.
    fn session_failed(&self, error: &SessionError);

    /// Invoked after a session has been torn down.
    fn session_closed(&self, report: &SessionReport);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_bound(&self, address: SocketAddr, chat_path: &str) {
        (**self).listener_bound(address, chat_path);
    }

    fn connection_accepted(&self) {
        (**self).connection_accepted();
    }

    fn session_ready(&self, tools: usize) {
        (**self).session_ready(tools);
    }

    fn session_failed(&self, error: &SessionError) {
        (**self).session_failed(error);
    }

    fn session_closed(&self, report: &SessionReport) {
        (**self).session_closed(report);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            chat_path = %config.chat_path(),
            request_timeout_secs = config.request_timeout().as_secs(),
            early_work = %config.early_work(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn listener_bound(&self, address: SocketAddr, chat_path: &str) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_bound",
            %address,
            chat_path,
            "accepting WebSocket connections"
        );
    }

    fn connection_accepted(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "connection_accepted",
            "peer connected"
        );
    }

    fn session_ready(&self, tools: usize) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_ready",
            tools,
            "capabilities bound"
        );
    }

    fn session_failed(&self, error: &SessionError) {
        tracing::warn!(
            target: HEALTH_TARGET,
            event = "session_failed",
            error = %error,
            "session could not become ready"
        );
    }

    fn session_closed(&self, report: &SessionReport) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "session_closed",
            exit = %report.exit,
            failed_pending = report.failed_pending,
            malformed_frames = report.counters.malformed_frames,
            ignored_frames = report.counters.ignored_frames,
            unmatched_replies = report.counters.unmatched_replies,
            work_items = report.counters.work_items,
            "session closed"
        );
    }
}

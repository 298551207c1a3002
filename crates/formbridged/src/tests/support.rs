//! Test harness utilities shared by the daemon suites.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ortho_config::{OrthoConfig, OrthoError};

use formbridge_config::{Config, EarlyWorkPolicy, ListenEndpoint};
use formbridge_session::{SessionError, SessionReport};

use crate::bootstrap::{BootstrapError, ConfigLoader, Daemon, StaticConfigLoader, bootstrap_with};
use crate::health::HealthReporter;

/// Scenario world shared across BDD steps.
pub struct TestWorld {
    loader: Box<dyn ConfigLoader>,
    pub reporter: Arc<RecordingHealthReporter>,
    daemon: Option<Daemon>,
    bootstrap_error: Option<BootstrapError>,
}

impl TestWorld {
    /// Builds a world with a successful configuration loader.
    pub fn new() -> Self {
        Self {
            loader: Box::new(StaticConfigLoader::new(loopback_config())),
            reporter: Arc::new(RecordingHealthReporter::default()),
            daemon: None,
            bootstrap_error: None,
        }
    }

    /// Installs a loader that always fails.
    pub fn use_failing_loader(&mut self) {
        self.loader = Box::new(FailingConfigLoader);
        self.reset_results();
    }

    /// Installs a loader returning `config`.
    pub fn use_config(&mut self, config: Config) {
        self.loader = Box::new(StaticConfigLoader::new(config));
        self.reset_results();
    }

    /// Runs the bootstrap sequence once.
    pub fn bootstrap(&mut self) {
        if self.daemon.is_some() || self.bootstrap_error.is_some() {
            return;
        }

        match bootstrap_with(&*self.loader, self.reporter.clone()) {
            Ok(daemon) => self.daemon = Some(daemon),
            Err(error) => self.bootstrap_error = Some(error),
        }
    }

    /// Returns the bootstrap error, if any.
    pub fn bootstrap_error(&self) -> Option<&BootstrapError> {
        self.bootstrap_error.as_ref()
    }

    /// Returns the daemon handle when bootstrap succeeded.
    pub fn daemon(&self) -> Option<&Daemon> {
        self.daemon.as_ref()
    }

    fn reset_results(&mut self) {
        self.daemon = None;
        self.bootstrap_error = None;
    }
}

impl Default for TestWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration listening on an ephemeral loopback port.
pub fn loopback_config() -> Config {
    Config {
        listen: ListenEndpoint::new("127.0.0.1", 0),
        ..Config::default()
    }
}

/// Loopback configuration that queues early work, so a peer can send work
/// straight after answering discovery.
pub fn queueing_config() -> Config {
    Config {
        early_work: EarlyWorkPolicy::Queue,
        request_timeout_secs: 5,
        ..loopback_config()
    }
}

/// Loader that intentionally fails by passing invalid CLI arguments.
pub struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("formbridged"),
            OsString::from("--listen"),
            OsString::from("no-port-here"),
        ];
        Config::load_from_iter(args)
    }
}

/// Records health events for assertions.
#[derive(Default)]
pub struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    /// Polls until an event matching `predicate` is recorded.
    pub async fn wait_for(&self, predicate: impl Fn(&HealthEvent) -> bool) -> HealthEvent {
        let poll = async {
            loop {
                if let Some(event) = self.events().into_iter().find(|event| predicate(event)) {
                    return event;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap_or_else(|_| panic!("event never recorded: {:?}", self.events()))
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_bound(&self, address: SocketAddr, chat_path: &str) {
        self.record(HealthEvent::ListenerBound {
            address,
            chat_path: chat_path.to_owned(),
        });
    }

    fn connection_accepted(&self) {
        self.record(HealthEvent::ConnectionAccepted);
    }

    fn session_ready(&self, tools: usize) {
        self.record(HealthEvent::SessionReady(tools));
    }

    fn session_failed(&self, error: &SessionError) {
        self.record(HealthEvent::SessionFailed(error.to_string()));
    }

    fn session_closed(&self, report: &SessionReport) {
        self.record(HealthEvent::SessionClosed {
            failed_pending: report.failed_pending,
            work_items: report.counters.work_items,
        });
    }
}

/// Structured health events tracked during tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    /// Bootstrap started.
    BootstrapStarting,
    /// Bootstrap completed successfully.
    BootstrapSucceeded,
    /// Bootstrap failed with an error description.
    BootstrapFailed(String),
    /// The listener is accepting connections.
    ListenerBound {
        /// Bound address.
        address: SocketAddr,
        /// Upgraded route.
        chat_path: String,
    },
    /// A peer connected.
    ConnectionAccepted,
    /// A session bound this many capabilities.
    SessionReady(usize),
    /// A session failed to start.
    SessionFailed(String),
    /// A session was torn down.
    SessionClosed {
        /// Requests failed at teardown.
        failed_pending: usize,
        /// Work items seen over the session's life.
        work_items: u64,
    },
}

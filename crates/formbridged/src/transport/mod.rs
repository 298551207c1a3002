//! WebSocket listener serving one session per connection.
//!
//! Each upgrade on the chat route becomes a [`ConnectionSession`]: the
//! session starts listening, discovers the peer's capabilities, and then
//! runs until the peer disconnects or the server shuts down.

mod websocket;

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use formbridge_config::ListenEndpoint;
use formbridge_session::{ConnectionSession, ReasoningEngine, SessionConfig};

use crate::bootstrap::Daemon;
use crate::health::HealthReporter;

pub use self::websocket::{WebSocketSink, WebSocketSource, split};

pub(crate) const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Errors raised while serving connections.
#[derive(Debug, Error)]
pub enum ServeError {
    /// The listener could not bind its address.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// The endpoint that failed to bind.
        endpoint: ListenEndpoint,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The bound socket's address could not be read.
    #[error("failed to read the listener address: {0}")]
    LocalAddr(#[source] io::Error),
    /// The HTTP server stopped with an error.
    #[error("server failed: {0}")]
    Serve(#[source] io::Error),
}

struct ServerState {
    session_config: SessionConfig,
    engine: Arc<dyn ReasoningEngine>,
    reporter: Arc<dyn HealthReporter>,
    shutdown: CancellationToken,
}

/// A bound WebSocket listener, ready to serve.
pub struct Server {
    listener: TcpListener,
    address: SocketAddr,
    chat_path: String,
    state: Arc<ServerState>,
}

impl Server {
    /// Binds the configured listen address.
    ///
    /// `shutdown` stops the server and cancels every live session.
    pub async fn bind(
        daemon: &Daemon,
        engine: Arc<dyn ReasoningEngine>,
        shutdown: CancellationToken,
    ) -> Result<Self, ServeError> {
        let endpoint = daemon.config().listen().clone();
        let listener = TcpListener::bind((endpoint.host(), endpoint.port()))
            .await
            .map_err(|source| ServeError::Bind {
                endpoint: endpoint.clone(),
                source,
            })?;
        let address = listener.local_addr().map_err(ServeError::LocalAddr)?;
        Ok(Self {
            listener,
            address,
            chat_path: daemon.config().chat_path(),
            state: Arc::new(ServerState {
                session_config: daemon.session_config(),
                engine,
                reporter: daemon.reporter(),
                shutdown,
            }),
        })
    }

    /// The address actually bound, useful when the port was `0`.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Serves connections until the shutdown token fires.
    pub async fn run(self) -> Result<(), ServeError> {
        let Self {
            listener,
            address,
            chat_path,
            state,
        } = self;
        state.reporter.listener_bound(address, &chat_path);

        let shutdown = state.shutdown.clone();
        let app = Router::new()
            .route(&chat_path, get(chat_handler))
            .with_state(state);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(ServeError::Serve)
    }
}

async fn chat_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> Response {
    ws.on_upgrade(move |socket| drive_connection(socket, state))
}

async fn drive_connection(socket: WebSocket, state: Arc<ServerState>) {
    state.reporter.connection_accepted();

    let (sink, source) = split(socket);
    let mut session = ConnectionSession::new(
        Arc::new(sink),
        Box::new(source),
        Arc::clone(&state.engine),
        state.session_config.clone(),
    );
    let forward = forward_shutdown(&state.shutdown, session.cancellation());

    match session.establish().await {
        Ok(tools) => state.reporter.session_ready(tools),
        Err(error) => state.reporter.session_failed(&error),
    }

    match session.run().await {
        Ok(report) => state.reporter.session_closed(&report),
        Err(error) => warn!(target: TRANSPORT_TARGET, %error, "session ended abnormally"),
    }
    forward.abort();
    debug!(target: TRANSPORT_TARGET, "connection finished");
}

/// Cancels `session` when the server shuts down.
fn forward_shutdown(
    server: &CancellationToken,
    session: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let server = server.clone();
    tokio::spawn(async move {
        tokio::select! {
            () = server.cancelled() => session.cancel(),
            () = session.cancelled() => {}
        }
    })
}

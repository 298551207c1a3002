//! Behaviour-driven tests for the connection session lifecycle.

use std::sync::Arc;

use rstest::fixture;
use rstest_bdd_macros::{given, scenario, then, when};
use serde_json::{Value, json};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;

use crate::error::{CorrelationError, SessionError};
use crate::session::{ConnectionSession, SessionConfig, SessionState};
use crate::test_support::FirstToolEngine;
use crate::transport::memory::{Endpoint, duplex};
use crate::transport::{FrameSink as _, FrameSource as _};

type Discovery = JoinHandle<(ConnectionSession, Result<usize, SessionError>)>;

struct SessionWorld {
    runtime: Runtime,
    session: Option<ConnectionSession>,
    peer: Option<Endpoint>,
    discovery: Option<Discovery>,
    discovery_result: Option<Result<usize, SessionError>>,
    last_call_id: Option<i64>,
}

#[fixture]
fn world() -> SessionWorld {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("runtime");
    SessionWorld {
        runtime,
        session: None,
        peer: None,
        discovery: None,
        discovery_result: None,
        last_call_id: None,
    }
}

impl SessionWorld {
    fn listen(&mut self) {
        let (local, peer) = duplex();
        let mut session = ConnectionSession::new(
            Arc::new(local.sink),
            Box::new(local.source),
            Arc::new(FirstToolEngine),
            SessionConfig::default(),
        );
        let _context = self.runtime.enter();
        session.start_listening().expect("start listening");
        self.session = Some(session);
        self.peer = Some(peer);
    }

    fn start_discovery(&mut self) -> Value {
        let mut session = self.session.take().expect("session must exist");
        self.discovery = Some(self.runtime.spawn(async move {
            let result = session.discover().await;
            (session, result)
        }));
        self.next_frame()
    }

    fn finish_discovery(&mut self) {
        let handle = self.discovery.take().expect("discovery must be running");
        let (session, result) = self.runtime.block_on(handle).expect("discovery task");
        self.session = Some(session);
        self.discovery_result = Some(result);
    }

    fn send(&mut self, frame: &Value) {
        let text = frame.to_string();
        let runtime = &self.runtime;
        let peer = self.peer.as_mut().expect("peer must be connected");
        runtime
            .block_on(peer.sink.send(text))
            .expect("send to session");
    }

    fn next_frame(&mut self) -> Value {
        let runtime = &self.runtime;
        let peer = self.peer.as_mut().expect("peer must be connected");
        let text = runtime
            .block_on(peer.source.receive())
            .expect("receive")
            .expect("session sent a frame");
        serde_json::from_str(&text).expect("frame is JSON")
    }
}

#[given("a listening session")]
fn given_listening_session(world: &mut SessionWorld) {
    world.listen();
}

#[given("a ready session offering the capability \"{name}\"")]
fn given_ready_session(world: &mut SessionWorld, name: String) {
    world.listen();
    let request = world.start_discovery();
    world.send(&json!({
        "jsonrpc": "2.0",
        "id": request["id"],
        "result": { "capabilities": [{
            "name": name,
            "description": "Looks up a company",
            "inputSchema": { "type": "object", "properties": { "query": { "type": "string" } } }
        }] }
    }));
    world.finish_discovery();
    let session = world.session.as_ref().expect("session");
    assert_eq!(session.state(), SessionState::Ready);
}

#[when("the peer sends the work item \"{message}\" with id \"{id}\"")]
fn when_peer_sends_work(world: &mut SessionWorld, message: String, id: String) {
    world.send(&json!({ "message": message, "messageId": id }));
}

#[when("discovery starts")]
fn when_discovery_starts(world: &mut SessionWorld) {
    let request = world.start_discovery();
    assert_eq!(request["method"], "list");
}

#[when("the peer disconnects")]
fn when_peer_disconnects(world: &mut SessionWorld) {
    assert!(world.peer.take().is_some(), "peer must be connected");
}

#[when("the peer answers the call with \"{answer}\"")]
fn when_peer_answers(world: &mut SessionWorld, answer: String) {
    let id = world.last_call_id.expect("a call must have been received");
    world.send(&json!({ "jsonrpc": "2.0", "id": id, "result": answer }));
}

#[then("the peer receives the error \"{error}\" for \"{id}\"")]
fn then_peer_receives_error(world: &mut SessionWorld, error: String, id: String) {
    let frame = world.next_frame();
    assert_eq!(frame, json!({ "error": error, "messageId": id }));
}

#[then("the peer receives the result \"{result}\" for \"{id}\"")]
fn then_peer_receives_result(world: &mut SessionWorld, result: String, id: String) {
    let frame = world.next_frame();
    assert_eq!(frame, json!({ "result": result, "messageId": id }));
}

#[then("the peer receives a call to \"{name}\" with query \"{query}\"")]
fn then_peer_receives_call(world: &mut SessionWorld, name: String, query: String) {
    let frame = world.next_frame();
    assert_eq!(frame["method"], "call");
    assert_eq!(frame["params"]["name"], Value::String(name));
    assert_eq!(frame["params"]["arguments"], json!({ "query": query }));
    world.last_call_id = frame["id"].as_i64();
}

#[then("discovery fails because the connection closed")]
fn then_discovery_fails(world: &mut SessionWorld) {
    world.finish_discovery();
    let result = world.discovery_result.take().expect("discovery finished");
    assert!(matches!(
        result,
        Err(SessionError::Discovery(CorrelationError::ConnectionClosed { .. }))
    ));
}

#[then("the session is closed with {failed} failed request")]
fn then_session_closed(world: &mut SessionWorld, failed: usize) {
    let runtime = &world.runtime;
    let session = world.session.as_mut().expect("session");
    let report = runtime.block_on(session.run()).expect("run");
    assert_eq!(report.failed_pending, failed);
    assert_eq!(session.state(), SessionState::Closed);
}

#[scenario(
    path = "tests/features/session_lifecycle.feature",
    name = "Work that arrives before discovery is rejected"
)]
fn early_work_rejected(world: SessionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/session_lifecycle.feature",
    name = "Work invokes a discovered capability"
)]
fn work_invokes_capability(world: SessionWorld) {
    let _ = world;
}

#[scenario(
    path = "tests/features/session_lifecycle.feature",
    name = "A disconnect during discovery closes the session"
)]
fn disconnect_during_discovery(world: SessionWorld) {
    let _ = world;
}

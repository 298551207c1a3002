//! End-to-end tests driving the WebSocket listener with a real client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use rstest::rstest;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;

use formbridge_config::Config;
use formbridge_session::{CapabilitySet, EngineError, ReasoningEngine, render_output};

use crate::bootstrap::{Daemon, StaticConfigLoader, bootstrap_with};
use crate::transport::{ServeError, Server};

use super::support::{HealthEvent, RecordingHealthReporter, queueing_config};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Asks the first capability about the input and quotes its answer.
struct LookupEngine;

#[async_trait]
impl ReasoningEngine for LookupEngine {
    async fn respond(&self, tools: &CapabilitySet, input: &str) -> Result<String, EngineError> {
        let proxy = tools
            .iter()
            .next()
            .ok_or_else(|| EngineError::new("no capabilities bound"))?;
        let output = proxy.invoke(json!({ "query": input })).await;
        Ok(format!("answer: {}", render_output(&output)))
    }
}

fn bootstrap(config: Config, reporter: &Arc<RecordingHealthReporter>) -> Daemon {
    bootstrap_with(&StaticConfigLoader::new(config), reporter.clone())
        .expect("bootstrap should succeed")
}

async fn next_json(client: &mut Client) -> Value {
    let read = async {
        loop {
            match client.next().await {
                Some(Ok(Message::Text(text))) => {
                    return serde_json::from_str(text.as_str()).expect("peer frame is JSON");
                }
                Some(Ok(_)) => {}
                Some(Err(error)) => panic!("websocket error: {error}"),
                None => panic!("server closed the connection"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(5), read)
        .await
        .expect("timed out waiting for a frame")
}

async fn send_json(client: &mut Client, value: &Value) {
    client
        .send(Message::text(value.to_string()))
        .await
        .expect("send frame");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn work_round_trips_through_a_discovered_capability() {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let daemon = bootstrap(queueing_config(), &reporter);
    let shutdown = CancellationToken::new();
    let server = Server::bind(&daemon, Arc::new(LookupEngine), shutdown.clone())
        .await
        .expect("bind");
    let address = server.local_addr();
    let serving = tokio::spawn(server.run());

    let url = format!("ws://{address}{}", daemon.config().chat_path());
    let (mut client, _) = connect_async(url).await.expect("connect");

    let list = next_json(&mut client).await;
    assert_eq!(list["method"], "list");
    send_json(
        &mut client,
        &json!({
            "jsonrpc": "2.0",
            "id": list["id"],
            "result": { "capabilities": [{ "name": "lookup", "description": "Find a company" }] }
        }),
    )
    .await;
    send_json(&mut client, &json!({ "message": "acme", "messageId": "m-1" })).await;

    let call = next_json(&mut client).await;
    assert_eq!(call["method"], "call");
    assert_eq!(call["params"], json!({ "name": "lookup", "arguments": { "query": "acme" } }));
    send_json(
        &mut client,
        &json!({ "jsonrpc": "2.0", "id": call["id"], "result": "Acme Ltd" }),
    )
    .await;

    let reply = next_json(&mut client).await;
    assert_eq!(reply, json!({ "result": "answer: Acme Ltd", "messageId": "m-1" }));

    client.close(None).await.expect("close");
    let closed = reporter
        .wait_for(|event| matches!(event, HealthEvent::SessionClosed { .. }))
        .await;
    assert_eq!(
        closed,
        HealthEvent::SessionClosed {
            failed_pending: 0,
            work_items: 1,
        }
    );

    let events = reporter.events();
    assert!(events.contains(&HealthEvent::ListenerBound {
        address,
        chat_path: String::from("/chat"),
    }));
    assert!(events.contains(&HealthEvent::ConnectionAccepted));
    assert!(events.contains(&HealthEvent::SessionReady(1)));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), serving)
        .await
        .expect("server should stop after shutdown")
        .expect("server task")
        .expect("server result");
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_closes_live_sessions() {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let daemon = bootstrap(queueing_config(), &reporter);
    let shutdown = CancellationToken::new();
    let server = Server::bind(&daemon, Arc::new(LookupEngine), shutdown.clone())
        .await
        .expect("bind");
    let url = format!("ws://{}{}", server.local_addr(), daemon.config().chat_path());
    tokio::spawn(server.run());

    let (mut client, _) = connect_async(url).await.expect("connect");
    let list = next_json(&mut client).await;
    send_json(
        &mut client,
        &json!({ "jsonrpc": "2.0", "id": list["id"], "result": { "capabilities": [] } }),
    )
    .await;
    reporter
        .wait_for(|event| *event == HealthEvent::SessionReady(0))
        .await;

    shutdown.cancel();

    reporter
        .wait_for(|event| matches!(event, HealthEvent::SessionClosed { .. }))
        .await;
}

#[rstest]
#[tokio::test]
async fn binding_an_occupied_port_fails() {
    let reporter = Arc::new(RecordingHealthReporter::default());
    let first = bootstrap(queueing_config(), &reporter);
    let shutdown = CancellationToken::new();
    let holder = Server::bind(&first, Arc::new(LookupEngine), shutdown.clone())
        .await
        .expect("bind");

    let mut config = queueing_config();
    config.listen = formbridge_config::ListenEndpoint::new("127.0.0.1", holder.local_addr().port());
    let second = bootstrap(config, &reporter);
    let result = Server::bind(&second, Arc::new(LookupEngine), shutdown).await;

    assert!(matches!(result, Err(ServeError::Bind { .. })));
}

//! End-to-end tests of the WebSocket driver behind a gateway.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use event_gateway::{
    ChannelId, ClientConnection, ClientSession, Gateway, NetworkDriver, NetworkMessage,
    NetworkOptions, Origin, WebSocketDriver,
};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::time::{Instant, sleep, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn server_options() -> NetworkOptions {
    NetworkOptions::new()
        .with_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
        .with_path("/gateway")
}

async fn echo_gateway() -> anyhow::Result<(Gateway, Arc<WebSocketDriver>)> {
    let driver = Arc::new(WebSocketDriver::new(server_options()));
    let gateway = Gateway::builder()
        .origin_with_default_auth(Origin::Client, driver.clone())
        .build()?;

    let router = gateway.router(Origin::Client).context("client router")?;
    router.add_handler(
        "echo",
        |message: NetworkMessage, session: &ClientSession| -> event_gateway::Result<()> {
            let reply = NetworkMessage::from_value("echoed", message.payload().clone());
            session.send(reply)
        },
    )?;

    gateway.start().await?;
    Ok((gateway, driver))
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> anyhow::Result<()> {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        if Instant::now() > deadline {
            bail!("condition not met within {WAIT:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_echo_round_trip() -> anyhow::Result<()> {
    init_tracing();
    let (gateway, driver) = echo_gateway().await?;
    let url = driver.ws_url().context("server url")?;

    let (mut ws, _) = connect_async(url.as_str()).await?;
    let request = json!({"event": "echo", "payload": {"text": "hello"}});
    ws.send(Message::text(request.to_string())).await?;

    let reply = timeout(WAIT, ws.next())
        .await?
        .context("stream ended")??;
    let reply: Value = serde_json::from_str(reply.to_text()?)?;
    assert_eq!(reply["event"], "echoed");
    assert_eq!(reply["payload"]["text"], "hello");

    let router = gateway.router(Origin::Client).context("client router")?;
    assert_eq!(router.sessions().len(), 1);

    ws.close(None).await?;
    wait_until(|| router.sessions().is_empty()).await?;

    gateway.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_unknown_events_and_garbage_are_dropped() -> anyhow::Result<()> {
    init_tracing();
    let (gateway, driver) = echo_gateway().await?;
    let url = driver.ws_url().context("server url")?;

    let (mut ws, _) = connect_async(url.as_str()).await?;
    ws.send(Message::text("not json")).await?;
    ws.send(Message::text(json!({"event": "unbound"}).to_string()))
        .await?;
    ws.send(Message::text(json!({"event": "echo", "payload": 1}).to_string()))
        .await?;

    let reply = timeout(WAIT, ws.next())
        .await?
        .context("stream ended")??;
    let reply: Value = serde_json::from_str(reply.to_text()?)?;
    assert_eq!(reply["payload"], 1);

    gateway.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_wrong_path_rejected() -> anyhow::Result<()> {
    init_tracing();
    let (gateway, driver) = echo_gateway().await?;
    let addr = driver.local_addr().context("bound address")?;

    let result = connect_async(format!("ws://{addr}/elsewhere")).await;
    assert!(result.is_err());

    gateway.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_outbound_connection_between_gateways() -> anyhow::Result<()> {
    init_tracing();
    let (server, server_driver) = echo_gateway().await?;
    let url = server_driver.ws_url().context("server url")?;

    let client_driver = Arc::new(WebSocketDriver::new(
        NetworkOptions::client_only().with_reconnect_interval(Duration::from_millis(20)),
    ));
    let client = Gateway::builder()
        .origin_with_default_auth(Origin::Bus, client_driver.clone())
        .build()?;

    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&replies);
    let bus = client.router(Origin::Bus).context("bus router")?;
    bus.add_handler(
        "echoed",
        move |message: NetworkMessage, _: &ClientSession| -> event_gateway::Result<()> {
            sink.lock().push(message.payload().clone());
            Ok(())
        },
    )?;
    client.start().await?;

    let upstream = ChannelId::from("upstream");
    client_driver.connect_to(
        ClientConnection::parse(upstream.clone(), [url.as_str()])?,
        None,
    )?;

    wait_until(|| bus.session(&upstream).is_some_and(|s| s.is_authenticated())).await?;
    let session = bus.session(&upstream).context("upstream session")?;
    client.send_message(&session, NetworkMessage::from_value("echo", json!("ping")))?;

    wait_until(|| !replies.lock().is_empty()).await?;
    assert_eq!(replies.lock()[0], json!("ping"));

    assert!(client_driver.disconnect(&upstream));
    wait_until(|| bus.session(&upstream).is_none()).await?;

    client.stop().await?;
    server.stop().await?;
    Ok(())
}

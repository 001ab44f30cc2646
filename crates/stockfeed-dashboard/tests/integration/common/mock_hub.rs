//! Mock hub server for integration tests.
//!
//! Speaks enough of the hub protocol to:
//! - Complete the JSON handshake
//! - Acknowledge (or reject) join/leave invocations
//! - Push price updates to every open connection
//! - Drop every connection without a close frame

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

const RS: char = '\u{1e}';

/// Invocation received by the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedCall {
    /// 1-based connection number.
    pub connection: u32,
    pub target: String,
    pub argument: String,
}

#[derive(Debug, Clone)]
enum Control {
    Frame(String),
    Drop,
}

#[derive(Default)]
struct HubState {
    connections: u32,
    calls: Vec<ReceivedCall>,
    rejected: HashSet<String>,
}

/// A mock hub server for testing.
pub struct MockHub {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    control_tx: broadcast::Sender<Control>,
    state: Arc<Mutex<HubState>>,
}

impl MockHub {
    /// Start a new mock hub on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(HubState::default()));
        let (control_tx, _) = broadcast::channel(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state_clone = state.clone();
        let control_clone = control_tx.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let control_rx = control_clone.subscribe();
                        tokio::spawn(handle_connection(stream, state_clone.clone(), control_rx));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            control_tx,
            state,
        }
    }

    /// Get the hub's WebSocket URL.
    pub fn url(&self) -> String {
        format!("ws://{}/stocksfeed", self.addr)
    }

    /// Number of handshakes completed.
    pub async fn connection_count(&self) -> u32 {
        self.state.lock().await.connections
    }

    /// All invocations received so far.
    pub async fn calls(&self) -> Vec<ReceivedCall> {
        self.state.lock().await.calls.clone()
    }

    /// Arguments of `target` calls received on `connection`.
    pub async fn calls_on(&self, connection: u32, target: &str) -> Vec<String> {
        let mut args: Vec<String> = self
            .calls()
            .await
            .into_iter()
            .filter(|call| call.connection == connection && call.target == target)
            .map(|call| call.argument)
            .collect();
        args.sort();
        args
    }

    /// Answer join/leave for `key` with an error completion.
    pub async fn reject(&self, key: &str) {
        self.state.lock().await.rejected.insert(key.to_string());
    }

    /// Push a price update to every open connection.
    pub fn push_price(&self, ticker: &str, price: f64) {
        let record = json!({
            "type": 1,
            "target": "ReceiveStockPriceUpdate",
            "arguments": [{"ticker": ticker, "price": price}]
        });
        let _ = self.control_tx.send(Control::Frame(format!("{record}{RS}")));
    }

    /// Drop every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control_tx.send(Control::Drop);
    }

    /// Shutdown the hub.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    state: Arc<Mutex<HubState>>,
    mut control_rx: broadcast::Receiver<Control>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    let (mut write, mut read) = ws_stream.split();

    // Hub handshake.
    match read.next().await {
        Some(Ok(Message::Text(text))) if text.contains("\"protocol\":\"json\"") => {}
        _ => return,
    }
    if write.send(Message::Text(format!("{{}}{RS}"))).await.is_err() {
        return;
    }
    let connection = {
        let mut state = state.lock().await;
        state.connections += 1;
        state.connections
    };

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        for record in text.split(RS).filter(|r| !r.trim().is_empty()) {
                            let Ok(value) = serde_json::from_str::<Value>(record) else {
                                continue;
                            };
                            if let Some(reply) = handle_record(connection, &value, &state).await {
                                if write.send(Message::Text(reply)).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    _ => {}
                }
            }
            control = control_rx.recv() => {
                match control {
                    Ok(Control::Frame(frame)) => {
                        if write.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    Ok(Control::Drop) | Err(_) => return,
                }
            }
        }
    }
}

/// Record an invocation and build its completion, if one is expected.
async fn handle_record(
    connection: u32,
    value: &Value,
    state: &Arc<Mutex<HubState>>,
) -> Option<String> {
    if value.get("type").and_then(Value::as_u64) != Some(1) {
        return None;
    }
    let target = value.get("target")?.as_str()?.to_string();
    let argument = value
        .get("arguments")
        .and_then(|args| args.get(0))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let rejected = {
        let mut state = state.lock().await;
        state.calls.push(ReceivedCall {
            connection,
            target: target.clone(),
            argument: argument.clone(),
        });
        state.rejected.contains(&argument)
    };

    let invocation_id = value.get("invocationId")?.as_str()?;
    let completion = if rejected {
        json!({"type": 3, "invocationId": invocation_id, "error": format!("{target} rejected")})
    } else {
        json!({"type": 3, "invocationId": invocation_id, "result": null})
    };
    Some(format!("{completion}{RS}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_hub_starts() {
        let hub = MockHub::start().await;
        assert!(hub.url().starts_with("ws://127.0.0.1:"));
        assert_eq!(hub.connection_count().await, 0);
        hub.shutdown().await;
    }
}

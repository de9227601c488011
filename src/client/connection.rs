//! WebSocket transport for a `ChannelBridge`

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::bridge::{BridgeError, BridgeResult, ChannelBridge};
use crate::server::Envelope;

/// A window's live connection to the backend
pub struct WindowConnection {
    bridge: ChannelBridge,
    reader: JoinHandle<()>,
}

impl WindowConnection {
    /// Bridge carrying this connection's messages
    pub fn bridge(&self) -> &ChannelBridge {
        &self.bridge
    }

    /// Wait until the backend closes the connection
    pub async fn closed(self) {
        let _ = self.reader.await;
    }
}

/// Connect to the backend at `url` (`ws://host:port/ws[?token=...]`)
pub async fn connect(url: &str) -> BridgeResult<WindowConnection> {
    let (ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| BridgeError::Connect(e.to_string()))?;
    info!("Connected to {}", url);

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Envelope>();
    let bridge = ChannelBridge::new(outbound_tx);

    tokio::spawn(async move {
        while let Some(envelope) = outbound_rx.recv().await {
            let json = match envelope.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Dropping unserializable message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(json)).await {
                warn!("Failed to send message: {}", e);
                break;
            }
        }
        let _ = ws_sender.send(Message::Close(None)).await;
    });

    let reader = tokio::spawn({
        let bridge = bridge.clone();
        async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => match Envelope::from_json(&text) {
                        Ok(envelope) => bridge.dispatch(envelope),
                        Err(e) => warn!("Invalid message from backend: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Connection error: {}", e);
                        break;
                    }
                }
            }
            debug!("Connection to backend closed");
            bridge.close();
        }
    });

    Ok(WindowConnection { bridge, reader })
}

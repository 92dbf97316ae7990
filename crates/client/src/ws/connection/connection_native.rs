//! Native push channel transport using tokio-tungstenite.

use async_trait::async_trait;
use futures_util::{future, SinkExt, StreamExt};
use tokio_tungstenite::{connect_async, tungstenite, tungstenite::Message};

use super::{Connector, Transport};
use crate::error::{SyncError, SyncResult};

/// Opens WebSocket transports with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn open(&self, url: &str) -> SyncResult<Transport> {
        let (ws_stream, _response) = connect_async(url)
            .await
            .map_err(|e| SyncError::Transport(e.to_string()))?;
        let (write, read) = ws_stream.split();

        let sink = write
            .with(|text: String| {
                future::ready(Ok::<_, tungstenite::Error>(Message::Text(text.into())))
            })
            .sink_map_err(|e| SyncError::Transport(e.to_string()));

        let stream = read
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    // Pong is handled automatically by tungstenite
                    Ok(_) => None,
                    Err(e) => Some(Err(SyncError::Transport(e.to_string()))),
                })
            })
            .boxed();

        Ok(Transport {
            sink: Box::pin(sink),
            stream,
        })
    }
}

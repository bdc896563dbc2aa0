use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use verity_engine::backend::BackendError;
use verity_engine::presentation::PresentationSink;
use verity_engine::protocol::PresentationMessage;

/// One serialized presentation message, tagged with its user for filtering.
#[derive(Debug, Clone)]
struct Outbound {
    user_id: String,
    json: Arc<str>,
}

/// What a dashboard client may send: narrow the feed to one user, or widen
/// it again with `null`.
#[derive(Debug, Deserialize)]
struct ClientRequest {
    subscribe: Option<String>,
}

/// WebSocket endpoint that broadcasts presentation messages to every
/// connected dashboard.
#[derive(Clone)]
pub struct PresentationServer {
    port: u16,
    message_tx: broadcast::Sender<Outbound>,
}

/// Live server. Implements `PresentationSink`; sending never blocks on slow
/// clients, which drop messages instead.
#[derive(Clone)]
pub struct ServerHandle {
    pub addr: SocketAddr,
    message_tx: broadcast::Sender<Outbound>,
}

impl PresentationServer {
    /// Port `0` picks a free port; read it back from `ServerHandle::addr`.
    pub fn new(port: u16) -> Self {
        let (message_tx, _) = broadcast::channel(256);
        Self { port, message_tx }
    }

    pub async fn start(&self) -> Result<ServerHandle, Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(&addr).await?;
        let addr = listener.local_addr()?;
        info!("Presentation server listening on: {}", addr);

        let message_tx = self.message_tx.clone();
        tokio::spawn(async move {
            debug!("Presentation accept loop started");
            while let Ok((stream, peer)) = listener.accept().await {
                info!("Accepted TCP connection from: {}", peer);
                tokio::spawn(accept_connection(stream, message_tx.subscribe()));
            }
        });

        Ok(ServerHandle {
            addr,
            message_tx: self.message_tx.clone(),
        })
    }
}

impl ServerHandle {
    pub fn client_count(&self) -> usize {
        self.message_tx.receiver_count()
    }
}

#[async_trait]
impl PresentationSink for ServerHandle {
    async fn send(&self, message: PresentationMessage) -> Result<(), BackendError> {
        let json = serde_json::to_string(&message)?;
        let outbound = Outbound {
            user_id: message.user_id().to_string(),
            json: json.into(),
        };
        // No connected dashboard is not a failure.
        if self.message_tx.send(outbound).is_err() {
            debug!("No dashboard connected, message dropped");
        }
        Ok(())
    }
}

async fn accept_connection(stream: TcpStream, mut message_rx: broadcast::Receiver<Outbound>) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    info!("New dashboard connection established");
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let mut filter: Option<String> = None;

    loop {
        tokio::select! {
            outbound = message_rx.recv() => match outbound {
                Ok(outbound) => {
                    if filter.as_deref().is_some_and(|user| user != outbound.user_id) {
                        continue;
                    }
                    if let Err(e) = ws_sender.send(Message::Text(outbound.json.to_string())).await {
                        error!("Failed to send message to WS: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Dashboard connection lagging, skipped {} message(s)", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientRequest>(&text) {
                        Ok(request) => {
                            info!("Dashboard filter set to {:?}", request.subscribe);
                            filter = request.subscribe;
                        }
                        Err(e) => warn!("Ignoring malformed dashboard request: {} | Text: {}", e, text),
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    info!("WebSocket closed");
                    break;
                }
                Some(Err(e)) => {
                    error!("WebSocket error: {}", e);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
}

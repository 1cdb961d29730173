use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Closed { reason: CloseReason },
}

/// Why the socket went away. Only ever logged; the bus sees a plain `disconnected`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    ConnectFailed(String),
    ServerClosed,
    ReadError(String),
    WriteError(String),
    ClientShutdown,
}

/// Opens the single transport for a session.
pub trait Connector {
    fn connect(
        &self,
        url: Url,
        outbound: mpsc::Receiver<String>,
        events: mpsc::Sender<TransportEvent>,
    );
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

impl Connector for WebSocketConnector {
    fn connect(
        &self,
        url: Url,
        outbound: mpsc::Receiver<String>,
        events: mpsc::Sender<TransportEvent>,
    ) {
        tokio::spawn(run_socket(url, outbound, events));
    }
}

pub async fn run_socket(
    url: Url,
    mut outbound: mpsc::Receiver<String>,
    events: mpsc::Sender<TransportEvent>,
) {
    let reason = drive_socket(&url, &mut outbound, &events).await;
    info!(event = "transport_closed", url = %url, reason = ?reason);
    let _ = events.send(TransportEvent::Closed { reason }).await;
}

async fn drive_socket(
    url: &Url,
    outbound: &mut mpsc::Receiver<String>,
    events: &mpsc::Sender<TransportEvent>,
) -> CloseReason {
    let mut ws = match connect_async(url.as_str()).await {
        Ok((ws, _)) => ws,
        Err(err) => {
            warn!(event = "transport_connect_error", url = %url, error = %err);
            return CloseReason::ConnectFailed(err.to_string());
        }
    };
    info!(event = "transport_open", url = %url);
    if events.send(TransportEvent::Opened).await.is_err() {
        let _ = ws.close(None).await;
        return CloseReason::ClientShutdown;
    }

    loop {
        tokio::select! {
            incoming = ws.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if events.send(TransportEvent::Frame(text)).await.is_err() {
                            let _ = ws.close(None).await;
                            return CloseReason::ClientShutdown;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        warn!(event = "transport_binary_frame_ignored", bytes = bytes.len());
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!(event = "transport_close_frame", frame = ?frame);
                        return CloseReason::ServerClosed;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!(event = "transport_read_error", error = %err);
                        return CloseReason::ReadError(err.to_string());
                    }
                    None => return CloseReason::ServerClosed,
                }
            }
            maybe_text = outbound.recv() => {
                match maybe_text {
                    Some(text) => {
                        if let Err(err) = ws.send(Message::Text(text)).await {
                            warn!(event = "transport_write_error", error = %err);
                            return CloseReason::WriteError(err.to_string());
                        }
                    }
                    None => {
                        let _ = ws.close(None).await;
                        return CloseReason::ClientShutdown;
                    }
                }
            }
        }
    }
}

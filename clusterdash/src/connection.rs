/**
 * CONNECTION - Boucle de la connexion WebSocket partagée avec la gateway
 *
 * RÔLE : Un seul socket pour toute la session. Écrit les trames sortantes
 * produites par la session, remet chaque trame entrante au dispatcher.
 *
 * FONCTIONNEMENT :
 * - Reconnexion avec backoff fixe tant que le token n'est pas annulé
 * - Le récepteur sortant survit aux reconnexions : les requêtes émises
 *   pendant une coupure partent dès le retour de la connexion, sauf celles
 *   dont l'entrée de corrélation a disparu (timeout, annulation)
 * - Canal sortant fermé (session détruite) ou token annulé -> fin de boucle
 */

use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::health::ConnectionHealth;
use crate::protocol::QueuedFrame;

/// Fin d'une connexion établie
enum SocketEnd {
    Lost,
    Shutdown,
}

pub async fn run_connection(
    url: String,
    mut outbound: mpsc::UnboundedReceiver<QueuedFrame>,
    dispatcher: Arc<Dispatcher>,
    health: ConnectionHealth,
    shutdown: CancellationToken,
    backoff: Duration,
) {
    loop {
        let connected = tokio::select! {
            res = connect_async(url.as_str()) => res,
            _ = shutdown.cancelled() => break,
        };

        match connected {
            Ok((socket, _response)) => {
                info!(%url, "gateway websocket connected");
                health.mark_connected();
                match drive_socket(socket, &mut outbound, &dispatcher, &shutdown).await {
                    SocketEnd::Shutdown => break,
                    SocketEnd::Lost => warn!(%url, "gateway websocket lost"),
                }
            }
            Err(e) => warn!(%url, "gateway websocket connect failed: {}", e),
        }

        health.increment_reconnects();
        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown.cancelled() => break,
        }
    }
    health.mark_disconnected();
    info!("gateway connection loop stopped");
}

async fn drive_socket<S>(
    socket: S,
    outbound: &mut mpsc::UnboundedReceiver<QueuedFrame>,
    dispatcher: &Dispatcher,
    shutdown: &CancellationToken,
) -> SocketEnd
where
    S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    let (mut sink, mut stream) = socket.split();
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return SocketEnd::Shutdown;
            }
            frame = outbound.recv() => match frame {
                Some(queued) => {
                    if !dispatcher.awaiting(&queued.msg_id) {
                        debug!(msg_id = %queued.msg_id, "request abandoned before send, dropped");
                        continue;
                    }
                    if let Err(e) = sink.send(Message::Text(queued.text)).await {
                        warn!("websocket send failed: {}", e);
                        return SocketEnd::Lost;
                    }
                }
                None => {
                    debug!("outbound channel closed, closing websocket");
                    let _ = sink.send(Message::Close(None)).await;
                    return SocketEnd::Shutdown;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    dispatcher.dispatch_text(&text);
                }
                Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                    Ok(text) => {
                        dispatcher.dispatch_text(text);
                    }
                    Err(_) => warn!(len = bytes.len(), "non UTF-8 binary frame dropped"),
                },
                Some(Ok(Message::Close(_))) | None => return SocketEnd::Lost,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("websocket read failed: {}", e);
                    return SocketEnd::Lost;
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::CorrelationTable;
    use crate::dispatch::BroadcastRegistry;
    use crate::protocol::{OutboundFrame, GET_WORKLOADS};
    use serde_json::Value;

    #[tokio::test]
    async fn test_shutdown_while_unreachable() {
        let (_tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Arc::new(Dispatcher::new(Arc::new(CorrelationTable::new()), BroadcastRegistry::new()));
        let health = ConnectionHealth::new();
        let shutdown = CancellationToken::new();

        let task = tokio::spawn(run_connection(
            "ws://127.0.0.1:9/websocket".into(),
            rx,
            dispatcher,
            health.clone(),
            shutdown.clone(),
            Duration::from_millis(10),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();

        assert_eq!(health.status(), "disconnected");
        assert!(health.reconnects() >= 1);
    }

    #[tokio::test]
    async fn test_abandoned_frames_are_not_flushed_on_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/websocket", listener.local_addr().unwrap());
        let correlation = Arc::new(CorrelationTable::new());
        let dispatcher = Arc::new(Dispatcher::new(correlation.clone(), BroadcastRegistry::new()));

        // deux requêtes en file pendant la coupure ; la première a expiré
        let (tx, rx) = mpsc::unbounded_channel();
        let _replies: Vec<_> = ["gone", "live"]
            .into_iter()
            .map(|id| {
                let reply = correlation.register_oneshot(id);
                tx.send(OutboundFrame::with_id(GET_WORKLOADS, id.into(), Value::Null).queue().unwrap()).unwrap();
                reply
            })
            .collect();
        correlation.cancel("gone");

        let shutdown = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            url,
            rx,
            dispatcher,
            ConnectionHealth::new(),
            shutdown.clone(),
            Duration::from_millis(10),
        ));

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let first = ws.next().await.unwrap().unwrap().into_text().unwrap();
        let frame: Value = serde_json::from_str(&first).unwrap();
        assert_eq!(frame["msg_id"], "live");

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), task).await.unwrap().unwrap();
    }
}

use crate::transport::TransportBinding;
use futures::{Sink, Stream};
use rmcp::service::{RxJsonRpcMessage, TxJsonRpcMessage};
use rmcp::{RoleServer, ServerHandler, ServiceExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tracing::{debug, warn};

pub(crate) type ClientMessage = RxJsonRpcMessage<RoleServer>;
pub(crate) type ServerMessage = TxJsonRpcMessage<RoleServer>;

/// Server-side end of an in-process channel: a stream of client messages and
/// a sink for server messages, consumed by the rmcp service.
pub(crate) struct ChannelTransport {
    inbound: mpsc::UnboundedReceiver<ClientMessage>,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

/// Binding-side end of the same channel
pub(crate) struct ChannelEnds {
    pub(crate) inbound: mpsc::UnboundedSender<ClientMessage>,
    pub(crate) outbound: mpsc::UnboundedReceiver<ServerMessage>,
}

pub(crate) fn channel_transport() -> (ChannelTransport, ChannelEnds) {
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    (
        ChannelTransport {
            inbound: inbound_rx,
            outbound: outbound_tx,
        },
        ChannelEnds {
            inbound: inbound_tx,
            outbound: outbound_rx,
        },
    )
}

fn disconnected() -> std::io::Error {
    std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "transport binding disconnected",
    )
}

impl Stream for ChannelTransport {
    type Item = ClientMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inbound.poll_recv(cx)
    }
}

impl Sink<ServerMessage> for ChannelTransport {
    type Error = std::io::Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.outbound.is_closed() {
            Poll::Ready(Err(disconnected()))
        } else {
            Poll::Ready(Ok(()))
        }
    }

    fn start_send(self: Pin<&mut Self>, item: ServerMessage) -> Result<(), Self::Error> {
        self.outbound.send(item).map_err(|_| disconnected())
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }
}

/// Decodes one client message received over HTTP
pub(crate) fn parse_client_message(message: Value) -> Result<ClientMessage, serde_json::Error> {
    serde_json::from_value(message)
}

/// Runs `server` over `transport` until the transport ends.
pub(crate) fn spawn_service<S: ServerHandler>(server: S, transport: ChannelTransport) {
    tokio::spawn(async move {
        match server.serve(transport).await {
            Ok(running) => {
                if let Err(e) = running.waiting().await {
                    warn!(error = %e, "MCP server task failed");
                }
            }
            Err(e) => debug!(error = %e, "MCP server stopped before completing the handshake"),
        }
    });
}

/// Binding that receives every message its server emits
pub(crate) trait OutboundSink: TransportBinding {
    fn deliver(&self, message: Value);
}

/// Forwards server messages to `binding` until the server drops its end,
/// then closes the binding.
pub(crate) fn spawn_outbound_pump<B: OutboundSink>(
    binding: Weak<B>,
    mut outbound: mpsc::UnboundedReceiver<ServerMessage>,
) {
    tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let Some(binding) = binding.upgrade() else {
                return;
            };
            match serde_json::to_value(&message) {
                Ok(value) => binding.deliver(value),
                Err(e) => warn!(error = %e, "Failed to encode server message"),
            }
        }
        if let Some(binding) = binding.upgrade() {
            binding.close();
        }
    });
}

//! Per-connection actor.
//!
//! The actor answers heartbeats, writes outbound events and parses inbound
//! frames. Parsed events go to a worker task that handles them one at a
//! time, which keeps a sender's messages in order without blocking the
//! actor on store or queue I/O.

use actix::{Actor, ActorContext, Addr, AsyncContext, Handler, Message as ActixMessage, StreamHandler};
use actix_web_actors::ws;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::events::{ClientEvent, ServerEvent};
use super::{ConnectionRegistry, SessionHandle};
use crate::error::AppError;
use crate::services::DeliveryRouter;
use error_types::error_codes;

/// Asks the actor to close the connection.
#[derive(ActixMessage)]
#[rtype(result = "()")]
struct Disconnect {
    reason: &'static str,
}

pub struct WsSession {
    handle: SessionHandle,
    outbound: Option<UnboundedReceiver<ServerEvent>>,
    inbound: Option<UnboundedSender<ClientEvent>>,
    registry: ConnectionRegistry,
    router: DeliveryRouter,
    hb: Instant,
    heartbeat_interval: Duration,
    client_timeout: Duration,
}

impl WsSession {
    /// `handle` must already be registered; `outbound` is its receiver.
    pub fn new(
        handle: SessionHandle,
        outbound: UnboundedReceiver<ServerEvent>,
        registry: ConnectionRegistry,
        router: DeliveryRouter,
        heartbeat_interval: Duration,
        client_timeout: Duration,
    ) -> Self {
        Self {
            handle,
            outbound: Some(outbound),
            inbound: None,
            registry,
            router,
            hb: Instant::now(),
            heartbeat_interval,
            client_timeout,
        }
    }

    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        let timeout = self.client_timeout;
        ctx.run_interval(self.heartbeat_interval, move |act, ctx| {
            if Instant::now().duration_since(act.hb) > timeout {
                tracing::warn!(
                    user_id = %act.handle.user_id(),
                    session_id = %act.handle.id(),
                    "WebSocket heartbeat failed, disconnecting"
                );
                ctx.stop();
                return;
            }
            ctx.ping(b"");
        });
    }

    fn spawn_worker(&mut self, addr: Addr<Self>) {
        let (tx, mut rx) = unbounded_channel::<ClientEvent>();
        let router = self.router.clone();
        let handle = self.handle.clone();

        actix::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Err(AppError::Unauthenticated) = router.handle(&handle, event).await {
                    addr.do_send(Disconnect {
                        reason: "session is no longer registered",
                    });
                    break;
                }
            }
        });

        self.inbound = Some(tx);
    }

    fn on_text(&mut self, text: &str) {
        let event = match serde_json::from_str::<ClientEvent>(text) {
            Ok(event) => event,
            Err(e) => {
                tracing::debug!(session_id = %self.handle.id(), error = %e, "unparseable frame");
                self.handle.push(ServerEvent::error(
                    error_codes::INVALID_REQUEST,
                    format!("invalid event: {e}"),
                ));
                return;
            }
        };

        let queued = self
            .inbound
            .as_ref()
            .map(|tx| tx.send(event).is_ok())
            .unwrap_or(false);
        if !queued {
            tracing::warn!(session_id = %self.handle.id(), "session worker gone, event dropped");
        }
    }
}

impl Actor for WsSession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);
        if let Some(outbound) = self.outbound.take() {
            ctx.add_stream(UnboundedReceiverStream::new(outbound));
        }
        self.spawn_worker(ctx.address());

        tracing::debug!(
            user_id = %self.handle.user_id(),
            session_id = %self.handle.id(),
            "WebSocket session started"
        );
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        // Queued events still finish; nothing new is accepted.
        self.inbound.take();

        let registry = self.registry.clone();
        let handle = self.handle.clone();
        actix::spawn(async move {
            registry.unregister(&handle).await;
        });
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for WsSession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Ping(bytes)) => {
                self.hb = Instant::now();
                ctx.pong(&bytes);
            }
            Ok(ws::Message::Pong(_)) => {
                self.hb = Instant::now();
            }
            Ok(ws::Message::Text(text)) => {
                self.hb = Instant::now();
                self.on_text(&text);
            }
            Ok(ws::Message::Binary(_)) => {
                self.handle.push(ServerEvent::error(
                    error_codes::INVALID_REQUEST,
                    "binary frames are not supported",
                ));
            }
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) | Ok(ws::Message::Nop) => {}
            Err(e) => {
                tracing::warn!(session_id = %self.handle.id(), error = %e, "WebSocket protocol error");
                ctx.stop();
            }
        }
    }
}

impl StreamHandler<ServerEvent> for WsSession {
    fn handle(&mut self, event: ServerEvent, ctx: &mut Self::Context) {
        match serde_json::to_string(&event) {
            Ok(text) => ctx.text(text),
            Err(e) => tracing::error!(session_id = %self.handle.id(), error = %e, "failed to encode event"),
        }
    }

    fn finished(&mut self, _ctx: &mut Self::Context) {
        // The outbound stream ending must not close the socket.
    }
}

impl Handler<Disconnect> for WsSession {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, ctx: &mut Self::Context) {
        ctx.close(Some(ws::CloseReason {
            code: ws::CloseCode::Policy,
            description: Some(msg.reason.to_string()),
        }));
        ctx.stop();
    }
}

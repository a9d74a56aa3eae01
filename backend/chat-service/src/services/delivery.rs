//! # Delivery Router
//!
//! Drives one send through
//! `Received -> Validated -> Persisted -> DeliveredLocal -> DeliveredRemote -> Enqueued -> Done`.
//! Failures before persistence end in `Errored` and are reported to the
//! originating session only. Queue hand-off runs on its own task and can
//! neither fail nor delay the send.
//!
//! The auxiliary real-time flows (join, typing, mark-as-read) live here too.

use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::models::MessageView;
use crate::queue::{QueueBridge, QueueEvent};
use crate::services::MessageService;
use crate::websocket::events::{
    ClientEvent, MessagesReadPayload, ServerEvent, UserTypingPayload,
};
use crate::websocket::{ConnectionRegistry, SessionHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    Received,
    Validated,
    Persisted,
    DeliveredLocal,
    DeliveredRemote,
    Enqueued,
    Done,
    Errored,
}

/// Outcome of a successful send.
#[derive(Debug)]
pub struct DeliveryReport {
    pub message: MessageView,
    pub state: DeliveryState,
    /// Whether the receiver had a live session to push to
    pub delivered_remote: bool,
    /// Queue hand-off. Awaiting it is optional.
    pub enqueue: JoinHandle<()>,
}

struct Transitions {
    sender_id: Uuid,
    receiver_id: Uuid,
    state: DeliveryState,
}

impl Transitions {
    fn new(sender_id: Uuid, receiver_id: Uuid) -> Self {
        tracing::debug!(%sender_id, %receiver_id, state = ?DeliveryState::Received, "delivery");
        Self {
            sender_id,
            receiver_id,
            state: DeliveryState::Received,
        }
    }

    fn advance(&mut self, next: DeliveryState) {
        tracing::debug!(
            sender_id = %self.sender_id,
            receiver_id = %self.receiver_id,
            from = ?self.state,
            to = ?next,
            "delivery"
        );
        self.state = next;
    }

    fn fail(&mut self, error: &AppError) {
        tracing::warn!(
            sender_id = %self.sender_id,
            receiver_id = %self.receiver_id,
            from = ?self.state,
            error = %error,
            "delivery errored"
        );
        metrics::DELIVERY_ERRORS_TOTAL
            .with_label_values(&[error_reason(error)])
            .inc();
        self.state = DeliveryState::Errored;
    }
}

fn error_reason(error: &AppError) -> &'static str {
    match error {
        AppError::Unauthenticated => "unauthenticated",
        AppError::InvalidArgument(_) => "invalid_argument",
        AppError::NotFound(_) => "not_found",
        _ => "store",
    }
}

fn report_error(origin: &SessionHandle, error: &AppError) {
    origin.push(ServerEvent::error(error.error_code(), error.client_message()));
}

#[derive(Clone)]
pub struct DeliveryRouter {
    messages: MessageService,
    registry: ConnectionRegistry,
    queue: Arc<QueueBridge>,
}

impl DeliveryRouter {
    pub fn new(messages: MessageService, registry: ConnectionRegistry, queue: Arc<QueueBridge>) -> Self {
        Self {
            messages,
            registry,
            queue,
        }
    }

    /// Dispatches one inbound real-time event. Errors have already been
    /// pushed to `origin` when this returns `Err`.
    pub async fn handle(&self, origin: &SessionHandle, event: ClientEvent) -> AppResult<()> {
        metrics::WS_EVENTS_TOTAL
            .with_label_values(&[event.name()])
            .inc();

        match event {
            ClientEvent::SendMessage(p) => self.send(origin, p.receiver_id, &p.content).await.map(|_| ()),
            ClientEvent::JoinChat(p) => self.join_chat(origin, p.other_user_id).await,
            ClientEvent::MarkAsRead(p) => self.mark_as_read(origin, p.other_user_id).await,
            ClientEvent::Typing(p) => self.typing(origin, p.receiver_id, p.is_typing).await,
        }
    }

    /// Send from a live session: persist, confirm to the sender, push to
    /// the receiver if online, hand off to the queue.
    pub async fn send(
        &self,
        origin: &SessionHandle,
        receiver_id: Uuid,
        content: &str,
    ) -> AppResult<DeliveryReport> {
        let mut transitions = Transitions::new(origin.user_id(), receiver_id);

        if let Err(e) = self.authenticate(origin).await {
            transitions.fail(&e);
            report_error(origin, &e);
            return Err(e);
        }

        self.deliver(Some(origin), origin.user_id(), receiver_id, content, transitions)
            .await
            .map_err(|e| {
                report_error(origin, &e);
                e
            })
    }

    /// Send from the request/response surface. The caller is already
    /// authenticated and has no session, so there is no local delivery.
    pub async fn send_from_api(
        &self,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
    ) -> AppResult<DeliveryReport> {
        let transitions = Transitions::new(sender_id, receiver_id);
        self.deliver(None, sender_id, receiver_id, content, transitions)
            .await
    }

    async fn deliver(
        &self,
        origin: Option<&SessionHandle>,
        sender_id: Uuid,
        receiver_id: Uuid,
        content: &str,
        mut transitions: Transitions,
    ) -> AppResult<DeliveryReport> {
        transitions.advance(DeliveryState::Validated);

        let view = match self.messages.send(sender_id, receiver_id, content).await {
            Ok(view) => view,
            Err(e) => {
                transitions.fail(&e);
                return Err(e);
            }
        };
        transitions.advance(DeliveryState::Persisted);
        metrics::MESSAGES_SENT_TOTAL.inc();

        if let Some(origin) = origin {
            origin.push(ServerEvent::MessageReceived(view.clone()));
            transitions.advance(DeliveryState::DeliveredLocal);
        }

        let delivered_remote = match self.registry.lookup(receiver_id).await {
            Some(receiver) => {
                let pushed = receiver.push(ServerEvent::NewMessage(view.clone()));
                transitions.advance(DeliveryState::DeliveredRemote);
                pushed
            }
            None => {
                tracing::debug!(%receiver_id, message_id = %view.message.id, "receiver offline");
                false
            }
        };

        let queue = self.queue.clone();
        let event = QueueEvent::new_message(view.clone());
        let enqueue = tokio::spawn(async move { queue.publish(&event).await });
        transitions.advance(DeliveryState::Enqueued);

        transitions.advance(DeliveryState::Done);
        Ok(DeliveryReport {
            message: view,
            state: transitions.state,
            delivered_remote,
            enqueue,
        })
    }

    /// Replies with the conversation history (marking it read).
    pub async fn join_chat(&self, origin: &SessionHandle, counterpart_id: Uuid) -> AppResult<()> {
        let result = match self.authenticate(origin).await {
            Ok(()) => self.messages.history(origin.user_id(), counterpart_id).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(history) => {
                origin.push(ServerEvent::ChatHistory(history));
                Ok(())
            }
            Err(e) => {
                report_error(origin, &e);
                Err(e)
            }
        }
    }

    /// Tells the counterpart, if online, that `origin` has read the
    /// conversation. Read state itself only changes through `history`.
    pub async fn mark_as_read(&self, origin: &SessionHandle, counterpart_id: Uuid) -> AppResult<()> {
        self.notify(
            origin,
            counterpart_id,
            ServerEvent::MessagesRead(MessagesReadPayload {
                read_by: origin.user_id(),
            }),
        )
        .await
    }

    pub async fn typing(&self, origin: &SessionHandle, receiver_id: Uuid, is_typing: bool) -> AppResult<()> {
        self.notify(
            origin,
            receiver_id,
            ServerEvent::UserTyping(UserTypingPayload {
                user_id: origin.user_id(),
                is_typing,
            }),
        )
        .await
    }

    async fn notify(&self, origin: &SessionHandle, target: Uuid, event: ServerEvent) -> AppResult<()> {
        if let Err(e) = self.authenticate(origin).await {
            report_error(origin, &e);
            return Err(e);
        }
        if let Some(handle) = self.registry.lookup(target).await {
            handle.push(event);
        }
        Ok(())
    }

    /// The origin must still be the registered session for its identity.
    /// A session superseded by a newer connection no longer qualifies.
    async fn authenticate(&self, origin: &SessionHandle) -> AppResult<()> {
        match self.registry.lookup(origin.user_id()).await {
            Some(current) if current == *origin => Ok(()),
            _ => Err(AppError::Unauthenticated),
        }
    }
}

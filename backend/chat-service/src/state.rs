use crypto_core::JwtValidator;
use std::sync::Arc;

use crate::config::Config;
use crate::queue::QueueBridge;
use crate::repository::{IdentityDirectory, MessageRepository};
use crate::services::{ConversationService, DeliveryRouter, MessageService};
use crate::websocket::ConnectionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: ConnectionRegistry,
    pub messages: MessageService,
    pub conversations: ConversationService,
    pub router: DeliveryRouter,
    pub queue: Arc<QueueBridge>,
    pub jwt: Arc<JwtValidator>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        message_repo: Arc<dyn MessageRepository>,
        identities: Arc<dyn IdentityDirectory>,
        queue: Arc<QueueBridge>,
        jwt: JwtValidator,
    ) -> Self {
        let registry = ConnectionRegistry::new();
        let messages = MessageService::new(message_repo.clone(), identities.clone());
        let conversations = ConversationService::new(message_repo, identities);
        let router = DeliveryRouter::new(messages.clone(), registry.clone(), queue.clone());

        Self {
            config,
            registry,
            messages,
            conversations,
            router,
            queue,
            jwt: Arc::new(jwt),
        }
    }
}

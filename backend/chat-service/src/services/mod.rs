pub mod conversation_service;
pub mod delivery;
pub mod message_service;

pub use conversation_service::ConversationService;
pub use delivery::{DeliveryReport, DeliveryRouter, DeliveryState};
pub use message_service::MessageService;

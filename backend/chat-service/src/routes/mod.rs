use actix_web::{get, web, HttpResponse};

pub mod conversations;
pub mod messages;
pub mod wsroute;

use crate::metrics::metrics_handler;

#[get("/health")]
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

/// Every route the service exposes.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .route("/metrics", web::get().to(metrics_handler))
        .service(wsroute::ws_handler)
        .service(
            web::scope("/api/chat")
                .service(messages::send_message)
                .service(messages::view_messages)
                .service(conversations::list_conversations),
        );
}

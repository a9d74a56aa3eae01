use actix_web::{get, post, web, HttpResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::models::MessageView;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub receiver_id: Uuid,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message: String,
    pub data: MessageView,
}

#[post("/sendMessage")]
pub async fn send_message(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    body: web::Json<SendMessageRequest>,
) -> Result<HttpResponse, AppError> {
    let body = body.into_inner();
    let report = state
        .router
        .send_from_api(user.id, body.receiver_id, &body.content)
        .await?;

    Ok(HttpResponse::Created().json(SendMessageResponse {
        message: "Message sent successfully".to_string(),
        data: report.message,
    }))
}

/// Conversation history with `user_id`. Marks the caller's unread messages read.
#[get("/viewMessages/{user_id}")]
pub async fn view_messages(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
    path: web::Path<Uuid>,
) -> Result<HttpResponse, AppError> {
    let counterpart_id = path.into_inner();
    let history = state.messages.history(user.id, counterpart_id).await?;
    Ok(HttpResponse::Ok().json(history))
}

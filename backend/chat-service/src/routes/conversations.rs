use actix_web::{get, web, HttpResponse};

use crate::error::AppError;
use crate::middleware::AuthenticatedUser;
use crate::state::AppState;

#[get("/conversations")]
pub async fn list_conversations(
    state: web::Data<AppState>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, AppError> {
    let conversations = state.conversations.list(user.id).await?;
    Ok(HttpResponse::Ok().json(conversations))
}

use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use crate::middleware::auth::authenticate;
use crate::state::AppState;
use crate::websocket::session::WsSession;
use crate::websocket::SessionHandle;

/// Real-time channel. The token comes from `?token=` or a bearer header;
/// the session is registered before the upgrade response is sent.
#[get("/ws")]
pub async fn ws_handler(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user = authenticate(&req, true)?;

    // Reject bad handshakes before touching presence.
    ws::handshake(&req)?;

    let (handle, outbound) = SessionHandle::new(user.id);
    state.registry.register(handle.clone()).await;

    let session = WsSession::new(
        handle.clone(),
        outbound,
        state.registry.clone(),
        state.router.clone(),
        state.config.ws.heartbeat_interval,
        state.config.ws.client_timeout,
    );

    match ws::start(session, &req, stream) {
        Ok(response) => Ok(response),
        Err(e) => {
            state.registry.unregister(&handle).await;
            Err(e)
        }
    }
}

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use super::auth::{internal_error, require_admin, ErrorResponse};
use crate::models::{normalize_channel, MonitoredChannel};
use crate::AppState;

#[derive(Deserialize)]
pub struct AddChannelRequest {
    username: String,
}

#[derive(Serialize)]
pub struct ChannelListResponse {
    channels: Vec<MonitoredChannel>,
    /// Names the listener currently accepts, after the last refresh
    active: Vec<String>,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/channels")
            .route(web::get().to(list_channels))
            .route(web::post().to(add_channel)),
    );
    cfg.service(web::resource("/api/channels/{name}").route(web::delete().to(remove_channel)));
}

async fn list_channels(state: web::Data<AppState>) -> impl Responder {
    match state.db.list_monitored_channels() {
        Ok(channels) => HttpResponse::Ok().json(ChannelListResponse {
            channels,
            active: state.sources.names(),
        }),
        Err(e) => internal_error("Failed to list channels", e),
    }
}

async fn add_channel(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<AddChannelRequest>,
) -> impl Responder {
    if let Err(resp) = require_admin(&state, &req) {
        return resp;
    }
    let username = normalize_channel(&body.username);
    if username.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("username is required"));
    }
    match state.db.add_monitored_channel(&username) {
        Ok(added) => {
            if added {
                log::info!("[api] Now monitoring {}", username);
                state.signals.channels_changed();
            }
            HttpResponse::Ok().json(serde_json::json!({ "username": username, "added": added }))
        }
        Err(e) => internal_error("Failed to add channel", e),
    }
}

async fn remove_channel(state: web::Data<AppState>, req: HttpRequest, path: web::Path<String>) -> impl Responder {
    if let Err(resp) = require_admin(&state, &req) {
        return resp;
    }
    let username = normalize_channel(&path.into_inner());
    match state.db.remove_monitored_channel(&username) {
        Ok(true) => {
            log::info!("[api] Stopped monitoring {}", username);
            state.signals.channels_changed();
            HttpResponse::Ok().json(serde_json::json!({ "removed": username }))
        }
        Ok(false) => HttpResponse::NotFound().json(ErrorResponse::new(format!("Channel {} not found", username))),
        Err(e) => internal_error("Failed to remove channel", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_add_list_remove_channel() {
        let state = app_state(None);
        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::post()
            .uri("/api/channels")
            .set_json(serde_json::json!({ "username": "https://t.me/Movies" }))
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["username"], "movies");
        assert_eq!(body["added"], true);

        let req = test::TestRequest::get().uri("/api/channels").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["channels"][0]["username"], "movies");

        let req = test::TestRequest::delete().uri("/api/channels/@Movies").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::delete().uri("/api/channels/movies").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }
}

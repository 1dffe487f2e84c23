use actix_web::{web, HttpRequest, HttpResponse, Responder};

use super::auth::{internal_error, require_admin, ErrorResponse};
use crate::models::{normalize_channel, ChannelRuleRequest, Provider};
use crate::AppState;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/api/rules")
            .route(web::get().to(list_rules))
            .route(web::post().to(upsert_rule)),
    );
    cfg.service(web::resource("/api/rules/{id}").route(web::delete().to(delete_rule)));
}

async fn list_rules(state: web::Data<AppState>) -> impl Responder {
    match state.db.list_channel_rules() {
        Ok(rules) => HttpResponse::Ok().json(rules),
        Err(e) => internal_error("Failed to list rules", e),
    }
}

async fn upsert_rule(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<ChannelRuleRequest>,
) -> impl Responder {
    if let Err(resp) = require_admin(&state, &req) {
        return resp;
    }
    let body = body.into_inner();
    if normalize_channel(&body.channel).is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse::new("channel is required"));
    }
    if let Some(unknown) = body
        .exclude_providers
        .iter()
        .find(|p| Provider::from_name(p).is_none())
    {
        return HttpResponse::BadRequest().json(ErrorResponse::new(format!("Unknown provider '{}'", unknown)));
    }

    match state.db.upsert_channel_rule(&body) {
        Ok(rule) => {
            log::info!("[api] Saved rule for channel {}", rule.channel);
            state.signals.rules_changed();
            HttpResponse::Ok().json(rule)
        }
        Err(e) => internal_error("Failed to save rule", e),
    }
}

async fn delete_rule(state: web::Data<AppState>, req: HttpRequest, path: web::Path<i64>) -> impl Responder {
    if let Err(resp) = require_admin(&state, &req) {
        return resp;
    }
    let id = path.into_inner();
    match state.db.delete_channel_rule(id) {
        Ok(true) => {
            state.signals.rules_changed();
            HttpResponse::Ok().json(serde_json::json!({ "deleted": id }))
        }
        Ok(false) => HttpResponse::NotFound().json(ErrorResponse::new(format!("Rule {} not found", id))),
        Err(e) => internal_error("Failed to delete rule", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::app_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_rule_mutations_need_admin_token() {
        let state = app_state(Some("tok"));
        let db = state.db.clone();
        let app = test::init_service(App::new().app_data(state).configure(config)).await;
        let rule = serde_json::json!({ "channel": "@C1", "exclude_providers": ["quark"] });

        let req = test::TestRequest::post().uri("/api/rules").set_json(&rule).to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 401);

        let req = test::TestRequest::post()
            .uri("/api/rules")
            .insert_header(("Authorization", "Bearer tok"))
            .set_json(&rule)
            .to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["channel"], "c1");
        assert_eq!(body["enabled"], true);

        let bad = serde_json::json!({ "channel": "c2", "exclude_providers": ["nope"] });
        let req = test::TestRequest::post()
            .uri("/api/rules")
            .insert_header(("Authorization", "Bearer tok"))
            .set_json(&bad)
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);

        let id = db.list_channel_rules().unwrap()[0].id;
        let req = test::TestRequest::delete()
            .uri(&format!("/api/rules/{}", id))
            .insert_header(("Authorization", "Bearer tok"))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert!(db.list_channel_rules().unwrap().is_empty());
    }
}

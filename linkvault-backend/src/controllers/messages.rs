use actix_web::{web, HttpResponse, Responder};
use serde::Serialize;

use super::auth::{internal_error, ErrorResponse};
use crate::db::{MessageQuery, MessageStats};
use crate::models::{IngestStats, StoredMessage};
use crate::AppState;

const TOP_TAGS: usize = 20;

#[derive(Serialize)]
pub struct MessageListResponse {
    messages: Vec<StoredMessage>,
    total: i64,
    page: u32,
    page_size: u32,
}

#[derive(Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    stored: MessageStats,
    ingest: IngestStats,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/api/messages").route(web::get().to(list_messages)));
    cfg.service(web::resource("/api/messages/{id}").route(web::get().to(get_message)));
    cfg.service(web::resource("/api/stats").route(web::get().to(get_stats)));
}

async fn list_messages(state: web::Data<AppState>, query: web::Query<MessageQuery>) -> impl Responder {
    let query = query.into_inner();
    match state.db.list_messages(&query) {
        Ok((messages, total)) => HttpResponse::Ok().json(MessageListResponse {
            messages,
            total,
            page: query.page(),
            page_size: query.page_size(),
        }),
        Err(e) => internal_error("Failed to list messages", e),
    }
}

async fn get_message(state: web::Data<AppState>, path: web::Path<i64>) -> impl Responder {
    let id = path.into_inner();
    match state.db.get_message(id) {
        Ok(Some(message)) => HttpResponse::Ok().json(message),
        Ok(None) => HttpResponse::NotFound().json(ErrorResponse::new(format!("Message {} not found", id))),
        Err(e) => internal_error("Failed to load message", e),
    }
}

async fn get_stats(state: web::Data<AppState>) -> impl Responder {
    match state.db.message_stats(TOP_TAGS) {
        Ok(stored) => HttpResponse::Ok().json(StatsResponse {
            stored,
            ingest: state.dispatcher.stats(),
        }),
        Err(e) => internal_error("Failed to compute stats", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LinkMap, ParsedMessage, Provider, UpsertPolicy};
    use crate::test_support::app_state;
    use actix_web::{test, App};

    #[actix_web::test]
    async fn test_list_get_and_stats() {
        let state = app_state(None);
        let mut links = LinkMap::new();
        links.insert(Provider::Quark, "https://pan.quark.cn/s/m1".to_string());
        let record = ParsedMessage {
            title: "电影M".to_string(),
            tags: vec!["科幻".to_string()],
            links,
            ..Default::default()
        };
        let id = state
            .db
            .upsert_message(&record, &crate::clock::now(), UpsertPolicy::RequireLinks)
            .unwrap()
            .id()
            .unwrap();

        let app = test::init_service(App::new().app_data(state).configure(config)).await;

        let req = test::TestRequest::get().uri("/api/messages?q=%E7%94%B5%E5%BD%B1&page_size=5").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["page_size"], 5);
        assert_eq!(body["messages"][0]["links"]["quark"], "https://pan.quark.cn/s/m1");

        let req = test::TestRequest::get().uri(&format!("/api/messages/{}", id)).to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["title"], "电影M");

        let req = test::TestRequest::get().uri("/api/messages/999").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);

        let req = test::TestRequest::get().uri("/api/stats").to_request();
        let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["total"], 1);
        assert_eq!(body["by_provider"]["quark"], 1);
    }
}

use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

use crate::AppState;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self { error: error.into() }
    }
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.trim_start_matches("Bearer ").trim())
        .filter(|s| !s.is_empty())
}

/// Mutating routes need `Authorization: Bearer <ADMIN_TOKEN>` when a token
/// is configured; without one they are open.
pub fn require_admin(state: &AppState, req: &HttpRequest) -> Result<(), HttpResponse> {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return Ok(());
    };
    match bearer_token(req) {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(HttpResponse::Unauthorized().json(ErrorResponse::new("Invalid admin token"))),
        None => Err(HttpResponse::Unauthorized().json(ErrorResponse::new("No authorization token provided"))),
    }
}

/// Log a storage failure and turn it into a 500
pub fn internal_error(context: &str, err: impl std::fmt::Display) -> HttpResponse {
    log::error!("[api] {}: {}", context, err);
    HttpResponse::InternalServerError().json(ErrorResponse::new("Internal server error"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_bearer_token_parsing() {
        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer s3cret"))
            .to_http_request();
        assert_eq!(bearer_token(&req), Some("s3cret"));

        let req = TestRequest::default()
            .insert_header(("Authorization", "Bearer "))
            .to_http_request();
        assert_eq!(bearer_token(&req), None);

        assert_eq!(bearer_token(&TestRequest::default().to_http_request()), None);
    }
}

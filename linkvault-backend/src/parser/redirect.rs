use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::models::Provider;
use crate::providers::ProviderCatalog;
use crate::retry::{is_reqwest_error_retryable, is_retryable_status, BackoffTracker};

const USER_AGENT: &str = "Mozilla/5.0";
const MAX_HOPS: usize = 10;

/// Landing pages are only scanned up to this many bytes
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Resolves an opaque button URL to a provider share link
#[async_trait]
pub trait RedirectResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Option<(Provider, String)>;
}

/// Follows the URL over HTTP, stopping as soon as a hop matches a strict
/// grammar. Failing that, the landing page body is scanned.
pub struct HttpRedirectResolver {
    client: reqwest::Client,
    catalog: Arc<ProviderCatalog>,
    backoff: BackoffTracker,
}

async fn read_capped(mut response: reqwest::Response, limit: usize) -> reqwest::Result<String> {
    let mut body = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        let room = limit - body.len();
        body.extend_from_slice(&chunk[..chunk.len().min(room)]);
        if body.len() >= limit {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&body).into_owned())
}

impl HttpRedirectResolver {
    pub fn new(catalog: Arc<ProviderCatalog>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let stop_at = catalog.clone();
        let policy = reqwest::redirect::Policy::custom(move |attempt| {
            if stop_at.match_strict(attempt.url().as_str()).is_some() {
                attempt.stop()
            } else if attempt.previous().len() >= MAX_HOPS {
                attempt.error("too many redirects")
            } else {
                attempt.follow()
            }
        });
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .redirect(policy)
            .build()?;
        Ok(Self {
            client,
            catalog,
            backoff: BackoffTracker::new(
                Duration::from_secs(30),
                Duration::from_secs(600),
                Duration::from_secs(900),
            ),
        })
    }

    fn host_key(url: &str) -> Option<String> {
        let parsed = url::Url::parse(url).ok()?;
        match parsed.scheme() {
            "http" | "https" => parsed.host_str().map(str::to_string),
            _ => None,
        }
    }
}

#[async_trait]
impl RedirectResolver for HttpRedirectResolver {
    async fn resolve(&self, url: &str) -> Option<(Provider, String)> {
        let host = Self::host_key(url)?;
        if let Some(wait) = self.backoff.remaining_cooldown(&host) {
            log::debug!("[redirect] Skipping {} ({} cooling down {:?})", url, host, wait);
            return None;
        }

        let response = match self.client.get(url).send().await {
            Ok(resp) => resp,
            Err(e) => {
                if is_reqwest_error_retryable(&e) {
                    self.backoff.record_error(&host);
                }
                log::warn!("[redirect] Request to {} failed: {}", url, e);
                return None;
            }
        };

        let status = response.status();
        if is_retryable_status(status.as_u16()) {
            self.backoff.record_error(&host);
            log::warn!("[redirect] {} answered {}", url, status);
            return None;
        }
        self.backoff.record_success(&host);

        if let Some(hit) = self.catalog.match_strict(response.url().as_str()) {
            return Some(hit);
        }
        // Stopped in front of a provider link
        if status.is_redirection() {
            return response
                .headers()
                .get(reqwest::header::LOCATION)
                .and_then(|loc| loc.to_str().ok())
                .and_then(|loc| self.catalog.match_strict(loc));
        }

        match read_capped(response, MAX_BODY_BYTES).await {
            Ok(body) => self
                .catalog
                .find_strict(&body)
                .into_iter()
                .next()
                .map(|m| (m.provider, m.url)),
            Err(e) => {
                log::warn!("[redirect] Could not read body of {}: {}", url, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_key_only_for_http() {
        assert_eq!(
            HttpRedirectResolver::host_key("https://t.cn/abc").as_deref(),
            Some("t.cn")
        );
        assert_eq!(HttpRedirectResolver::host_key("tg://resolve?domain=x"), None);
        assert_eq!(HttpRedirectResolver::host_key("not a url"), None);
    }

    #[tokio::test]
    async fn test_non_http_button_is_not_fetched() {
        let resolver =
            HttpRedirectResolver::new(Arc::new(ProviderCatalog::defaults()), Duration::from_secs(1)).unwrap();
        assert!(resolver.resolve("tg://join?invite=abc").await.is_none());
    }

    mod served {
        use super::*;
        use actix_web::{dev::ServerHandle, web, App, HttpResponse, HttpServer};

        async fn start() -> (String, ServerHandle) {
            let server = HttpServer::new(|| {
                App::new()
                    .route(
                        "/short",
                        web::get().to(|| async {
                            HttpResponse::Found().insert_header(("Location", "/hop")).finish()
                        }),
                    )
                    .route(
                        "/hop",
                        web::get().to(|| async {
                            HttpResponse::Found()
                                .insert_header(("Location", "https://pan.quark.cn/s/Redir1"))
                                .finish()
                        }),
                    )
                    .route(
                        "/page",
                        web::get().to(|| async {
                            HttpResponse::Ok().content_type("text/html").body(
                                r#"<html><a href="https://pan.baidu.com/s/1Body2?pwd=ab12">下载</a></html>"#,
                            )
                        }),
                    )
                    .route(
                        "/huge",
                        web::get().to(|| async {
                            let mut page = "x".repeat(MAX_BODY_BYTES + 1024);
                            page.push_str(" https://pan.quark.cn/s/TooFar");
                            HttpResponse::Ok().body(page)
                        }),
                    )
                    .route("/busy", web::get().to(|| async { HttpResponse::ServiceUnavailable().finish() }))
            })
            .workers(1)
            .bind(("127.0.0.1", 0))
            .unwrap();
            let addr = server.addrs()[0];
            let server = server.run();
            let handle = server.handle();
            actix_web::rt::spawn(server);
            (format!("http://{}", addr), handle)
        }

        fn resolver() -> HttpRedirectResolver {
            HttpRedirectResolver::new(Arc::new(ProviderCatalog::defaults()), Duration::from_secs(5)).unwrap()
        }

        #[actix_web::test]
        async fn test_redirect_chain_stops_at_provider_link() {
            let (base, handle) = start().await;
            let hit = resolver().resolve(&format!("{}/short", base)).await;
            assert_eq!(hit, Some((Provider::Quark, "https://pan.quark.cn/s/Redir1".to_string())));
            handle.stop(false).await;
        }

        #[actix_web::test]
        async fn test_landing_page_body_is_scanned() {
            let (base, handle) = start().await;
            let r = resolver();
            let hit = r.resolve(&format!("{}/page", base)).await;
            assert_eq!(
                hit,
                Some((Provider::Baidu, "https://pan.baidu.com/s/1Body2?pwd=ab12".to_string()))
            );
            assert!(r.resolve(&format!("{}/huge", base)).await.is_none());
            handle.stop(false).await;
        }

        #[actix_web::test]
        async fn test_unavailable_host_cools_down() {
            let (base, handle) = start().await;
            let r = resolver();
            assert!(r.resolve(&format!("{}/busy", base)).await.is_none());
            assert!(r.backoff.remaining_cooldown("127.0.0.1").is_some());
            // Cooling down: not even fetched
            assert!(r.resolve(&format!("{}/page", base)).await.is_none());
            handle.stop(false).await;
        }
    }
}

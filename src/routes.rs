use std::sync::Arc;
use std::time::Duration;

use askama::Template;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{services::ServeDir, trace::TraceLayer};
use tracing::error;

use crate::auth;
use crate::clock::Clock;
use crate::config::{Config, Secrets};
use crate::feeds::FeedTransport;
use crate::fixtures::{FixturesClient, UK_TIME};
use crate::rate_limit::{client_id, Limits, UsageLimiter};
use crate::service::NewsService;
use crate::summary::{self, SummaryClient, SummaryData};
use crate::view::{self, FixtureCard, Panel, ResultBadge, TabLink, View};

pub struct AppState {
    pub news: Arc<NewsService>,
    pub summary: SummaryClient,
    pub limiter: UsageLimiter,
    pub clock: Arc<dyn Clock>,
    pub secrets: Secrets,
    pub max_headlines: usize,
}

impl AppState {
    pub fn from_config(
        config: &Config,
        secrets: Secrets,
        transport: Arc<dyn FeedTransport>,
        clock: Arc<dyn Clock>,
    ) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(config.fetch_timeout);

        let fixtures = FixturesClient::new(
            config.fixtures.clone(),
            secrets.football_data_api_key.clone(),
            timeout,
        )?;
        let news = Arc::new(NewsService::new(
            config.feeds.clone(),
            transport,
            fixtures,
            clock.clone(),
        ));

        // The model can take a while; give it longer than a feed fetch
        let summary = SummaryClient::new(
            config.summary.clone(),
            secrets.anthropic_api_key.clone(),
            clock.clone(),
            timeout * 3,
        )?;
        let limiter = UsageLimiter::new(
            Limits {
                per_client: config.summary.per_client_limit,
                window: chrono::Duration::minutes(config.summary.window_minutes),
                daily: config.summary.daily_limit,
            },
            clock.clone(),
        );

        Ok(Self {
            news,
            summary,
            limiter,
            clock,
            secrets,
            max_headlines: config.summary.max_headlines,
        })
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/refresh", post(refresh))
        .route("/refresh/status", get(refresh_status))
        .route("/summary", post(summary_fragment))
        .route("/api/summary", post(api_summary))
        .route("/login", get(auth::login_page).post(auth::login_form))
        .route("/api/login", post(auth::api_login))
        .route("/health", get(health))
        .nest_service("/static", ServeDir::new("static"))
        .layer(middleware::from_fn(auth::require_auth))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// Template structs
#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub item_count: usize,
    pub updated: String,
    pub tabs: Vec<TabLink>,
    pub panel: Panel,
    pub empty_message: &'static str,
    pub fixtures: Vec<FixtureCard>,
    pub results: Vec<ResultBadge>,
    pub summary_enabled: bool,
    pub refreshing: bool,
}

#[derive(Template)]
#[template(path = "refresh_button.html")]
pub struct RefreshButtonTemplate {
    pub refreshing: bool,
}

pub struct ClusterView {
    pub topic: String,
    pub headlines: Vec<String>,
}

#[derive(Template)]
#[template(path = "summary.html")]
pub struct SummaryTemplate {
    pub summary: Option<String>,
    pub clusters: Vec<ClusterView>,
    pub error: Option<String>,
}

impl SummaryTemplate {
    fn failed(message: String) -> Self {
        Self {
            summary: None,
            clusters: Vec::new(),
            error: Some(message),
        }
    }

    /// Resolve the model's 1-based indices back to headline text.
    fn from_data(data: SummaryData, headlines: &[String]) -> Self {
        let clusters = data
            .clusters
            .into_iter()
            .map(|cluster| ClusterView {
                headlines: cluster
                    .indices
                    .iter()
                    .filter_map(|i| headlines.get((*i as usize).checked_sub(1)?).cloned())
                    .collect(),
                topic: cluster.topic,
            })
            .collect();

        Self {
            summary: data.summary,
            clusters,
            error: None,
        }
    }
}

// Wrapper for HTML responses
pub struct HtmlTemplate<T>(pub T);

impl<T: Template> IntoResponse for HtmlTemplate<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(html) => Html(html).into_response(),
            Err(err) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to render template: {}", err),
            )
                .into_response(),
        }
    }
}

/// JSON error body for the API routes.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    pub view: Option<String>,
}

/// Body of `POST /api/summary`. `headlines` is left loosely typed so a
/// wrong shape is reported as "no headlines" rather than a bad body.
#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    #[serde(default)]
    pub headlines: Value,
}

impl SummaryRequest {
    fn headlines(&self) -> Option<Vec<String>> {
        let list = self.headlines.as_array().filter(|h| !h.is_empty())?;
        Some(
            list.iter()
                .map(|h| h.as_str().map(str::to_string).unwrap_or_else(|| h.to_string()))
                .collect(),
        )
    }
}

// Route handlers
pub async fn index(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PageQuery>,
) -> impl IntoResponse {
    let active = View::from_query(query.view.as_deref());
    let snapshot = state.news.snapshot().await;
    let now = state.clock.now();

    HtmlTemplate(IndexTemplate {
        item_count: snapshot.items.len(),
        updated: snapshot
            .updated_at
            .with_timezone(&UK_TIME)
            .format("%H:%M")
            .to_string(),
        tabs: view::tabs(active, &snapshot.items, &snapshot.standings),
        panel: Panel::build(
            active,
            &snapshot.items,
            &snapshot.standings,
            &snapshot.results,
            now,
        ),
        empty_message: active.empty_message(),
        fixtures: snapshot
            .fixtures
            .iter()
            .map(|f| FixtureCard::new(f, &snapshot.standings))
            .collect(),
        results: view::result_badges(&snapshot.results),
        summary_enabled: state.summary.is_configured(),
        refreshing: state.news.is_refreshing().await,
    })
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    // Spawn the refresh task
    let news = state.news.clone();
    tokio::spawn(async move {
        news.refresh().await;
    });

    // Return refreshing state immediately
    HtmlTemplate(RefreshButtonTemplate { refreshing: true })
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.news.is_refreshing().await;
    HtmlTemplate(RefreshButtonTemplate { refreshing })
}

/// Quota and configuration checks shared by both summary routes, in the
/// order callers see them.
fn admit_summary(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    state
        .limiter
        .check(&client_id(headers))
        .map_err(|e| ApiError::new(StatusCode::TOO_MANY_REQUESTS, e.to_string()))?;

    if !state.summary.is_configured() {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "API key not configured",
        ));
    }
    Ok(())
}

async fn generate_summary(state: &AppState, headlines: &[String]) -> Result<SummaryData, ApiError> {
    state.summary.generate(headlines).await.map_err(|e| {
        error!("Summary generation failed: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate summary")
    })
}

pub async fn api_summary(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    admit_summary(&state, &headers)?;

    let request: SummaryRequest = serde_json::from_slice(&body).map_err(|e| {
        error!("Summary generation failed: unreadable body: {}", e);
        ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "Failed to generate summary")
    })?;
    let headlines = request
        .headlines()
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "No headlines provided"))?;

    let data = generate_summary(&state, &headlines).await?;
    Ok(Json(json!({
        "summary": data.summary,
        "clusters": data.clusters,
    })))
}

/// Summary panel for the page, built from the current snapshot's headlines.
pub async fn summary_fragment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    // htmx only swaps 2xx responses, so failures render as panel content
    if let Err(e) = admit_summary(&state, &headers) {
        return HtmlTemplate(SummaryTemplate::failed(e.message)).into_response();
    }

    let snapshot = state.news.snapshot().await;
    let headlines = summary::headlines(&snapshot.items, state.max_headlines);
    if headlines.is_empty() {
        return HtmlTemplate(SummaryTemplate::failed(
            "No headlines to summarise right now.".to_string(),
        ))
        .into_response();
    }

    match generate_summary(&state, &headlines).await {
        Ok(data) => HtmlTemplate(SummaryTemplate::from_data(data, &headlines)).into_response(),
        Err(e) => HtmlTemplate(SummaryTemplate::failed(e.message)).into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    Html("OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::FeedSource;
    use crate::feeds::{Category, FeedError, RawEntry};
    use crate::summary::StoryCluster;
    use async_trait::async_trait;
    use axum::{body::Body, http::Request};
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const COOKIE: &str = "pompey-auth=authenticated";

    struct StubTransport;

    #[async_trait]
    impl FeedTransport for StubTransport {
        async fn fetch(&self, url: &str) -> Result<Vec<RawEntry>, FeedError> {
            let published = Utc.with_ymd_and_hms(2024, 8, 10, 11, 0, 0).unwrap();
            match url {
                "https://news.example.com/rss" => Ok(vec![RawEntry {
                    title: Some("Pompey complete loan signing".to_string()),
                    link: Some("https://news.example.com/1".to_string()),
                    published: Some(published),
                    description: Some("Deal done before the deadline.".to_string()),
                    thumbnail: None,
                }]),
                "https://social.example.com/rss" => Ok(vec![RawEntry {
                    title: Some("What a night at Fratton".to_string()),
                    link: Some("https://social.example.com/1".to_string()),
                    published: Some(published),
                    ..Default::default()
                }]),
                _ => Err(FeedError::HttpStatus(503)),
            }
        }
    }

    fn test_config(summary_base: &str, daily_limit: u32) -> Config {
        let mut config = Config::from_str("feeds = []").unwrap();
        config.feeds = vec![
            FeedSource {
                name: "The News".to_string(),
                url: "https://news.example.com".to_string(),
                rss_url: "https://news.example.com/rss".to_string(),
                category: Category::News,
            },
            FeedSource {
                name: "Fans".to_string(),
                url: "https://social.example.com".to_string(),
                rss_url: "https://social.example.com/rss".to_string(),
                category: Category::Social,
            },
            FeedSource {
                name: "Broken".to_string(),
                url: "https://broken.example.com".to_string(),
                rss_url: "https://broken.example.com/rss".to_string(),
                category: Category::News,
            },
        ];
        config.summary.base_url = summary_base.to_string();
        config.summary.daily_limit = daily_limit;
        config
    }

    fn create_test_app_with(secrets: Secrets, summary_base: &str, daily_limit: u32) -> Router {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 8, 10, 12, 0, 0).unwrap(),
        ));
        let state = AppState::from_config(
            &test_config(summary_base, daily_limit),
            secrets,
            Arc::new(StubTransport),
            clock,
        )
        .unwrap();
        router(Arc::new(state))
    }

    fn create_test_app() -> Router {
        create_test_app_with(Secrets::default(), "http://127.0.0.1:9", 100)
    }

    async fn body_string(response: Response) -> String {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(body.to_vec()).unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header("cookie", COOKIE)
            .body(Body::empty())
            .unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("cookie", COOKIE)
            .header("content-type", "application/json")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    mod health_tests {
        use super::*;

        #[tokio::test]
        async fn test_health_endpoint_is_public() {
            let app = create_test_app();

            let response = app
                .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_string(response).await, "OK");
        }
    }

    mod gate_tests {
        use super::*;

        #[tokio::test]
        async fn test_index_redirects_without_cookie() {
            let app = create_test_app();

            let response = app
                .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
            assert_eq!(response.headers()["location"], "/login");
        }

        #[tokio::test]
        async fn test_login_page_is_public() {
            let app = create_test_app();

            let response = app
                .oneshot(Request::builder().uri("/login").body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_string(response).await.contains("password"));
        }

        #[tokio::test]
        async fn test_api_login_sets_cookie() {
            let secrets = Secrets {
                site_password: Some("playup".to_string()),
                ..Default::default()
            };
            let app = create_test_app_with(secrets, "http://127.0.0.1:9", 100);

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/login")
                        .header("content-type", "application/json")
                        .body(Body::from(r#"{"password":"playup"}"#))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let cookie = response.headers()["set-cookie"].to_str().unwrap().to_string();
            assert!(cookie.starts_with("pompey-auth=authenticated"));
            assert!(cookie.contains("HttpOnly"));
            assert!(!cookie.contains("Secure"));
        }

        #[tokio::test]
        async fn test_api_login_wrong_password() {
            let secrets = Secrets {
                site_password: Some("playup".to_string()),
                ..Default::default()
            };
            let app = create_test_app_with(secrets, "http://127.0.0.1:9", 100);

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/login")
                        .header("content-type", "application/json")
                        .body(Body::from(r#"{"password":"scummers"}"#))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert!(response.headers().get("set-cookie").is_none());
            assert!(body_string(response).await.contains("Incorrect password"));
        }

        #[tokio::test]
        async fn test_form_login_redirects_home() {
            let app = create_test_app();

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/login")
                        .header("content-type", "application/x-www-form-urlencoded")
                        .body(Body::from("password=whatever"))
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::SEE_OTHER);
            assert_eq!(response.headers()["location"], "/");
            assert!(response.headers().get("set-cookie").is_some());
        }
    }

    mod index_tests {
        use super::*;

        #[tokio::test]
        async fn test_index_shows_news_and_skips_failed_source() {
            let app = create_test_app();

            let response = app.oneshot(get("/")).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body = body_string(response).await;
            assert!(body.contains("Pompey complete loan signing"));
            assert!(body.contains("Deal done before the deadline."));
            assert!(body.contains("1h ago"));
            assert!(body.contains("2 items"));
            assert!(!body.contains("What a night at Fratton"));
        }

        #[tokio::test]
        async fn test_social_view() {
            let app = create_test_app();

            let response = app.oneshot(get("/?view=social")).await.unwrap();

            let body = body_string(response).await;
            assert!(body.contains("What a night at Fratton"));
            assert!(!body.contains("Pompey complete loan signing"));
        }

        #[tokio::test]
        async fn test_empty_official_view() {
            let app = create_test_app();

            let response = app.oneshot(get("/?view=official")).await.unwrap();

            let body = body_string(response).await;
            assert!(body.contains("No official content available right now."));
        }

        #[tokio::test]
        async fn test_table_view_without_api_key() {
            let app = create_test_app();

            let response = app.oneshot(get("/?view=table")).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_string(response)
                .await
                .contains("League table unavailable right now."));
        }

        #[tokio::test]
        async fn test_unknown_view_falls_back_to_news() {
            let app = create_test_app();

            let response = app.oneshot(get("/?view=gossip")).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_string(response)
                .await
                .contains("Pompey complete loan signing"));
        }
    }

    mod refresh_tests {
        use super::*;

        #[tokio::test]
        async fn test_refresh_endpoint() {
            let app = create_test_app();

            let response = app
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/refresh")
                        .header("cookie", COOKIE)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            assert!(body_string(response).await.contains("Refreshing"));
        }

        #[tokio::test]
        async fn test_refresh_status_endpoint() {
            let app = create_test_app();

            let response = app.oneshot(get("/refresh/status")).await.unwrap();

            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    mod summary_tests {
        use super::*;

        fn with_key() -> Secrets {
            Secrets {
                anthropic_api_key: Some("sk-test".to_string()),
                ..Default::default()
            }
        }

        #[tokio::test]
        async fn test_summary_without_key() {
            let app = create_test_app();

            let response = app
                .oneshot(post_json("/api/summary", r#"{"headlines":["a"]}"#))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body_string(response).await.contains("API key not configured"));
        }

        #[tokio::test]
        async fn test_summary_requires_headlines() {
            let app = create_test_app_with(with_key(), "http://127.0.0.1:9", 100);

            let response = app
                .oneshot(post_json("/api/summary", r#"{"headlines":[]}"#))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(body_string(response).await.contains("No headlines provided"));
        }

        #[tokio::test]
        async fn test_summary_headlines_not_a_list() {
            let app = create_test_app_with(with_key(), "http://127.0.0.1:9", 100);

            let response = app
                .oneshot(post_json("/api/summary", r#"{"headlines":"Pompey win"}"#))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
            assert!(body_string(response).await.contains("No headlines provided"));
        }

        #[tokio::test]
        async fn test_summary_malformed_body_is_server_error() {
            let app = create_test_app_with(with_key(), "http://127.0.0.1:9", 100);

            let response = app
                .oneshot(post_json("/api/summary", "{not json"))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body_string(response)
                .await
                .contains("Failed to generate summary"));
        }

        #[tokio::test]
        async fn test_summary_rate_limited_before_anything_else() {
            let app = create_test_app_with(Secrets::default(), "http://127.0.0.1:9", 0);

            let response = app
                .oneshot(post_json("/api/summary", "not json"))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
            assert!(body_string(response).await.contains("Daily limit reached"));
        }

        #[tokio::test]
        async fn test_summary_success() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/v1/messages"))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                    "content": [{
                        "type": "text",
                        "text": "{\"summary\": \"Pompey are flying.\", \"clusters\": [{\"topic\": \"Loan\", \"indices\": [1, 2]}]}"
                    }]
                })))
                .mount(&server)
                .await;

            let app = create_test_app_with(with_key(), &server.uri(), 100);

            let response = app
                .oneshot(post_json(
                    "/api/summary",
                    r#"{"headlines":["\"Loan deal\" (BBC)","\"Loan agreed\" (The72)"]}"#,
                ))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let body: serde_json::Value =
                serde_json::from_str(&body_string(response).await).unwrap();
            assert_eq!(body["summary"], "Pompey are flying.");
            assert_eq!(body["clusters"][0]["indices"], json!([1, 2]));
        }

        #[tokio::test]
        async fn test_summary_upstream_failure() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .respond_with(ResponseTemplate::new(500))
                .mount(&server)
                .await;

            let app = create_test_app_with(with_key(), &server.uri(), 100);

            let response = app
                .oneshot(post_json("/api/summary", r#"{"headlines":["a"]}"#))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(body_string(response)
                .await
                .contains("Failed to generate summary"));
        }

        #[test]
        fn test_cluster_indices_resolve_to_headlines() {
            let data = SummaryData {
                summary: Some("s".to_string()),
                clusters: vec![StoryCluster {
                    topic: "Loan".to_string(),
                    indices: vec![0, 1, 3, 9],
                }],
                generated_at: Utc.with_ymd_and_hms(2024, 8, 10, 12, 0, 0).unwrap(),
            };
            let headlines = vec!["a".to_string(), "b".to_string(), "c".to_string()];

            let template = SummaryTemplate::from_data(data, &headlines);
            assert_eq!(template.clusters[0].headlines, vec!["a", "c"]);
        }
    }

    mod query_tests {
        use super::*;

        #[test]
        fn test_page_query_view() {
            let query: PageQuery = serde_urlencoded::from_str("view=stats").unwrap();
            assert_eq!(View::from_query(query.view.as_deref()), View::Stats);

            let query: PageQuery = serde_urlencoded::from_str("").unwrap();
            assert!(query.view.is_none());
        }
    }
}

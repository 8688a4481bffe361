use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    CACHE_CONTROL, RETRY_AFTER,
};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router, middleware};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::access_token::{TokenError, TokenSigner};
use crate::config::ServerConfig;
use crate::entitlement::{
    Entitlement, EntitlementService, MemoryEntitlements, SupabaseEntitlements,
};
use crate::market_values::MarketValueTable;
use crate::pipeline::run_report;
use crate::rankings::PlayersReport;
use crate::rate_limit::{RateDecision, RateLimiter, retry_after_secs};
use crate::rumors::{FEED_SOURCES, FeedFetcher, HttpFeedFetcher, build_rumors_report, collect_rumors};
use crate::scorers_fetch::{FootballDataClient, ScorerSource};
use crate::subscribers::{SubscriberStore, is_valid_email};
use crate::webhooks::{WebhookAction, WebhookError, WebhookHeaders, parse_event};

pub const DATA_CACHE_CONTROL: &str = "s-maxage=1800, stale-while-revalidate";

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    RateLimited { retry_after_secs: u64 },
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
            }
            ApiError::RateLimited { retry_after_secs } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                Json(json!({
                    "error": "Too many requests. Please try again in a minute.",
                    "retryAfter": retry_after_secs,
                })),
            )
                .into_response(),
            ApiError::Internal(msg) => {
                (StatusCode::INTERNAL_SERVER_ERROR, Json(json!({ "error": msg }))).into_response()
            }
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        error!(error = %err, "request failed");
        ApiError::Internal("Internal server error".to_string())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        error!(error = %err, "blocking task failed");
        ApiError::Internal("Internal server error".to_string())
    }
}

#[derive(Debug, Clone)]
struct CachedReport {
    report: Arc<PlayersReport>,
    built_at: Instant,
}

/// Everything the handlers share.
pub struct AppState {
    config: ServerConfig,
    market_values: Arc<MarketValueTable>,
    scorers: Option<Arc<dyn ScorerSource>>,
    feeds: Arc<dyn FeedFetcher>,
    entitlements: Arc<dyn EntitlementService>,
    subscribers: Option<Arc<SubscriberStore>>,
    signer: TokenSigner,
    limiter: RateLimiter,
    report_cache: Mutex<Option<CachedReport>>,
}

impl AppState {
    /// Offline defaults: no scorer source, in-memory profiles, no subscriber
    /// store and a per-process token key.
    pub fn new(config: ServerConfig, market_values: MarketValueTable) -> Self {
        Self {
            config,
            market_values: Arc::new(market_values),
            scorers: None,
            feeds: Arc::new(HttpFeedFetcher),
            entitlements: Arc::new(MemoryEntitlements::new()),
            subscribers: None,
            signer: TokenSigner::ephemeral(),
            limiter: RateLimiter::default(),
            report_cache: Mutex::new(None),
        }
    }

    /// Wire the real collaborators named by `config`.
    pub fn from_config(config: ServerConfig) -> anyhow::Result<Self> {
        let table = MarketValueTable::load(config.market_values_path.as_deref())?;
        info!(
            version = table.version(),
            players = table.len(),
            "market values ready"
        );
        let mut state = Self::new(config.clone(), table);

        match &config.football_data_key {
            Some(key) => {
                let client = FootballDataClient::new(key.as_str()).with_limit(config.scorers_limit);
                state = state.with_scorer_source(Arc::new(client));
            }
            None => warn!("FOOTBALL_DATA_KEY not set; /api/players will answer 500"),
        }

        match config.supabase() {
            Some((url, key)) => {
                state = state.with_entitlements(Arc::new(SupabaseEntitlements::new(url, key)));
            }
            None => warn!("Supabase not configured; entitlements run in mock mode"),
        }

        match &config.access_token_secret {
            Some(secret) => state = state.with_signer(TokenSigner::new(secret.as_bytes())),
            None => warn!("ACCESS_TOKEN_SECRET not set; tokens will not survive a restart"),
        }

        if config.paypal_webhook_id.is_none() {
            warn!("PAYPAL_WEBHOOK_ID not set; PayPal deliveries are checked by header presence only");
        }

        match config.subscribers_db_path() {
            Some(path) => match SubscriberStore::open(&path) {
                Ok(store) => state = state.with_subscribers(Arc::new(store)),
                Err(err) => warn!(error = %err, "subscriber store unavailable"),
            },
            None => warn!("no cache dir for the subscriber store"),
        }

        Ok(state)
    }

    pub fn with_scorer_source(mut self, source: Arc<dyn ScorerSource>) -> Self {
        self.scorers = Some(source);
        self
    }

    pub fn with_feed_fetcher(mut self, feeds: Arc<dyn FeedFetcher>) -> Self {
        self.feeds = feeds;
        self
    }

    pub fn with_entitlements(mut self, entitlements: Arc<dyn EntitlementService>) -> Self {
        self.entitlements = entitlements;
        self
    }

    pub fn with_subscribers(mut self, store: Arc<SubscriberStore>) -> Self {
        self.subscribers = Some(store);
        self
    }

    pub fn with_signer(mut self, signer: TokenSigner) -> Self {
        self.signer = signer;
        self
    }

    pub fn with_rate_limiter(mut self, limiter: RateLimiter) -> Self {
        self.limiter = limiter;
        self
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    async fn cached_report(&self) -> Option<Arc<PlayersReport>> {
        let guard = self.report_cache.lock().await;
        guard
            .as_ref()
            .filter(|c| c.built_at.elapsed() < self.config.report_ttl)
            .map(|c| Arc::clone(&c.report))
    }
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/api/players", get(players))
        .route("/api/rumors", get(rumors))
        .route("/api/subscribe", post(subscribe).options(preflight))
        .route("/api/verify-access", post(verify_access).options(preflight))
        .route("/api/webhook-payment", post(webhook_payment))
        .route("/health", get(health))
        .layer(middleware::map_response(allow_any_origin))
        .with_state(state)
}

async fn allow_any_origin(mut resp: Response) -> Response {
    resp.headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    resp
}

async fn preflight() -> impl IntoResponse {
    (
        StatusCode::OK,
        [
            (ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
            (ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, Authorization"),
        ],
    )
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

/// First `X-Forwarded-For` entry, then `X-Real-IP`, then the socket peer.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    if let Some(first) = header("x-forwarded-for")
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }
    if let Some(real) = header("x-real-ip") {
        return real.to_string();
    }
    peer.map(|p| p.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn players(
    State(state): State<SharedState>,
    peer: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let ip = client_ip(&headers, peer.map(|ConnectInfo(addr)| addr));
    if let RateDecision::Limited { retry_after } = state.limiter.check(&ip) {
        warn!(client = %ip, "rate limited");
        return Err(ApiError::RateLimited {
            retry_after_secs: retry_after_secs(retry_after),
        });
    }

    let Some(source) = state.scorers.clone() else {
        return Err(ApiError::Internal("API key not configured".to_string()));
    };

    if let Some(report) = state.cached_report().await {
        return Ok(with_data_cache(Json(report.as_ref().clone())));
    }

    // Holding the lock across the build keeps concurrent misses to one fetch.
    let mut guard = state.report_cache.lock().await;
    if let Some(cached) = guard
        .as_ref()
        .filter(|c| c.built_at.elapsed() < state.config.report_ttl)
    {
        return Ok(with_data_cache(Json(cached.report.as_ref().clone())));
    }

    let table = Arc::clone(&state.market_values);
    let leagues = state.config.leagues.clone();
    let delay = state.config.league_delay;
    let meta = state.config.report_meta();
    let started = Instant::now();
    let run = tokio::task::spawn_blocking(move || {
        run_report(source.as_ref(), &leagues, delay, &table, &meta)
    })
    .await?;
    info!(
        players = run.report.total_players,
        failed_leagues = run.failed_leagues.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "players report built"
    );

    // An empty report from a total outage would otherwise stick for the whole TTL.
    if run.all_failed(&state.config.leagues) {
        warn!(leagues = ?run.failed_leagues, "every league failed, report not cached");
        return Ok(with_data_cache(Json(run.report)));
    }

    let report = Arc::new(run.report);
    *guard = Some(CachedReport {
        report: Arc::clone(&report),
        built_at: Instant::now(),
    });
    Ok(with_data_cache(Json(report.as_ref().clone())))
}

async fn rumors(State(state): State<SharedState>) -> Response {
    let feeds = Arc::clone(&state.feeds);
    let now = Utc::now();
    let rumors = tokio::task::spawn_blocking(move || {
        collect_rumors(feeds.as_ref(), &FEED_SOURCES, now)
    })
    .await;
    match rumors {
        Ok(rumors) => with_data_cache(Json(build_rumors_report(rumors, now))),
        Err(err) => {
            error!(error = %err, "rumour task failed");
            let mut body = serde_json::to_value(build_rumors_report(Vec::new(), now))
                .unwrap_or_else(|_| json!({ "rumors": [] }));
            body["error"] = json!("Failed to fetch live rumors");
            with_data_cache(Json(body))
        }
    }
}

fn with_data_cache(body: impl IntoResponse) -> Response {
    ([(CACHE_CONTROL, DATA_CACHE_CONTROL)], body).into_response()
}

fn parse_json_object(body: &Bytes) -> Value {
    serde_json::from_slice::<Value>(body)
        .ok()
        .filter(Value::is_object)
        .unwrap_or(Value::Null)
}

async fn subscribe(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let body = parse_json_object(&body);
    let Some(email) = body
        .get("email")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
    else {
        return Err(ApiError::BadRequest("Email is required".to_string()));
    };
    if !is_valid_email(email) {
        return Err(ApiError::BadRequest("Invalid email format".to_string()));
    }

    match state.subscribers.clone() {
        Some(store) => {
            let email = email.to_string();
            // The sign-up is acknowledged even when the write fails.
            let written =
                tokio::task::spawn_blocking(move || store.subscribe(&email, Some("web"))).await;
            match written {
                Ok(Ok(outcome)) => info!(?outcome, "newsletter subscription"),
                Ok(Err(err)) => error!(error = %format!("{err:#}"), "subscriber write failed"),
                Err(err) => error!(error = %err, "subscriber task failed"),
            }
        }
        None => info!("newsletter subscription received without a store"),
    }

    Ok(Json(json!({
        "success": true,
        "message": "Email collected successfully",
        "subscribed": true,
    })))
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyResponse {
    pub is_pro: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscription_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mock_mode: Option<bool>,
}

impl VerifyResponse {
    fn denied(message: &str) -> Self {
        Self {
            verified: true,
            message: message.to_string(),
            ..Self::default()
        }
    }
}

async fn verify_access(State(state): State<SharedState>, body: Bytes) -> Response {
    let body = parse_json_object(&body);
    let email = body
        .get("email")
        .filter(|v| !v.is_null() && v.as_str() != Some(""));
    let token = body
        .get("token")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let mock_mode = state.entitlements.is_mock().then_some(true);

    let mut resp = if let Some(email) = email {
        let Some(email) = email.as_str().filter(|e| e.contains('@')) else {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "Invalid email format", "isPro": false })),
            )
                .into_response();
        };
        match lookup(&state, email).await {
            Ok(ent) => verify_by_email(&state, email, ent),
            Err(err) => {
                error!(error = %err, "entitlement lookup failed");
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "Database error", "isPro": false })),
                )
                    .into_response();
            }
        }
    } else if let Some(token) = token {
        verify_by_token(&state, token).await
    } else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Email or token required",
                "isPro": false,
                "message": "Please provide an email address or verification token",
            })),
        )
            .into_response();
    };

    resp.mock_mode = mock_mode;
    Json(resp).into_response()
}

async fn lookup(state: &SharedState, email: &str) -> anyhow::Result<Entitlement> {
    let service = Arc::clone(&state.entitlements);
    let email = email.to_string();
    tokio::task::spawn_blocking(move || service.check_entitlement(&email)).await?
}

fn verify_by_email(state: &AppState, email: &str, ent: Entitlement) -> VerifyResponse {
    if !ent.found {
        return VerifyResponse::denied("No subscription found for this email");
    }
    let token = if ent.active {
        match state.signer.issue(&email.trim().to_lowercase(), Utc::now()) {
            Ok(token) => Some(token),
            Err(err) => {
                error!(error = %err, "token issue failed");
                None
            }
        }
    } else {
        None
    };
    VerifyResponse {
        is_pro: ent.active,
        verified: true,
        token,
        subscription_status: ent.status,
        expires_at: ent
            .expires_at
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true)),
        message: if ent.active {
            "Pro access verified"
        } else {
            "Subscription not active"
        }
        .to_string(),
        ..VerifyResponse::default()
    }
}

async fn verify_by_token(state: &SharedState, token: &str) -> VerifyResponse {
    let claims = match state.signer.verify(token, Utc::now()) {
        Ok(claims) => claims,
        Err(TokenError::Expired) => {
            return VerifyResponse {
                error: Some("Token expired".to_string()),
                ..VerifyResponse::denied("Please re-verify your subscription")
            };
        }
        Err(err) => {
            warn!(error = %err, "token rejected");
            return VerifyResponse {
                error: Some("Invalid token".to_string()),
                ..VerifyResponse::denied("Token verification failed")
            };
        }
    };

    match lookup(state, &claims.email).await {
        Ok(ent) if ent.found => VerifyResponse {
            is_pro: ent.active,
            verified: true,
            email: Some(claims.email),
            message: if ent.active {
                "Token verified"
            } else {
                "Subscription expired"
            }
            .to_string(),
            ..VerifyResponse::default()
        },
        Ok(_) => VerifyResponse::denied("Subscription no longer valid"),
        Err(err) => {
            error!(error = %err, "entitlement lookup failed");
            VerifyResponse::denied("Subscription no longer valid")
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

fn webhook_headers(headers: &HeaderMap) -> WebhookHeaders {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    WebhookHeaders {
        paypal_transmission_id: get("paypal-transmission-id"),
        paypal_transmission_time: get("paypal-transmission-time"),
        paypal_transmission_sig: get("paypal-transmission-sig"),
        stripe_signature: get("stripe-signature"),
    }
}

async fn webhook_payment(
    State(state): State<SharedState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    let event = match parse_event(
        &webhook_headers(&headers),
        &body,
        state.config.stripe_webhook_secret.as_deref(),
        Utc::now(),
    ) {
        Ok(event) => event,
        Err(WebhookError::Unauthorized(reason)) => {
            warn!(%reason, "webhook rejected");
            return Err(ApiError::Unauthorized("Invalid signature".to_string()));
        }
        Err(WebhookError::Invalid(reason)) => {
            warn!(%reason, "webhook payload unusable");
            return Ok(Json(WebhookAck {
                received: true,
                error: Some(reason),
                ..WebhookAck::default()
            }));
        }
    };

    info!(
        provider = event.provider.as_str(),
        event = %event.event_type,
        "webhook received"
    );
    let mut ack = WebhookAck {
        received: true,
        ..WebhookAck::default()
    };
    if state.entitlements.is_mock() {
        ack.warning = Some("Database not configured".to_string());
    }

    match event.action {
        WebhookAction::Update(update) => {
            let service = Arc::clone(&state.entitlements);
            let applied =
                tokio::task::spawn_blocking(move || service.apply_update(&update)).await;
            match applied {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    error!(error = %err, "webhook processing failed");
                    ack.error = Some(err.to_string());
                }
                Err(err) => {
                    error!(error = %err, "webhook task failed");
                    ack.error = Some("processing task failed".to_string());
                }
            }
        }
        WebhookAction::Ignored(reason) => info!(%reason, "webhook ignored"),
    }
    Ok(Json(ack))
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::{HeaderMap, HeaderValue};

    use super::client_ip;

    #[test]
    fn client_ip_prefers_forwarded_header() {
        let peer: SocketAddr = "10.0.0.9:5555".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, Some(peer)), "10.0.0.9");
        assert_eq!(client_ip(&headers, None), "unknown");

        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.4"));
        assert_eq!(client_ip(&headers, Some(peer)), "198.51.100.4");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 70.41.3.18"),
        );
        assert_eq!(client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}

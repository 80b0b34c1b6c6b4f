//! HTTP forwarding logic
//!
//! Runs the attempt loop from `forward.rs` against the upstream: selects a
//! credential, attaches it, sends the buffered request, classifies the
//! status and rotates on quota/auth signals. The final upstream response is
//! streamed back to the caller with a permissive CORS header added.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use common::Secret;
use key_pool::CredentialPool;
use provider::{HeaderKeyProvider, Provider, QueryKeyProvider};
use reqwest::Url;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{AuthStyle, Config};
use crate::forward::{self, ForwardAction, ForwardEvent, ForwardState, Outcome};
use crate::stats::{self, AttemptRecord, Stats};

/// Headers to strip in both directions (hop-by-hop per RFC 7230 Section 6.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

/// Inbound headers that belong to the caller's connection to this proxy.
/// `content-length` is recomputed from the buffered body.
const INBOUND_ONLY_HEADERS: &[&str] = &["host", "cookie", "authorization", "content-length"];

/// Body returned when no credential could be tried.
pub const EXHAUSTED_MESSAGE: &str = "All API keys are currently exhausted. Please try again later.";

/// Shared state passed to the proxy handler via axum State extractor
#[derive(Clone)]
pub struct ProxyState {
    pub client: reqwest::Client,
    pub upstream_url: Url,
    pub provider: Arc<dyn Provider>,
    pub pool: Arc<CredentialPool>,
    pub stats: Arc<Stats>,
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub strip_prefix: Option<String>,
    /// Shared-secret header, never forwarded upstream
    pub access_header: HeaderName,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

impl ProxyState {
    /// Build the forwarding state (client, provider, pool) from validated
    /// configuration.
    pub fn from_config(config: &Config) -> crate::error::Result<Self> {
        let upstream_url = Url::parse(&config.upstream.url).map_err(|e| {
            common::Error::Config(format!("upstream url is not a valid URL: {e}"))
        })?;

        let provider: Arc<dyn Provider> = match config.upstream.auth_style {
            AuthStyle::Query => Arc::new(QueryKeyProvider::new(config.upstream.key_param.clone())),
            AuthStyle::Header => Arc::new(HeaderKeyProvider::new(parse_header_name(
                &config.upstream.auth_header,
            )?)),
        };
        info!(provider = provider.id(), "credential transport selected");

        let pool = CredentialPool::new(
            config.credentials.clone(),
            Duration::from_secs(config.pool.cooldown_secs),
        )?;

        Ok(Self {
            client: build_client().map_err(crate::error::Error::HttpClient)?,
            upstream_url,
            provider,
            stats: Arc::new(Stats::new(pool.count_total())),
            pool: Arc::new(pool),
            timeout: Duration::from_secs(config.upstream.timeout_secs),
            max_body_bytes: config.server.max_body_bytes,
            strip_prefix: config.server.strip_prefix.clone(),
            access_header: parse_header_name(&config.access.header)?,
            requests_total: Arc::new(AtomicU64::new(0)),
            errors_total: Arc::new(AtomicU64::new(0)),
        })
    }
}

pub fn parse_header_name(name: &str) -> crate::error::Result<HeaderName> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| crate::error::Error::InvalidHeader(name.to_string()))
}

/// HTTP client for upstream calls. Redirects are returned to the caller,
/// never followed.
pub fn build_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// JSON error response: {"error":{"type":"proxy_error","message":"...","request_id":"req_..."}}
fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "proxy_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (
        status,
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        body.to_string(),
    )
        .into_response()
}

/// Synthetic 429 for "no credential was available to try".
fn pool_exhausted() -> Response {
    (
        StatusCode::TOO_MANY_REQUESTS,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
        ],
        EXHAUSTED_MESSAGE,
    )
        .into_response()
}

/// Forward an inbound request, rotating credentials on quota/auth signals.
///
/// Makes at most one upstream call per credential in the pool.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn forward(state: &ProxyState, request: Request<Body>, request_id: String) -> Response {
    let started = Instant::now();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let (parts, body) = request.into_parts();
    let response = execute(state, &parts.method, &parts.uri, &parts.headers, body, &request_id).await;

    let status = response.status().as_u16();
    crate::metrics::record_request(status, parts.method.as_str(), started.elapsed().as_secs_f64());
    crate::metrics::set_credentials_available(
        state
            .pool
            .count_available(tokio::time::Instant::now())
            .await,
    );
    debug!(status, elapsed_ms = started.elapsed().as_millis() as u64, "request complete");
    response
}

async fn execute(
    state: &ProxyState,
    method: &Method,
    uri: &Uri,
    inbound: &HeaderMap,
    body: Body,
    request_id: &str,
) -> Response {
    let Some(target) = upstream_target(&state.upstream_url, uri, state.strip_prefix.as_deref())
    else {
        state.errors_total.fetch_add(1, Ordering::Relaxed);
        warn!("request target cannot be joined to the upstream url");
        return error_response(
            StatusCode::BAD_REQUEST,
            "request target cannot be forwarded",
            request_id,
        );
    };
    let headers = forwarded_headers(inbound, &state.access_header);

    // Buffered once, resent unchanged on every attempt
    let body = if carries_body(method) {
        match axum::body::to_bytes(body, state.max_body_bytes).await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                state.errors_total.fetch_add(1, Ordering::Relaxed);
                error!(error = %e, "failed to read request body");
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid request body: {e}"),
                    request_id,
                );
            }
        }
    } else {
        None
    };

    let max_attempts = state.pool.count_total();
    let (mut fsm, mut action) = forward::initial();
    let mut credential: Option<&Secret<String>> = None;
    let mut last: Option<reqwest::Response> = None;

    loop {
        let event = match action {
            ForwardAction::Select => select_credential(&state.pool, &mut credential).await,

            ForwardAction::Rotate { index } => {
                if let Some(rejected) = last.take() {
                    // Drain so the connection can be reused
                    let _ = rejected.bytes().await;
                }
                state.pool.mark_exhausted(index, None).await;
                select_credential(&state.pool, &mut credential).await
            }

            ForwardAction::Call { index } => {
                let attempt = match fsm {
                    ForwardState::Calling { attempt, .. } => attempt,
                    _ => 0,
                };
                match credential {
                    Some(secret) => {
                        let event = call_upstream(
                            state,
                            method,
                            uri,
                            &target,
                            &headers,
                            body.as_ref(),
                            secret,
                            (attempt, index),
                            request_id,
                        )
                        .await;
                        match event {
                            Some(response) => {
                                let classification =
                                    state.provider.classify_status(response.status().as_u16());
                                last = Some(response);
                                ForwardEvent::Responded { classification }
                            }
                            None => ForwardEvent::TransportFailed,
                        }
                    }
                    None => {
                        error!(attempt, index, "call requested without a selected credential");
                        ForwardEvent::Fault
                    }
                }
            }

            ForwardAction::Finish { outcome, exhaust } => {
                if let Some(index) = exhaust {
                    state.pool.mark_exhausted(index, None).await;
                }
                return finish(state, outcome, last.take(), request_id);
            }
        };
        (fsm, action) = forward::handle_event(fsm, event, max_attempts);
    }
}

async fn select_credential<'p>(
    pool: &'p CredentialPool,
    credential: &mut Option<&'p Secret<String>>,
) -> ForwardEvent {
    match pool.select().await {
        Some(selected) => {
            *credential = Some(selected.credential);
            ForwardEvent::Selected {
                index: selected.index,
            }
        }
        None => {
            *credential = None;
            warn!("no credential available");
            ForwardEvent::NoneAvailable
        }
    }
}

/// One upstream attempt, logged and recorded. `None` means no response was
/// received.
#[allow(clippy::too_many_arguments)]
async fn call_upstream(
    state: &ProxyState,
    method: &Method,
    uri: &Uri,
    target: &Url,
    headers: &HeaderMap,
    body: Option<&Bytes>,
    credential: &Secret<String>,
    (attempt, index): (usize, usize),
    request_id: &str,
) -> Option<reqwest::Response> {
    let started = Instant::now();
    let result = send(state, method, target, headers, body, credential).await;
    let duration_ms = started.elapsed().as_millis() as u64;

    let (status, outcome) = match &result {
        Ok(response) => {
            let status = response.status().as_u16();
            let classification = state.provider.classify_status(status);
            if classification.rotates() {
                warn!(
                    attempt,
                    index,
                    status,
                    outcome = classification.label(),
                    "credential rejected by upstream"
                );
            } else {
                info!(attempt, index, status, duration_ms, "upstream responded");
            }
            (Some(status), classification.label())
        }
        Err(reason) => {
            warn!(attempt, index, error = %reason, "upstream call failed");
            (None, provider::ErrorClassification::Transport.label())
        }
    };

    crate::metrics::record_attempt(outcome);
    state
        .stats
        .record(AttemptRecord {
            timestamp_ms: stats::unix_millis(),
            request_id: request_id.to_owned(),
            index,
            status,
            outcome,
            duration_ms,
            method: method.to_string(),
            path: uri.path().to_owned(),
        })
        .await;

    result.ok()
}

/// Attach the credential to fresh copies of the target and headers, then send.
async fn send(
    state: &ProxyState,
    method: &Method,
    target: &Url,
    headers: &HeaderMap,
    body: Option<&Bytes>,
    credential: &Secret<String>,
) -> Result<reqwest::Response, String> {
    let mut url = target.clone();
    let mut headers = headers.clone();
    state
        .provider
        .attach_credential(&mut url, &mut headers, credential.expose())
        .map_err(|e| e.to_string())?;

    let mut request = state
        .client
        .request(method.clone(), url)
        .headers(headers)
        .timeout(state.timeout);
    if let Some(body) = body {
        request = request.body(body.clone());
    }

    // The URL may carry the credential: strip it before the error is logged
    request.send().await.map_err(|e| e.without_url().to_string())
}

fn finish(
    state: &ProxyState,
    outcome: Outcome,
    last: Option<reqwest::Response>,
    request_id: &str,
) -> Response {
    match (outcome, last) {
        (Outcome::Deliver, Some(upstream)) => relay(upstream),
        (Outcome::PoolExhausted, _) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            warn!("every credential is cooling down, returning 429");
            pool_exhausted()
        }
        (Outcome::BadGateway, _) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!("upstream unreachable on the final attempt");
            error_response(
                StatusCode::BAD_GATEWAY,
                "upstream unreachable with every credential tried",
                request_id,
            )
        }
        (Outcome::Deliver, None) | (Outcome::Internal, _) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(?outcome, "forwarding ended without a deliverable response");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal forwarding error",
                request_id,
            )
        }
    }
}

/// Stream an upstream response back: status and body unchanged, hop-by-hop
/// headers removed, CORS allow-origin added.
fn relay(upstream: reqwest::Response) -> Response {
    let status = upstream.status();
    let mut headers = HeaderMap::with_capacity(upstream.headers().len() + 1);
    for (name, value) in upstream.headers() {
        if !is_hop_by_hop(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );

    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}

fn carries_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD)
}

/// Upstream base + inbound path (minus `strip_prefix`) + inbound query.
///
/// Scheme, host and port of the inbound request are discarded. Returns
/// `None` when the result is not a valid URL.
pub fn upstream_target(base: &Url, uri: &Uri, strip_prefix: Option<&str>) -> Option<Url> {
    let mut path = uri.path();
    if let Some(prefix) = strip_prefix.map(|p| p.trim_end_matches('/'))
        && let Some(rest) = path.strip_prefix(prefix)
        && (rest.is_empty() || rest.starts_with('/'))
    {
        path = if rest.is_empty() { "/" } else { rest };
    }

    let mut target = format!("{}{}", base.as_str().trim_end_matches('/'), path);
    if let Some(query) = uri.query() {
        target.push('?');
        target.push_str(query);
    }
    Url::parse(&target).ok()
}

/// Inbound headers minus hop-by-hop, inbound-only and access-gate headers.
/// Repeated headers are kept.
pub fn forwarded_headers(inbound: &HeaderMap, access_header: &HeaderName) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_hop_by_hop(name.as_str()) || is_inbound_only(name.as_str()) || name == access_header
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_inbound_only(name: &str) -> bool {
    INBOUND_ONLY_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

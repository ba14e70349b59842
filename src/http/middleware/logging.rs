//! Access log middleware.
//!
//! Emits one structured record per request once the downstream chain has
//! produced a response: one ERROR entry per accumulated handling error, or a
//! single INFO entry keyed by the request path.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::HttpBody;
use axum::extract::{ConnectInfo, FromRequestParts, MatchedPath, RawPathParams, Request, State};
use axum::http::{header, request::Parts, HeaderMap, Version};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{DateTime, SecondsFormat, Utc};

use crate::http::client_ip::TrustedProxy;
use crate::http::request::{
    request_host, version_numbers, version_str, BufferedBody, RequestErrors,
};
use crate::http::skip::StringSet;
use crate::observability::logging::Logger;

/// State for the access log middleware.
#[derive(Clone)]
pub struct LoggingState {
    pub logger: Logger,
    /// Exact request paths that are never logged.
    pub skip: Arc<StringSet>,
    pub proxy: TrustedProxy,
}

/// What the access log knows about one request.
#[derive(Debug)]
pub struct RequestRecord {
    pub status: u16,
    pub client_ip: String,
    pub path: String,
    pub fullpath: String,
    pub user_agent: String,
    pub method: String,
    pub protocol: &'static str,
    pub proto_major: u8,
    pub proto_minor: u8,
    pub headers: String,
    /// -1 when unknown.
    pub content_length: i64,
    pub transfer_encoding: String,
    pub close: bool,
    pub host: String,
    /// Query and urlencoded body values, body values first.
    pub form: String,
    /// Urlencoded body values; `{}` unless an outer layer buffered the body.
    pub post_form: String,
    /// Always `null`: multipart bodies are streamed to the handler unparsed.
    pub multipart_form: String,
    /// Trailer names announced in the `Trailer` header, or `null`.
    pub trailer: String,
    pub remote_addr: String,
    pub request_uri: String,
    pub params: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub latency: std::time::Duration,
}

impl RequestRecord {
    /// Snapshot the request head before it is handed downstream.
    ///
    /// `body_len` is the exact body length when the body already knows it.
    async fn capture(parts: &mut Parts, body_len: Option<u64>, proxy: &TrustedProxy) -> Self {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let fullpath = parts
            .extensions
            .get::<MatchedPath>()
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();
        let params = match RawPathParams::from_request_parts(parts, &()).await {
            Ok(params) => to_json(
                params
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
            Err(_) => "{}".to_string(),
        };
        let mut post_form = Form::new();
        if let Some(BufferedBody(body)) = parts.extensions.get::<BufferedBody>() {
            if is_urlencoded(&parts.headers) {
                collect_form(&mut post_form, body);
            }
        }
        let mut form = post_form.clone();
        if let Some(query) = parts.uri.query() {
            collect_form(&mut form, query.as_bytes());
        }
        let (proto_major, proto_minor) = version_numbers(parts.version);
        let now = Utc::now();

        Self {
            status: 0,
            client_ip: proxy.client_ip(&parts.headers, peer),
            path: parts.uri.path().to_string(),
            fullpath,
            user_agent: header_str(&parts.headers, header::USER_AGENT).to_string(),
            method: parts.method.to_string(),
            protocol: version_str(parts.version),
            proto_major,
            proto_minor,
            headers: headers_json(&parts.headers),
            content_length: content_length(&parts.headers, body_len),
            transfer_encoding: header_str(&parts.headers, header::TRANSFER_ENCODING).to_string(),
            close: wants_close(&parts.headers, parts.version),
            host: request_host(&parts.headers, &parts.uri),
            form: to_json(form),
            post_form: to_json(post_form),
            multipart_form: "null".to_string(),
            trailer: declared_trailers(&parts.headers),
            remote_addr: peer.map(|p| p.to_string()).unwrap_or_default(),
            request_uri: parts
                .uri
                .path_and_query()
                .map(|pq| pq.to_string())
                .unwrap_or_else(|| parts.uri.path().to_string()),
            params,
            created_at: now,
            finished_at: now,
            latency: std::time::Duration::ZERO,
        }
    }
}

macro_rules! access_log {
    ($level:ident, $record:expr, $message:expr) => {{
        let r = $record;
        tracing::$level!(
            http_status = r.status,
            ip = %r.client_ip,
            request.path = %r.path,
            request.user_agent = %r.user_agent,
            request.method = %r.method,
            request.protocol = r.protocol,
            request.proto_major = r.proto_major,
            request.proto_minor = r.proto_minor,
            request.header = %r.headers,
            request.content_length = r.content_length,
            request.transfer_encoding = %r.transfer_encoding,
            request.close = r.close,
            request.host = %r.host,
            request.form = %r.form,
            request.post_form = %r.post_form,
            request.multipart_form = %r.multipart_form,
            request.trailer = %r.trailer,
            request.remote_addr = %r.remote_addr,
            request.request_uri = %r.request_uri,
            request.fullpath = %r.fullpath,
            latency = ?r.latency,
            created_at = %r.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            finished_at = %r.finished_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            params = %r.params,
            "{}",
            $message
        )
    }};
}

pub async fn logging_middleware(
    State(state): State<LoggingState>,
    req: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let (mut parts, body) = req.into_parts();
    let body_len = body.size_hint().exact();
    let mut record = RequestRecord::capture(&mut parts, body_len, &state.proxy).await;
    let mut req = Request::from_parts(parts, body);
    let errors = RequestErrors::attach(&mut req);

    let response = next.run(req).await;

    if state.skip.contains(&record.path) {
        return response;
    }

    record.status = response.status().as_u16();
    record.latency = started.elapsed();
    record.finished_at = Utc::now();

    let errors = errors.to_vec();
    state.logger.in_scope(|| {
        if errors.is_empty() {
            access_log!(info, &record, &record.path);
        } else {
            for error in &errors {
                access_log!(error, &record, error);
            }
        }
    });

    response
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Declared body length; 0 for a request without a body, -1 when the length
/// is only known once the body has been read.
fn content_length(headers: &HeaderMap, body_len: Option<u64>) -> i64 {
    if let Some(declared) = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok())
    {
        return declared;
    }
    if headers.contains_key(header::TRANSFER_ENCODING) {
        return -1;
    }
    body_len
        .and_then(|len| i64::try_from(len).ok())
        .unwrap_or(-1)
}

type Form = BTreeMap<String, Vec<String>>;

fn collect_form(form: &mut Form, encoded: &[u8]) {
    for (k, v) in url::form_urlencoded::parse(encoded) {
        form.entry(k.into_owned()).or_default().push(v.into_owned());
    }
}

fn is_urlencoded(headers: &HeaderMap) -> bool {
    header_str(headers, header::CONTENT_TYPE)
        .split(';')
        .next()
        .is_some_and(|mime| {
            mime.trim()
                .eq_ignore_ascii_case("application/x-www-form-urlencoded")
        })
}

fn declared_trailers(headers: &HeaderMap) -> String {
    let names = headers
        .get_all(header::TRAILER)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(|name| (name.to_ascii_lowercase(), Vec::<String>::new()))
        .collect::<BTreeMap<_, _>>();
    if names.is_empty() {
        "null".to_string()
    } else {
        to_json(names)
    }
}

/// Whether the client asked for the connection to close after this request.
fn wants_close(headers: &HeaderMap, version: Version) -> bool {
    let tokens = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .collect::<Vec<_>>();
    match version {
        Version::HTTP_09 | Version::HTTP_10 => !tokens.iter().any(|t| t == "keep-alive"),
        Version::HTTP_11 => tokens.iter().any(|t| t == "close"),
        _ => false,
    }
}

fn headers_json(headers: &HeaderMap) -> String {
    let mut map: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (name, value) in headers {
        map.entry(name.as_str())
            .or_default()
            .push(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }
    to_json(map)
}

fn to_json(value: impl serde::Serialize) -> String {
    serde_json::to_string(&value).unwrap_or_default()
}

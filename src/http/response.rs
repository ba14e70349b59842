//! Responses produced by the harness itself.
//!
//! # Responsibilities
//! - Fixed JSON body for recovered failures
//! - Aborted responses for peers that already went away
//!
//! # Design Decisions
//! - An aborted response carries a body that fails on first poll; hyper then
//!   tears the connection down without writing body bytes. The status stays
//!   at the default `200`, since hyper may flush the head before the body fails

use std::io;

use axum::body::{Body, Bytes};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// Machine-readable error body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub msg: &'static str,
}

/// `500 {"code":"internal_server_error","msg":"Internal Server Error"}`.
pub fn internal_server_error() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorBody {
            code: "internal_server_error",
            msg: "Internal Server Error",
        }),
    )
        .into_response()
}

/// Marker extension on responses whose connection is being aborted.
#[derive(Debug, Clone, Copy)]
pub struct Aborted;

/// A response that aborts the connection instead of writing a body.
///
/// The status line may still reach the peer before the connection drops.
pub fn aborted() -> Response {
    let body = futures_util::stream::once(async {
        Err::<Bytes, io::Error>(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "connection aborted",
        ))
    });
    let mut response = Response::new(Body::from_stream(body));
    response.extensions_mut().insert(Aborted);
    response
}

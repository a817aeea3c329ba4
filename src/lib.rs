use crate::api::{ApiResponse, ErrorResponse};
use crate::error::BokmerkeError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::error::Error;

pub mod api;
pub mod bookmarks;
pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod handler;
pub mod model;
pub mod reconciler;
pub mod session;

pub fn success<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse { data })).into_response()
}

pub fn created<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse { data })).into_response()
}

pub fn not_found(msg: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub fn internal_error(msg: &str) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

pub fn error_response(err: &BokmerkeError) -> Response {
    (
        err.status(),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
        .into_response()
}

pub fn unpack_error(err: &(dyn Error + 'static)) -> String {
    let mut parts = Vec::new();
    parts.push(err.to_string());
    let mut current = err.source();
    while let Some(source) = current {
        parts.push(source.to_string());
        current = source.source();
    }
    parts.join(": ")
}

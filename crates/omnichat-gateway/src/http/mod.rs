pub mod health;
pub mod operator;
pub mod webhooks;

use axum::{http::StatusCode, Json};
use serde_json::{json, Value};

pub type ApiError = (StatusCode, Json<Value>);

pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": code, "message": message.into() })))
}

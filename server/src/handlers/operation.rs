//! Operation handler - runs `{name, args}` requests through a pipeline.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use folio_engine::{execute_json, ErrorKind, JsonOperation, Pipeline, Session};
use serde_json::Value;

use crate::error::status_for;

/// Status of an encoded operation result: 200 for `{value}`, else by error kind.
pub fn wire_status(response: &Value) -> StatusCode {
    match response.get("error") {
        None => StatusCode::OK,
        Some(kind) => serde_json::from_value::<ErrorKind>(kind.clone())
            .map(status_for)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
    }
}

/// Execute one operation request for a session.
pub async fn handle_operation<O: JsonOperation>(
    pipeline: &Pipeline<Session, O>,
    session: &Session,
    request: Value,
) -> Response {
    let response = execute_json(pipeline, session, request).await;
    (wire_status(&response), Json(response)).into_response()
}

use crate::services::error::ServiceError;
use actix_web::{HttpResponse, error::InternalError};
use anyhow::Result;
use log::{error, warn};
use serde::Serialize;

/// `{status, message}` body used by most endpoints
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StatusResponse {
    pub fn new(status: impl Into<String>) -> Self {
        StatusResponse {
            status: status.into(),
            message: None,
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "ok".to_string(),
            message: Some(message.into()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        StatusResponse {
            status: "error".to_string(),
            message: Some(message.into()),
        }
    }
}

/// Handle Result and convert it to a Response
///
/// Successful data is returned as JSON. [`ServiceError`]s map to 400 and 404,
/// every other error to 500. Error bodies carry the full error chain.
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Name of the operation for logging
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: Serialize,
{
    match result {
        Ok(data) => HttpResponse::Ok().json(data),
        Err(e) => error_response(&e, operation),
    }
}

/// Map an error to its HTTP response
pub fn error_response(e: &anyhow::Error, operation: &str) -> HttpResponse {
    match e.downcast_ref::<ServiceError>() {
        Some(ServiceError::InvalidInput(message)) => {
            warn!("{operation} rejected: {message}");
            HttpResponse::BadRequest().json(StatusResponse::error(message.as_str()))
        }
        Some(ServiceError::NotFound(message)) => {
            warn!("{operation} not found: {message}");
            HttpResponse::NotFound().json(StatusResponse::error(message.as_str()))
        }
        None => {
            error!("{operation} failed: {e:#}");
            HttpResponse::InternalServerError().json(StatusResponse::error(format!("{e:#}")))
        }
    }
}

/// Turn extractor failures (bad JSON, bad query strings) into JSON 400s
pub fn bad_request<E>(err: E) -> actix_web::Error
where
    E: std::fmt::Display + std::fmt::Debug + 'static,
{
    let message = err.to_string();
    warn!("bad request: {message}");
    InternalError::from_response(
        err,
        HttpResponse::BadRequest().json(StatusResponse::error(message)),
    )
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::{body::to_bytes, http::StatusCode};
    use serde_json::{Value, json};

    async fn body_json(response: HttpResponse) -> Value {
        let bytes = to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ok_result_is_json() {
        let response = handle_service_result(Ok(StatusResponse::new("saved")), "test");

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"status": "saved"}));
    }

    #[tokio::test]
    async fn service_errors_map_to_client_codes() {
        let response = handle_service_result::<()>(
            Err(ServiceError::invalid_input("Missing IP or Gateway").into()),
            "test",
        );
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({"status": "error", "message": "Missing IP or Gateway"})
        );

        let response =
            handle_service_result::<()>(Err(ServiceError::not_found("no eth9").into()), "test");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn other_errors_pass_the_chain_through() {
        let err = anyhow::anyhow!("permission denied").context("failed to replace dhcpcd.conf");
        let response = handle_service_result::<()>(Err(err), "test");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await["message"],
            "failed to replace dhcpcd.conf: permission denied"
        );
    }
}

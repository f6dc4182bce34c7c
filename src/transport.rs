//! Outbound HTTP calls to gateway endpoints.
//!
//! Each helper sends one request and classifies what comes back: failures to
//! complete the exchange become transport errors, bodies that cannot be
//! decoded become protocol errors carrying the raw body. Interpreting the
//! gateway's own status codes is left to the driver. Nothing here retries.

use crate::errors::{GatewayError, GatewayResult};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Builds the HTTP client a driver shares across all of its calls.
pub fn build_client(timeout: Duration) -> GatewayResult<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| GatewayError::transport("failed to build http client", e))
}

/// Reads status and body, mapping read failures to transport errors.
async fn read_body(response: reqwest::Response, what: &str) -> GatewayResult<(StatusCode, String)> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::transport(format!("failed to read {} response body", what), e))?;
    Ok((status, body))
}

fn protocol_error(what: &str, status: StatusCode, detail: impl std::fmt::Display, body: String) -> GatewayError {
    tracing::warn!(
        call = what,
        status = status.as_u16(),
        body = %body,
        "unparseable gateway response"
    );
    GatewayError::protocol(
        format!("failed to parse {} response (HTTP {}): {}", what, status.as_u16(), detail),
        body,
    )
}

/// Posts a SOAP envelope and returns the response body.
///
/// SOAP servers report faults with HTTP 500 and an XML body, so any status
/// with a body is handed back for the caller to parse; only an empty
/// non-success reply is treated as a protocol error here.
pub async fn post_soap(
    client: &Client,
    url: &str,
    soap_action: &str,
    envelope: String,
) -> GatewayResult<String> {
    tracing::debug!(url, soap_action, "calling soap service");

    let response = client
        .post(url)
        .header("Content-Type", "text/xml; charset=utf-8")
        .header("SOAPAction", soap_action)
        .body(envelope)
        .send()
        .await
        .map_err(|e| GatewayError::transport(format!("failed to call {}", soap_action), e))?;

    let (status, body) = read_body(response, soap_action).await?;
    if !status.is_success() && body.trim().is_empty() {
        return Err(protocol_error(soap_action, status, "empty body", body));
    }
    Ok(body)
}

/// Posts a JSON body and decodes a JSON reply.
///
/// The reply is decoded regardless of HTTP status because JSON gateways put
/// their error codes in 4xx bodies.
pub async fn post_json<B, R>(client: &Client, url: &str, what: &str, body: &B) -> GatewayResult<R>
where
    B: Serialize + ?Sized,
    R: DeserializeOwned,
{
    tracing::debug!(url, call = what, "calling json service");

    let response = client
        .post(url)
        .header("Accept", "application/json")
        .json(body)
        .send()
        .await
        .map_err(|e| GatewayError::transport(format!("failed to call {}", what), e))?;

    let (status, text) = read_body(response, what).await?;
    match serde_json::from_str::<R>(&text) {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(protocol_error(what, status, &e, text).with_cause(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatewayErrorKind;
    use serde::Deserialize;

    #[derive(Deserialize)]
    struct Reply {
        code: i32,
    }

    #[tokio::test]
    async fn test_post_json_decodes_error_status_bodies() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/call")
            .with_status(400)
            .with_body(r#"{"code": -9}"#)
            .create_async()
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let url = format!("{}/call", server.url());
        let reply: Reply = post_json(&client, &url, "call", &serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(reply.code, -9);
    }

    #[tokio::test]
    async fn test_post_json_keeps_raw_body_on_parse_failure() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/call")
            .with_status(502)
            .with_body("<html>Bad Gateway</html>")
            .create_async()
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let url = format!("{}/call", server.url());
        let err = post_json::<_, Reply>(&client, &url, "call", &serde_json::json!({}))
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind, GatewayErrorKind::Protocol);
        assert_eq!(err.raw_body.as_deref(), Some("<html>Bad Gateway</html>"));
        assert!(err.cause.is_some());
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport() {
        let client = build_client(Duration::from_secs(5)).unwrap();
        let err = post_soap(&client, "http://127.0.0.1:1/svc", "urn:op", String::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Transport);
        assert_eq!(err.code, GatewayError::LOCAL_CODE);
    }
}

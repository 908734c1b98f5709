//! Single-request issue and response classification.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::response::{
    RequestFailure, ServiceFailure, ServiceResponse, Target, ERROR_UNKNOWN, STATUS_ABORTED,
    STATUS_ERROR, STATUS_TIMEOUT,
};
use crate::session::Session;
use crate::token::{TokenSource, TOKEN_MAX_AGE_SECS};
use crate::BuiltNotification;

/// Response headers echoed into outcomes when present.
const HEADER_ECHOES: [&str; 3] = ["apns-unique-id", "apns-request-id", "apns-channel-id"];

/// Issues one HTTP/2 request on an open session.
pub(crate) struct Requester {
    token: Option<Arc<TokenSource>>,
    timeout: Duration,
}

impl Requester {
    pub(crate) fn new(token: Option<Arc<TokenSource>>, timeout: Duration) -> Self {
        Self { token, timeout }
    }

    /// Send `built` to `path` and classify the outcome.
    ///
    /// The timeout covers the whole exchange and cancels only this
    /// stream; the session is untouched.
    pub(crate) async fn request(
        &self,
        session: Session,
        authority: &str,
        built: &BuiltNotification,
        path: &str,
        method: Method,
        target: &Target,
    ) -> Result<ServiceResponse, RequestFailure> {
        let mut builder = http::Request::builder()
            .method(method)
            .uri(format!("https://{authority}{path}"));
        for (name, value) in &built.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let mut token_generation = None;
        if let Some(token) = &self.token {
            if token.is_expired(TOKEN_MAX_AGE_SECS) {
                let (_, observed) = token.current_token();
                if let Err(e) = token.regenerate(observed) {
                    // Send with the stale token; the server's 403 routes
                    // through the retry path.
                    warn!(error = %e, "token refresh failed, sending stale token");
                }
            }
            let (value, generation) = token.current_token();
            builder = builder.header("authorization", format!("bearer {value}"));
            token_generation = Some(generation);
        }

        let request = match builder.body(()) {
            Ok(request) => request,
            Err(e) => {
                return Err(RequestFailure::transport(
                    target.clone(),
                    format!("invalid request: {e}"),
                ))
            }
        };

        let send = match session.send.clone().ready().await {
            Ok(send) => send,
            Err(e) => return Err(stream_failure(target, &e)),
        };
        let mut send = send;

        let has_body = built.has_body();
        let (response_future, mut stream) = match send.send_request(request, !has_body) {
            Ok(pair) => pair,
            Err(e) => return Err(stream_failure(target, &e)),
        };
        if has_body {
            if let Err(e) = stream.send_data(Bytes::from(built.body.clone()), true) {
                return Err(stream_failure(target, &e));
            }
        }

        let exchange = async {
            let response = response_future.await?;
            let status = response.status();
            let headers = response.headers().clone();
            let mut body = response.into_body();
            let mut data = Vec::new();
            while let Some(chunk) = body.data().await {
                let chunk = chunk?;
                let _ = body.flow_control().release_capacity(chunk.len());
                data.extend_from_slice(&chunk);
            }
            Ok::<_, h2::Error>((status, headers, data))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Err(_elapsed) => {
                debug!(path, "apn write timeout");
                stream.send_reset(h2::Reason::CANCEL);
                Err(pseudo_failure(target, STATUS_TIMEOUT))
            }
            Ok(Err(e)) => Err(stream_failure(target, &e)),
            Ok(Ok((status, headers, data))) => {
                self.classify(target, status, &headers, &data, token_generation)
            }
        }
    }

    /// Turn a completed exchange into a success or failure record.
    fn classify(
        &self,
        target: &Target,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
        token_generation: Option<u64>,
    ) -> Result<ServiceResponse, RequestFailure> {
        let echoes = header_echoes(headers);
        let retry_after = headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        let body = String::from_utf8_lossy(body);
        let status_string = status.as_u16().to_string();

        if status.is_success() {
            let mut fields = echoes;
            if !body.is_empty() {
                match serde_json::from_str::<Value>(&body) {
                    Ok(Value::Object(object)) => fields.extend(object),
                    Ok(other) => {
                        fields.insert("response".to_string(), other);
                    }
                    Err(e) => return Err(processing_failure(target, &e, retry_after)),
                }
            }
            return Ok(ServiceResponse {
                target: target.clone(),
                fields,
            });
        }

        if body.is_empty() {
            return Err(RequestFailure::new(
                ServiceFailure {
                    target: target.clone(),
                    status: Some(status_string.clone()),
                    response: None,
                    error: Some(format!(
                        "stream ended unexpectedly with status {status_string} and empty body"
                    )),
                },
                retry_after,
            ));
        }

        let parsed = match serde_json::from_str::<Value>(&body) {
            Ok(parsed) => parsed,
            Err(e) => return Err(processing_failure(target, &e, retry_after)),
        };
        let reason = parsed.get("reason").and_then(Value::as_str);

        if status == StatusCode::FORBIDDEN && reason == Some("ExpiredProviderToken") {
            if let (Some(token), Some(generation)) = (&self.token, token_generation) {
                if let Err(e) = token.regenerate(generation) {
                    warn!(error = %e, "token regeneration after 403 failed");
                }
            }
            return Err(RequestFailure::new(
                ServiceFailure {
                    target: target.clone(),
                    status: Some(status_string),
                    response: None,
                    error: Some("ExpiredProviderToken".to_string()),
                },
                retry_after,
            ));
        }

        if status == StatusCode::INTERNAL_SERVER_ERROR && reason == Some("InternalServerError") {
            return Err(RequestFailure::new(
                ServiceFailure {
                    target: target.clone(),
                    status: Some(status_string),
                    response: None,
                    error: Some("Error 500, stream ended unexpectedly".to_string()),
                },
                retry_after,
            ));
        }

        Err(RequestFailure::new(
            ServiceFailure {
                target: target.clone(),
                status: Some(status_string),
                response: Some(parsed),
                error: None,
            },
            retry_after,
        ))
    }
}

fn header_echoes(headers: &HeaderMap) -> Map<String, Value> {
    let mut echoes = Map::new();
    for name in HEADER_ECHOES {
        if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
            echoes.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    echoes
}

fn pseudo_failure(target: &Target, status: &str) -> RequestFailure {
    RequestFailure::new(
        ServiceFailure {
            target: target.clone(),
            status: Some(status.to_string()),
            response: None,
            error: Some(ERROR_UNKNOWN.to_string()),
        },
        None,
    )
}

fn stream_failure(target: &Target, error: &h2::Error) -> RequestFailure {
    debug!(error = %error, "stream failed");
    let status = if error.reason() == Some(h2::Reason::CANCEL) {
        STATUS_ABORTED
    } else {
        STATUS_ERROR
    };
    pseudo_failure(target, status)
}

fn processing_failure(
    target: &Target,
    cause: &serde_json::Error,
    retry_after: Option<u64>,
) -> RequestFailure {
    RequestFailure::new(
        ServiceFailure {
            target: target.clone(),
            status: None,
            response: None,
            error: Some(format!("Unexpected error processing APNs response: {cause}")),
        },
        retry_after,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Minter;
    use crate::Result;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn requester() -> Requester {
        Requester::new(None, Duration::from_secs(5))
    }

    fn target() -> Target {
        Target::Device("abcd1234".to_string())
    }

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(
                http::header::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                value.parse().unwrap(),
            );
        }
        headers
    }

    #[test]
    fn success_with_empty_body() {
        let outcome = requester()
            .classify(&target(), StatusCode::OK, &HeaderMap::new(), b"", None)
            .unwrap();
        assert!(outcome.fields.is_empty());
        assert_eq!(outcome.target, target());
    }

    #[test]
    fn success_merges_echoes_and_body() {
        let outcome = requester()
            .classify(
                &target(),
                StatusCode::CREATED,
                &headers(&[("apns-channel-id", "chan-1"), ("apns-request-id", "req-1")]),
                br#"{"extra":true}"#,
                None,
            )
            .unwrap();
        assert_eq!(outcome.fields["apns-channel-id"], "chan-1");
        assert_eq!(outcome.fields["apns-request-id"], "req-1");
        assert_eq!(outcome.fields["extra"], true);
    }

    #[test]
    fn rejection_with_reason_body() {
        let failure = requester()
            .classify(
                &target(),
                StatusCode::BAD_REQUEST,
                &HeaderMap::new(),
                br#"{"reason":"BadDeviceToken"}"#,
                None,
            )
            .unwrap_err();
        assert_eq!(failure.failure.status.as_deref(), Some("400"));
        assert_eq!(
            failure.failure.response.as_ref().unwrap()["reason"],
            "BadDeviceToken"
        );
        assert!(failure.failure.error.is_none());
    }

    #[test]
    fn retry_after_is_captured_internally() {
        let failure = requester()
            .classify(
                &target(),
                StatusCode::SERVICE_UNAVAILABLE,
                &headers(&[("retry-after", "120")]),
                br#"{"reason":"ServiceUnavailable"}"#,
                None,
            )
            .unwrap_err();
        assert_eq!(failure.retry_after, Some(120));
        assert_eq!(failure.retry_after_secs(), 120);
    }

    #[test]
    fn unparsable_retry_after_is_zero() {
        let failure = requester()
            .classify(
                &target(),
                StatusCode::SERVICE_UNAVAILABLE,
                &headers(&[("retry-after", "soon")]),
                br#"{"reason":"ServiceUnavailable"}"#,
                None,
            )
            .unwrap_err();
        assert_eq!(failure.retry_after_secs(), 0);
    }

    #[test]
    fn internal_server_error_maps_to_stream_message() {
        let failure = requester()
            .classify(
                &target(),
                StatusCode::INTERNAL_SERVER_ERROR,
                &HeaderMap::new(),
                br#"{"reason":"InternalServerError"}"#,
                None,
            )
            .unwrap_err();
        assert_eq!(failure.failure.status.as_deref(), Some("500"));
        assert_eq!(
            failure.failure.error.as_deref(),
            Some("Error 500, stream ended unexpectedly")
        );
    }

    #[test]
    fn empty_body_rejection() {
        let failure = requester()
            .classify(&target(), StatusCode::NOT_FOUND, &HeaderMap::new(), b"", None)
            .unwrap_err();
        assert_eq!(
            failure.failure.error.as_deref(),
            Some("stream ended unexpectedly with status 404 and empty body")
        );
    }

    #[test]
    fn malformed_body_is_a_processing_failure() {
        let failure = requester()
            .classify(
                &target(),
                StatusCode::BAD_REQUEST,
                &HeaderMap::new(),
                b"not json",
                None,
            )
            .unwrap_err();
        assert!(failure
            .failure
            .error
            .as_deref()
            .unwrap()
            .starts_with("Unexpected error processing APNs response"));
    }

    struct CountingMinter(AtomicU64);

    impl Minter for CountingMinter {
        fn mint(&self, _issued_at: i64) -> Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{n}"))
        }
    }

    #[test]
    fn expired_provider_token_regenerates_observed_generation() {
        let token = Arc::new(
            TokenSource::new(Box::new(CountingMinter(AtomicU64::new(0)))).unwrap(),
        );
        let requester = Requester::new(Some(token.clone()), Duration::from_secs(5));
        let failure = requester
            .classify(
                &target(),
                StatusCode::FORBIDDEN,
                &HeaderMap::new(),
                br#"{"reason":"ExpiredProviderToken"}"#,
                Some(0),
            )
            .unwrap_err();
        assert_eq!(failure.failure.status.as_deref(), Some("403"));
        assert_eq!(failure.failure.error.as_deref(), Some("ExpiredProviderToken"));
        // The observed generation was regenerated.
        assert_eq!(token.current_token().1, 1);
    }

    #[test]
    fn stale_generation_does_not_regenerate_twice() {
        let token = Arc::new(
            TokenSource::new(Box::new(CountingMinter(AtomicU64::new(0)))).unwrap(),
        );
        token.regenerate(0).unwrap();
        let requester = Requester::new(Some(token.clone()), Duration::from_secs(5));
        let _ = requester
            .classify(
                &target(),
                StatusCode::FORBIDDEN,
                &HeaderMap::new(),
                br#"{"reason":"ExpiredProviderToken"}"#,
                Some(0),
            )
            .unwrap_err();
        // Generation 0 is stale; no further mint happened.
        assert_eq!(token.current_token().1, 1);
    }
}

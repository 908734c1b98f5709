//! Request outcomes and batch results.
//!
//! [`ServiceResponse`] and [`ServiceFailure`] are the public per-recipient
//! outcomes. The requester and retry policy work with the internal
//! [`RequestFailure`], which additionally carries the server's
//! `retry-after` hint; [`RequestFailure::into_public`] is the redactor
//! that keeps the hint from ever reaching a caller.

use serde_json::{Map, Value};

/// Pseudo-status recorded when the per-request timeout fired.
pub(crate) const STATUS_TIMEOUT: &str = "(timeout)";
/// Pseudo-status recorded when the stream was aborted.
pub(crate) const STATUS_ABORTED: &str = "(aborted)";
/// Pseudo-status recorded on a mid-stream transport error.
pub(crate) const STATUS_ERROR: &str = "(error)";

/// Error message attached to timeout/aborted/error pseudo-statuses.
pub(crate) const ERROR_UNKNOWN: &str = "Timeout, aborted, or other unknown error";

/// The recipient a request was addressed to, which is also the label on
/// its outcome: a device token for `send`, a bundle identifier for
/// channel management and broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    /// Device token (`send`).
    Device(String),
    /// Bundle identifier (`manage_channels`, `broadcast`).
    BundleId(String),
}

impl Target {
    /// The label value.
    pub fn value(&self) -> &str {
        match self {
            Self::Device(token) => token,
            Self::BundleId(bundle) => bundle,
        }
    }

    /// The label field name (`device` or `bundleId`).
    pub fn field(&self) -> &'static str {
        match self {
            Self::Device(_) => "device",
            Self::BundleId(_) => "bundleId",
        }
    }
}

/// A delivered request: a 2xx response.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceResponse {
    /// The recipient label.
    pub target: Target,
    /// Header echoes (`apns-unique-id`, `apns-request-id`,
    /// `apns-channel-id`) merged with the parsed response body.
    pub fields: Map<String, Value>,
}

/// A failed request, as reported to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceFailure {
    /// The recipient label.
    pub target: Target,
    /// HTTP status as a string (`"400"`), or a pseudo-status for
    /// timeouts/aborts/transport errors. Absent for failures that never
    /// produced response headers.
    pub status: Option<String>,
    /// Parsed JSON rejection body, when the server sent one.
    pub response: Option<Value>,
    /// Error description for failures without a structured rejection.
    pub error: Option<String>,
}

impl ServiceFailure {
    /// The status parsed as a numeric HTTP code, if it is one.
    pub fn status_code(&self) -> Option<u16> {
        self.status.as_deref().and_then(|s| s.parse().ok())
    }
}

/// The internal failure record: the public failure plus the server's
/// `retry-after` hint, which must never leave the retry layer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct RequestFailure {
    pub(crate) failure: ServiceFailure,
    pub(crate) retry_after: Option<u64>,
}

impl RequestFailure {
    pub(crate) fn new(failure: ServiceFailure, retry_after: Option<u64>) -> Self {
        Self {
            failure,
            retry_after,
        }
    }

    /// Failure for a request that could not get a session.
    pub(crate) fn transport(target: Target, error: String) -> Self {
        Self::new(
            ServiceFailure {
                target,
                status: None,
                response: None,
                error: Some(error),
            },
            None,
        )
    }

    pub(crate) fn status_code(&self) -> Option<u16> {
        self.failure.status_code()
    }

    /// Seconds to wait before retrying, per the server's hint.
    pub(crate) fn retry_after_secs(&self) -> u64 {
        self.retry_after.unwrap_or(0)
    }

    /// Redact the internal hint and release the failure to the caller.
    pub(crate) fn into_public(self) -> ServiceFailure {
        self.failure
    }
}

/// Outcome of one batch call: every input recipient appears in exactly
/// one of the two lists.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BatchResult {
    /// Delivered recipients.
    pub sent: Vec<ServiceResponse>,
    /// Failed recipients.
    pub failed: Vec<ServiceFailure>,
}

impl BatchResult {
    /// Partition a list of per-recipient outcomes.
    ///
    /// Responses that somehow carry a `status` or `error` field are
    /// reclassified as failures; a 2xx outcome never has either.
    pub(crate) fn collect(
        outcomes: Vec<Result<ServiceResponse, RequestFailure>>,
    ) -> Self {
        let mut result = Self::default();
        for outcome in outcomes {
            match outcome {
                Ok(response) => {
                    if response.fields.contains_key("status")
                        || response.fields.contains_key("error")
                    {
                        result.failed.push(reclassify(response));
                    } else {
                        result.sent.push(response);
                    }
                }
                Err(failure) => result.failed.push(failure.into_public()),
            }
        }
        result
    }
}

fn reclassify(response: ServiceResponse) -> ServiceFailure {
    let status = response
        .fields
        .get("status")
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string));
    let error = response
        .fields
        .get("error")
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string));
    ServiceFailure {
        target: response.target,
        status,
        response: Some(Value::Object(response.fields)),
        error,
    }
}

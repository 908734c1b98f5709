//! The provider: batch entry points over the two APNs sessions.

use std::sync::Arc;

use futures::future::join_all;
use http::Method;
use tracing::debug;

use crate::request::Requester;
use crate::response::{RequestFailure, ServiceResponse, Target};
use crate::retry::RetryPolicy;
use crate::session::{SessionKind, SessionManager};
use crate::token::{Es256Minter, TokenSource};
use crate::transport::{TlsTransport, Transport};
use crate::{
    ApnsError, BatchResult, BuiltNotification, Credentials, Notification, ProviderConfig,
    ResolvedEndpoints, Result,
};

/// Request families, keyed by the path template they resolve to.
///
/// The request type decides both the path and the session: channel
/// management (`/1/apps/*`) runs on the manage session, everything else
/// on the push session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestType {
    Device,
    Channels,
    AllChannels,
    Broadcasts,
}

impl RequestType {
    fn path(self, sub: &str) -> String {
        match self {
            Self::Device => format!("/3/device/{sub}"),
            Self::Channels => format!("/1/apps/{sub}/channels"),
            Self::AllChannels => format!("/1/apps/{sub}/all-channels"),
            Self::Broadcasts => format!("/4/broadcasts/apps/{sub}"),
        }
    }

    fn session_kind(self) -> SessionKind {
        match self {
            Self::Channels | Self::AllChannels => SessionKind::Manage,
            Self::Device | Self::Broadcasts => SessionKind::Push,
        }
    }
}

/// One or more device tokens for [`Provider::send`].
pub struct Recipients(Vec<String>);

impl From<&str> for Recipients {
    fn from(token: &str) -> Self {
        Self(vec![token.to_string()])
    }
}

impl From<String> for Recipients {
    fn from(token: String) -> Self {
        Self(vec![token])
    }
}

impl From<Vec<String>> for Recipients {
    fn from(tokens: Vec<String>) -> Self {
        Self(tokens)
    }
}

impl From<Vec<&str>> for Recipients {
    fn from(tokens: Vec<&str>) -> Self {
        Self(tokens.into_iter().map(str::to_string).collect())
    }
}

impl From<&[&str]> for Recipients {
    fn from(tokens: &[&str]) -> Self {
        Self(tokens.iter().map(|t| t.to_string()).collect())
    }
}

/// One or more notifications for channel management and broadcast.
pub struct Notifications(Vec<Notification>);

impl From<Notification> for Notifications {
    fn from(notification: Notification) -> Self {
        Self(vec![notification])
    }
}

impl From<&Notification> for Notifications {
    fn from(notification: &Notification) -> Self {
        Self(vec![notification.clone()])
    }
}

impl From<Vec<Notification>> for Notifications {
    fn from(notifications: Vec<Notification>) -> Self {
        Self(notifications)
    }
}

impl From<&[Notification]> for Notifications {
    fn from(notifications: &[Notification]) -> Self {
        Self(notifications.to_vec())
    }
}

/// A provider-side APNs client.
///
/// Owns one push session and one channel-management session; the three
/// batch entry points fan requests out concurrently and settle every
/// recipient into [`BatchResult::sent`] or [`BatchResult::failed`].
pub struct Provider {
    sessions: Arc<SessionManager>,
    requester: Requester,
    retry: RetryPolicy,
}

impl Provider {
    /// Create a provider with the production TLS transport.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let push = Arc::new(TlsTransport::new(
            config.credentials.as_ref(),
            config.reject_unauthorized,
            config.proxy.clone(),
        )?);
        let manage = Arc::new(TlsTransport::new(
            config.credentials.as_ref(),
            config.reject_unauthorized,
            config.manage_channels_proxy.clone(),
        )?);
        Self::with_transports(config, push, manage)
    }

    /// Create a provider over caller-supplied transports.
    ///
    /// The seam tests use to run against an in-process server; the
    /// credential material is still honored for token authentication.
    pub fn with_transports(
        config: ProviderConfig,
        push: Arc<dyn Transport>,
        manage: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;
        let endpoints = ResolvedEndpoints::resolve(&config);

        let token = match &config.credentials {
            Some(Credentials::Token {
                key_pem,
                key_id,
                team_id,
            }) => {
                let minter = Es256Minter::new(key_pem, key_id.clone(), team_id.clone())?;
                Some(Arc::new(TokenSource::new(Box::new(minter))?))
            }
            _ => None,
        };

        let sessions = Arc::new(SessionManager::new(
            endpoints.push,
            push,
            endpoints.manage,
            manage,
            config.heartbeat,
        ));

        Ok(Self {
            sessions,
            requester: Requester::new(token, config.request_timeout),
            retry: RetryPolicy::new(config.connection_retry_limit),
        })
    }

    /// Send a notification to one or more device tokens.
    ///
    /// The notification is built once; one request is issued per token.
    /// Every token lands in exactly one of the result's two lists.
    pub async fn send(
        &self,
        notification: &Notification,
        recipients: impl Into<Recipients>,
    ) -> BatchResult {
        let recipients = recipients.into().0;
        let built = notification.built();
        debug!(recipients = recipients.len(), "sending notification batch");

        let requests = recipients.into_iter().map(|device| {
            let built = &built;
            async move {
                let target = Target::Device(device);
                let sub = target.value().to_string();
                self.dispatch(RequestType::Device, Method::POST, &target, built, &sub)
                    .await
            }
        });
        BatchResult::collect(join_all(requests).await)
    }

    /// Create, read, or delete broadcast channels for a bundle.
    ///
    /// `action` is one of `create`, `read`, `readAll`, `delete`. Any
    /// other action rejects before any I/O; this is the only entry-point
    /// rejection.
    pub async fn manage_channels(
        &self,
        notifications: impl Into<Notifications>,
        bundle_id: impl Into<String>,
        action: &str,
    ) -> Result<BatchResult> {
        let bundle_id = bundle_id.into();
        let (request_type, method) = match action {
            "create" => (RequestType::Channels, Method::POST),
            "read" => (RequestType::Channels, Method::GET),
            "readAll" => (RequestType::AllChannels, Method::GET),
            "delete" => (RequestType::Channels, Method::DELETE),
            other => {
                return Err(ApnsError::UnsupportedAction {
                    bundle_id,
                    action: other.to_string(),
                })
            }
        };

        let builds: Vec<BuiltNotification> = notifications
            .into()
            .0
            .into_iter()
            .map(|mut notification| {
                if action == "create" {
                    notification.add_push_type_if_needed();
                }
                notification.strip_channel_unrelated();
                notification.built()
            })
            .collect();

        let target = Target::BundleId(bundle_id.clone());
        let requests = builds.iter().map(|built| {
            self.dispatch(request_type, method.clone(), &target, built, &bundle_id)
        });
        Ok(BatchResult::collect(join_all(requests).await))
    }

    /// Broadcast notifications to a bundle's channels.
    pub async fn broadcast(
        &self,
        notifications: impl Into<Notifications>,
        bundle_id: impl Into<String>,
    ) -> BatchResult {
        let bundle_id = bundle_id.into();
        let builds: Vec<BuiltNotification> =
            notifications.into().0.iter().map(Notification::built).collect();

        let target = Target::BundleId(bundle_id.clone());
        let requests = builds.iter().map(|built| {
            let target = &target;
            let bundle_id = &bundle_id;
            async move {
                let outcome = self
                    .dispatch(RequestType::Broadcasts, Method::POST, target, built, bundle_id)
                    .await;
                // Echo the channel the notification was addressed to.
                match outcome {
                    Ok(mut response) => {
                        if let Some(channel) = built.headers.get("apns-channel-id") {
                            response
                                .fields
                                .entry("apns-channel-id".to_string())
                                .or_insert_with(|| channel.clone().into());
                        }
                        Ok(response)
                    }
                    Err(failure) => Err(failure),
                }
            }
        });
        BatchResult::collect(join_all(requests).await)
    }

    /// Shut down both sessions. Idempotent; in-flight requests settle as
    /// aborted/error failures.
    pub async fn shutdown(&self) {
        self.sessions.shutdown().await;
    }

    async fn dispatch(
        &self,
        request_type: RequestType,
        method: Method,
        target: &Target,
        built: &BuiltNotification,
        sub: &str,
    ) -> std::result::Result<ServiceResponse, RequestFailure> {
        let kind = request_type.session_kind();
        let path = request_type.path(sub);
        let authority = self.sessions.endpoint(kind).authority();
        self.retry
            .execute(&self.sessions, kind, target, |session| {
                self.requester
                    .request(session, &authority, built, &path, method.clone(), target)
            })
            .await
    }
}

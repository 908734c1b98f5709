//! # APNs Provider
//!
//! A provider-side client for Apple's Push Notification service HTTP/2
//! API.
//!
//! ## Features
//!
//! - **Two multiplexed sessions**: device delivery and channel management
//!   each get a long-lived HTTP/2 session with heartbeat PINGs and
//!   transparent reconnection
//! - **Batch fan-out**: `send`, `manage_channels`, and `broadcast` issue
//!   one concurrent request per recipient and settle every recipient into
//!   a two-list [`BatchResult`]; partial failure is data, not an error
//! - **Status-driven retries**: server `Retry-After` hints are obeyed and
//!   expired provider tokens are refreshed and retried in place
//! - **Token or certificate auth**: ES256 provider tokens with coalesced
//!   regeneration, or TLS client certificates
//! - **HTTP proxies**: CONNECT tunneling per session
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use apns_provider::{Credentials, Notification, Provider, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ProviderConfig::builder()
//!         .credentials(Credentials::token_from_file(
//!             "AuthKey_ABC123.p8",
//!             "ABC123",
//!             "TEAM456",
//!         )?)
//!         .production(true)
//!         .build()?;
//!     let provider = Provider::new(config)?;
//!
//!     let notification = Notification::new()
//!         .alert("Hello", "This is a push notification")
//!         .topic("com.example.app");
//!
//!     let result = provider.send(&notification, "device-token").await;
//!     println!("sent: {}, failed: {}", result.sent.len(), result.failed.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Broadcast channels
//!
//! ```rust,no_run
//! # use apns_provider::{Notification, Provider};
//! # async fn example(provider: Provider) -> Result<(), Box<dyn std::error::Error>> {
//! let channel = Notification::new().message_storage_policy(1);
//! let created = provider
//!     .manage_channels(channel, "com.example.app", "create")
//!     .await?;
//!
//! let update = Notification::new()
//!     .alert("Score update", "3 - 1")
//!     .channel_id("dHN0LXNyY2g=");
//! provider.broadcast(update, "com.example.app").await;
//! # Ok(())
//! # }
//! ```

mod config;
mod credentials;
mod endpoint;
mod error;
mod multi;
mod notification;
mod provider;
mod proxy;
mod request;
mod response;
mod retry;
mod session;
mod token;
pub mod transport;

pub use config::{ProviderConfig, ProviderConfigBuilder, Proxy};
pub use credentials::Credentials;
pub use endpoint::{Endpoint, ResolvedEndpoints};
pub use error::{ApnsError, Result};
pub use multi::MultiProvider;
pub use notification::{Alert, Aps, BuiltNotification, Notification, PushType};
pub use provider::{Notifications, Provider, Recipients};
pub use response::{BatchResult, ServiceFailure, ServiceResponse, Target};
pub use token::{Es256Minter, Minter, TokenSource};
pub use transport::{TlsTransport, Transport};

/// Prelude for common imports.
///
/// ```
/// use apns_provider::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{ProviderConfig, ProviderConfigBuilder, Proxy};
    pub use crate::credentials::Credentials;
    pub use crate::error::{ApnsError, Result};
    pub use crate::multi::MultiProvider;
    pub use crate::notification::{Notification, PushType};
    pub use crate::provider::Provider;
    pub use crate::response::{BatchResult, ServiceFailure, ServiceResponse, Target};
}

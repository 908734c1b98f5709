//! Provider configuration.

use std::time::Duration;

use crate::{ApnsError, Credentials, Result};

/// Configuration for a [`Provider`](crate::Provider).
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Authentication material. `None` sends unauthenticated requests,
    /// which is only useful against test servers.
    pub credentials: Option<Credentials>,
    /// Select production endpoints. `None` defers to
    /// `NODE_ENV == "production"`.
    pub production: Option<bool>,
    /// Override the push endpoint host. Setting this to the production
    /// host forces production mode; any other value forces development.
    pub address: Option<String>,
    /// Override the push endpoint port (default 443).
    pub port: Option<u16>,
    /// Override the channel-management endpoint host.
    pub manage_channels_address: Option<String>,
    /// Override the channel-management endpoint port
    /// (default 2196 production, 2195 development).
    pub manage_channels_port: Option<u16>,
    /// HTTP proxy for the push session.
    pub proxy: Option<Proxy>,
    /// HTTP proxy for the channel-management session.
    pub manage_channels_proxy: Option<Proxy>,
    /// Verify the server certificate chain.
    pub reject_unauthorized: bool,
    /// Maximum retries per request.
    pub connection_retry_limit: u32,
    /// PING interval per open session.
    pub heartbeat: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
    /// Number of independent providers in a
    /// [`MultiProvider`](crate::MultiProvider).
    pub client_count: usize,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            credentials: None,
            production: None,
            address: None,
            port: None,
            manage_channels_address: None,
            manage_channels_port: None,
            proxy: None,
            manage_channels_proxy: None,
            reject_unauthorized: true,
            connection_retry_limit: 3,
            heartbeat: Duration::from_millis(60_000),
            request_timeout: Duration::from_millis(5_000),
            client_count: 2,
        }
    }
}

impl ProviderConfig {
    /// Create a configuration builder.
    pub fn builder() -> ProviderConfigBuilder {
        ProviderConfigBuilder::default()
    }

    /// Validate the configuration.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(credentials) = &self.credentials {
            credentials.validate()?;
        }
        if self.client_count == 0 {
            return Err(ApnsError::Config(
                "clientCount must be a positive integer".to_string(),
            ));
        }
        Ok(())
    }
}

/// An HTTP proxy endpoint, tunneled through with CONNECT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    /// Proxy host.
    pub host: String,
    /// Proxy port.
    pub port: u16,
}

impl Proxy {
    /// Create a proxy endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Builder for [`ProviderConfig`].
#[derive(Debug, Default)]
pub struct ProviderConfigBuilder {
    config: ProviderConfig,
}

impl ProviderConfigBuilder {
    /// Set token credentials, replacing any TLS material.
    pub fn token(
        mut self,
        key_pem: impl Into<Vec<u8>>,
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Self {
        self.config.credentials = Some(Credentials::token(key_pem, key_id, team_id));
        self
    }

    /// Set credentials directly.
    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.config.credentials = Some(credentials);
        self
    }

    /// Select production or development endpoints.
    pub fn production(mut self, production: bool) -> Self {
        self.config.production = Some(production);
        self
    }

    /// Override the push endpoint host.
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config.address = Some(address.into());
        self
    }

    /// Override the push endpoint port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);
        self
    }

    /// Override the channel-management endpoint host.
    pub fn manage_channels_address(mut self, address: impl Into<String>) -> Self {
        self.config.manage_channels_address = Some(address.into());
        self
    }

    /// Override the channel-management endpoint port.
    pub fn manage_channels_port(mut self, port: u16) -> Self {
        self.config.manage_channels_port = Some(port);
        self
    }

    /// Route the push session through an HTTP proxy.
    pub fn proxy(mut self, proxy: Proxy) -> Self {
        self.config.proxy = Some(proxy);
        self
    }

    /// Route the channel-management session through an HTTP proxy.
    pub fn manage_channels_proxy(mut self, proxy: Proxy) -> Self {
        self.config.manage_channels_proxy = Some(proxy);
        self
    }

    /// Enable or disable server certificate verification.
    pub fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.config.reject_unauthorized = reject;
        self
    }

    /// Set the per-request retry limit.
    pub fn connection_retry_limit(mut self, limit: u32) -> Self {
        self.config.connection_retry_limit = limit;
        self
    }

    /// Set the session PING interval.
    pub fn heartbeat(mut self, heartbeat: Duration) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    /// Set the per-request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout = timeout;
        self
    }

    /// Set the number of providers in a [`MultiProvider`](crate::MultiProvider).
    pub fn client_count(mut self, count: usize) -> Self {
        self.config.client_count = count;
        self
    }

    /// Validate and build the configuration.
    pub fn build(self) -> Result<ProviderConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ProviderConfig::default();
        assert!(config.reject_unauthorized);
        assert_eq!(config.connection_retry_limit, 3);
        assert_eq!(config.heartbeat, Duration::from_millis(60_000));
        assert_eq!(config.request_timeout, Duration::from_millis(5_000));
        assert_eq!(config.client_count, 2);
    }

    #[test]
    fn builder_validates_client_count() {
        let err = ProviderConfig::builder().client_count(0).build().unwrap_err();
        assert!(matches!(err, ApnsError::Config(_)));
        assert!(err.to_string().contains("clientCount"));
    }

    #[test]
    fn builder_validates_token_fields() {
        let err = ProviderConfig::builder()
            .token(b"pem".to_vec(), "", "TEAM")
            .build()
            .unwrap_err();
        assert!(matches!(err, ApnsError::Config(_)));
    }

    #[test]
    fn token_replaces_tls_material() {
        let config = ProviderConfig::builder()
            .credentials(Credentials::tls(b"cert".to_vec(), b"key".to_vec()))
            .token(b"pem".to_vec(), "KEY", "TEAM")
            .build()
            .unwrap();
        assert!(matches!(
            config.credentials,
            Some(Credentials::Token { .. })
        ));
    }

    #[test]
    fn builder_sets_overrides() {
        let config = ProviderConfig::builder()
            .production(true)
            .address("localhost")
            .port(8443)
            .manage_channels_address("manage.local")
            .manage_channels_port(8444)
            .proxy(Proxy::new("proxy.local", 3128))
            .connection_retry_limit(5)
            .build()
            .unwrap();
        assert_eq!(config.address.as_deref(), Some("localhost"));
        assert_eq!(config.port, Some(8443));
        assert_eq!(config.proxy, Some(Proxy::new("proxy.local", 3128)));
        assert_eq!(config.connection_retry_limit, 5);
    }
}

//! APNs endpoints and production/development resolution.

use crate::ProviderConfig;

/// Production device-push host.
pub const PRODUCTION_PUSH_HOST: &str = "api.push.apple.com";
/// Development device-push host.
pub const DEVELOPMENT_PUSH_HOST: &str = "api.sandbox.push.apple.com";
/// Production channel-management host.
pub const PRODUCTION_MANAGE_HOST: &str = "api-manage-broadcast.push.apple.com";
/// Development channel-management host.
pub const DEVELOPMENT_MANAGE_HOST: &str = "api-manage-broadcast.sandbox.push.apple.com";

/// A resolved host/port pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name, also used for SNI.
    pub host: String,
    /// TCP port.
    pub port: u16,
}

impl Endpoint {
    /// Create an endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port`, as written into a CONNECT request line and the
    /// `:authority` pseudo-header.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// The push and manage endpoints a provider will talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEndpoints {
    /// Device-push endpoint (`/3/device/*`, `/4/broadcasts/*`).
    pub push: Endpoint,
    /// Channel-management endpoint (`/1/apps/*`).
    pub manage: Endpoint,
    /// Whether production mode was selected.
    pub production: bool,
}

impl ResolvedEndpoints {
    /// Resolve the endpoints for a configuration.
    ///
    /// `production` defaults from `NODE_ENV == "production"`. An explicit
    /// `address` equal to the production push host forces production mode;
    /// any other explicit `address` forces development. The manage port
    /// defaults to 2196 in production and 2195 in development.
    pub fn resolve(config: &ProviderConfig) -> Self {
        let mut production = config.production.unwrap_or_else(|| {
            std::env::var("NODE_ENV").is_ok_and(|env| env == "production")
        });
        if let Some(address) = &config.address {
            production = address == PRODUCTION_PUSH_HOST;
        }

        let push_host = config
            .address
            .clone()
            .unwrap_or_else(|| default_push_host(production).to_string());
        let push = Endpoint::new(push_host, config.port.unwrap_or(443));

        let manage_host = config
            .manage_channels_address
            .clone()
            .unwrap_or_else(|| default_manage_host(production).to_string());
        let manage_port = config
            .manage_channels_port
            .unwrap_or(if production { 2196 } else { 2195 });
        let manage = Endpoint::new(manage_host, manage_port);

        Self {
            push,
            manage,
            production,
        }
    }
}

fn default_push_host(production: bool) -> &'static str {
    if production {
        PRODUCTION_PUSH_HOST
    } else {
        DEVELOPMENT_PUSH_HOST
    }
}

fn default_manage_host(production: bool) -> &'static str {
    if production {
        PRODUCTION_MANAGE_HOST
    } else {
        DEVELOPMENT_MANAGE_HOST
    }
}

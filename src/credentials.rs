//! Provider credentials: token authentication or TLS client material.

use std::path::Path;

use crate::{ApnsError, Result};

/// Authentication material for a provider.
///
/// Exactly one mode is active at a time; setting token credentials
/// replaces any TLS material and vice versa.
#[derive(Clone)]
pub enum Credentials {
    /// Token-based authentication: a JWT minted from an Apple-issued
    /// signing key is attached to every request as
    /// `authorization: bearer <token>`.
    Token {
        /// ES256 signing key in PEM form (`.p8` contents).
        key_pem: Vec<u8>,
        /// Apple key identifier, required non-empty.
        key_id: String,
        /// Apple team identifier, required non-empty.
        team_id: String,
    },
    /// Certificate-based authentication: the material is handed to the
    /// TLS layer as the client certificate chain.
    Tls {
        /// Client certificate chain in PEM form.
        cert_pem: Vec<u8>,
        /// Client private key in PEM form.
        key_pem: Vec<u8>,
        /// Optional PKCS#12 bundle. Accepted for configuration parity but
        /// unsupported at the TLS layer; use PEM cert/key instead.
        pfx: Option<Vec<u8>>,
        /// Passphrase for the PKCS#12 bundle.
        passphrase: Option<String>,
        /// Additional trust anchors in PEM form.
        ca_pem: Option<Vec<u8>>,
    },
}

impl Credentials {
    /// Token credentials from in-memory key material.
    pub fn token(
        key_pem: impl Into<Vec<u8>>,
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Self {
        Self::Token {
            key_pem: key_pem.into(),
            key_id: key_id.into(),
            team_id: team_id.into(),
        }
    }

    /// Token credentials read from a `.p8` key file.
    pub fn token_from_file(
        key_path: impl AsRef<Path>,
        key_id: impl Into<String>,
        team_id: impl Into<String>,
    ) -> Result<Self> {
        let key_pem = std::fs::read(key_path)?;
        Ok(Self::token(key_pem, key_id, team_id))
    }

    /// TLS credentials from in-memory PEM material.
    pub fn tls(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self::Tls {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
            pfx: None,
            passphrase: None,
            ca_pem: None,
        }
    }

    /// TLS credentials read from PEM files, defaulting to `cert.pem` and
    /// `key.pem` in the working directory.
    pub fn tls_from_pem_files(
        cert_path: Option<&Path>,
        key_path: Option<&Path>,
    ) -> Result<Self> {
        let cert_pem = std::fs::read(cert_path.unwrap_or_else(|| Path::new("cert.pem")))?;
        let key_pem = std::fs::read(key_path.unwrap_or_else(|| Path::new("key.pem")))?;
        Ok(Self::tls(cert_pem, key_pem))
    }

    /// Attach extra trust anchors (TLS credentials only).
    pub fn with_ca(mut self, ca: impl Into<Vec<u8>>) -> Self {
        if let Self::Tls { ca_pem, .. } = &mut self {
            *ca_pem = Some(ca.into());
        }
        self
    }

    /// Validate the credential fields.
    pub(crate) fn validate(&self) -> Result<()> {
        if let Self::Token { key_id, team_id, .. } = self {
            if key_id.is_empty() {
                return Err(ApnsError::Config(
                    "token.keyId must be a non-empty string".to_string(),
                ));
            }
            if team_id.is_empty() {
                return Err(ApnsError::Config(
                    "token.teamId must be a non-empty string".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Token { key_id, team_id, .. } => f
                .debug_struct("Credentials::Token")
                .field("key_id", key_id)
                .field("team_id", team_id)
                .finish_non_exhaustive(),
            Self::Tls { .. } => f.debug_struct("Credentials::Tls").finish_non_exhaustive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_requires_key_id() {
        let creds = Credentials::token(b"key".to_vec(), "", "TEAM");
        let err = creds.validate().unwrap_err();
        assert!(err.to_string().contains("keyId"));
    }

    #[test]
    fn token_requires_team_id() {
        let creds = Credentials::token(b"key".to_vec(), "KEY", "");
        let err = creds.validate().unwrap_err();
        assert!(err.to_string().contains("teamId"));
    }

    #[test]
    fn valid_token_credentials() {
        let creds = Credentials::token(b"key".to_vec(), "KEY123", "TEAM456");
        assert!(creds.validate().is_ok());
    }

    #[test]
    fn debug_hides_key_material() {
        let creds = Credentials::token(b"super secret".to_vec(), "KEY", "TEAM");
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("super secret"));
    }
}

//! Provider authentication tokens.
//!
//! A [`TokenSource`] holds the live bearer token together with a
//! monotonically increasing generation counter. Requests record the
//! generation they observed; regeneration is a no-op unless the caller's
//! observed generation still matches, so any number of concurrent requests
//! discovering an expired or rejected token produce exactly one refresh.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, warn};

use crate::{ApnsError, Result};

/// Refresh threshold in seconds: 55 minutes, comfortably inside Apple's
/// one-hour token ceiling.
pub(crate) const TOKEN_MAX_AGE_SECS: i64 = 3300;

/// JWT claims for provider authentication.
#[derive(Debug, Serialize)]
struct ProviderClaims {
    /// Issuer (team identifier).
    iss: String,
    /// Issued at (unix seconds).
    iat: i64,
}

/// Signs a provider token for a given issue time.
///
/// The production implementation is [`Es256Minter`]; tests substitute a
/// deterministic minter.
pub trait Minter: Send + Sync {
    /// Mint a token with `iat` set to `issued_at`.
    fn mint(&self, issued_at: i64) -> Result<String>;
}

/// ES256 minter backed by an Apple-issued signing key.
pub struct Es256Minter {
    encoding_key: EncodingKey,
    key_id: String,
    team_id: String,
}

impl std::fmt::Debug for Es256Minter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Es256Minter")
            .field("key_id", &self.key_id)
            .field("team_id", &self.team_id)
            .finish()
    }
}

impl Es256Minter {
    /// Create a minter from a PEM-encoded EC key.
    pub fn new(key_pem: &[u8], key_id: impl Into<String>, team_id: impl Into<String>) -> Result<Self> {
        let encoding_key = EncodingKey::from_ec_pem(key_pem)
            .map_err(|e| ApnsError::Token(format!("invalid signing key: {e}")))?;
        Ok(Self {
            encoding_key,
            key_id: key_id.into(),
            team_id: team_id.into(),
        })
    }
}

impl Minter for Es256Minter {
    fn mint(&self, issued_at: i64) -> Result<String> {
        let mut header = Header::new(Algorithm::ES256);
        header.kid = Some(self.key_id.clone());
        let claims = ProviderClaims {
            iss: self.team_id.clone(),
            iat: issued_at,
        };
        Ok(jsonwebtoken::encode(&header, &claims, &self.encoding_key)?)
    }
}

struct TokenState {
    current: String,
    generation: u64,
    issued_at: i64,
}

/// The live provider token plus its generation counter.
pub struct TokenSource {
    minter: Box<dyn Minter>,
    state: RwLock<TokenState>,
}

impl TokenSource {
    /// Create a token source, minting the initial token.
    pub fn new(minter: Box<dyn Minter>) -> Result<Self> {
        let issued_at = unix_now();
        let current = minter.mint(issued_at)?;
        Ok(Self {
            minter,
            state: RwLock::new(TokenState {
                current,
                generation: 0,
                issued_at,
            }),
        })
    }

    /// The live token and the generation that produced it.
    pub fn current_token(&self) -> (String, u64) {
        let state = self.state.read();
        (state.current.clone(), state.generation)
    }

    /// Whether the token is at least `threshold_secs` old.
    pub fn is_expired(&self, threshold_secs: i64) -> bool {
        let state = self.state.read();
        unix_now() - state.issued_at >= threshold_secs
    }

    /// Mint a new token if `observed_generation` is still current.
    ///
    /// Concurrent callers that observed the same generation coalesce into
    /// a single regeneration; callers holding a stale generation return
    /// without work because a newer token already exists.
    pub fn regenerate(&self, observed_generation: u64) -> Result<()> {
        let mut state = self.state.write();
        if state.generation != observed_generation {
            debug!(
                observed = observed_generation,
                current = state.generation,
                "token already regenerated, skipping"
            );
            return Ok(());
        }
        let issued_at = unix_now();
        match self.minter.mint(issued_at) {
            Ok(token) => {
                state.current = token;
                state.generation += 1;
                state.issued_at = issued_at;
                debug!(generation = state.generation, "provider token regenerated");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "provider token regeneration failed");
                Err(e)
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, secs: i64) {
        self.state.write().issued_at -= secs;
    }
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    struct CountingMinter(Arc<AtomicU64>);

    impl Minter for CountingMinter {
        fn mint(&self, issued_at: i64) -> Result<String> {
            let n = self.0.fetch_add(1, Ordering::SeqCst);
            Ok(format!("token-{n}@{issued_at}"))
        }
    }

    fn source() -> (TokenSource, Arc<AtomicU64>) {
        let mints = Arc::new(AtomicU64::new(0));
        let source = TokenSource::new(Box::new(CountingMinter(mints.clone()))).unwrap();
        (source, mints)
    }

    #[test]
    fn initial_token_is_generation_zero() {
        let (source, mints) = source();
        let (token, generation) = source.current_token();
        assert!(token.starts_with("token-0"));
        assert_eq!(generation, 0);
        assert_eq!(mints.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fresh_token_is_not_expired() {
        let (source, _) = source();
        assert!(!source.is_expired(TOKEN_MAX_AGE_SECS));
        assert!(source.is_expired(0));
    }

    #[test]
    fn backdated_token_expires() {
        let (source, _) = source();
        source.backdate(TOKEN_MAX_AGE_SECS + 1);
        assert!(source.is_expired(TOKEN_MAX_AGE_SECS));
    }

    #[test]
    fn regenerate_increments_generation() {
        let (source, _) = source();
        source.regenerate(0).unwrap();
        let (token, generation) = source.current_token();
        assert!(token.starts_with("token-1"));
        assert_eq!(generation, 1);
    }

    #[test]
    fn stale_generation_is_a_noop() {
        let (source, mints) = source();
        source.regenerate(0).unwrap();
        // A second caller that also observed generation 0 must not mint.
        source.regenerate(0).unwrap();
        assert_eq!(source.current_token().1, 1);
        assert_eq!(mints.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_regeneration_coalesces() {
        let (source, mints) = source();
        let source = Arc::new(source);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let source = source.clone();
                std::thread::spawn(move || source.regenerate(0).unwrap())
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        // One initial mint plus exactly one regeneration for generation 0.
        assert_eq!(mints.load(Ordering::SeqCst), 2);
        assert_eq!(source.current_token().1, 1);
    }

    #[test]
    fn invalid_key_is_rejected() {
        let err = Es256Minter::new(b"not a pem key", "KEY", "TEAM").unwrap_err();
        assert!(matches!(err, ApnsError::Token(_)));
    }
}

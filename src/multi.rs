//! Round-robin load spreading over independent providers.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::join_all;

use crate::provider::{Notifications, Recipients};
use crate::{BatchResult, Notification, Provider, ProviderConfig, Result};

/// `client_count` independent [`Provider`]s behind one surface.
///
/// Each call is routed whole to a single provider by an atomic
/// round-robin counter; recipients within a batch are never split.
pub struct MultiProvider {
    providers: Vec<Provider>,
    next: AtomicUsize,
}

impl MultiProvider {
    /// Create `config.client_count` providers with the production
    /// transport.
    pub fn new(config: ProviderConfig) -> Result<Self> {
        config.validate()?;
        let providers = (0..config.client_count)
            .map(|_| Provider::new(config.clone()))
            .collect::<Result<Vec<_>>>()?;
        Self::from_providers(providers)
    }

    /// Wrap pre-built providers.
    pub fn from_providers(providers: Vec<Provider>) -> Result<Self> {
        if providers.is_empty() {
            return Err(crate::ApnsError::Config(
                "clientCount must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            providers,
            next: AtomicUsize::new(0),
        })
    }

    fn next_provider(&self) -> &Provider {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        &self.providers[index % self.providers.len()]
    }

    /// [`Provider::send`] on the next provider in rotation.
    pub async fn send(
        &self,
        notification: &Notification,
        recipients: impl Into<Recipients>,
    ) -> BatchResult {
        self.next_provider().send(notification, recipients).await
    }

    /// [`Provider::manage_channels`] on the next provider in rotation.
    pub async fn manage_channels(
        &self,
        notifications: impl Into<Notifications>,
        bundle_id: impl Into<String>,
        action: &str,
    ) -> Result<BatchResult> {
        self.next_provider()
            .manage_channels(notifications, bundle_id, action)
            .await
    }

    /// [`Provider::broadcast`] on the next provider in rotation.
    pub async fn broadcast(
        &self,
        notifications: impl Into<Notifications>,
        bundle_id: impl Into<String>,
    ) -> BatchResult {
        self.next_provider().broadcast(notifications, bundle_id).await
    }

    /// Shut down every provider, completing once all are done.
    pub async fn shutdown(&self) {
        join_all(self.providers.iter().map(Provider::shutdown)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{BoxedIo, Transport};
    use crate::Endpoint;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// Refuses every dial, counting attempts.
    struct RefusingTransport {
        dials: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Transport for RefusingTransport {
        async fn connect(&self, _endpoint: &Endpoint) -> crate::Result<BoxedIo> {
            self.dials.fetch_add(1, Ordering::SeqCst);
            Err(crate::ApnsError::Connect("connection refused".to_string()))
        }
    }

    fn counted_provider() -> (Provider, Arc<AtomicUsize>) {
        let dials = Arc::new(AtomicUsize::new(0));
        let transport = Arc::new(RefusingTransport {
            dials: dials.clone(),
        });
        let config = ProviderConfig {
            production: Some(false),
            ..ProviderConfig::default()
        };
        let provider =
            Provider::with_transports(config, transport.clone(), transport).unwrap();
        (provider, dials)
    }

    #[tokio::test]
    async fn calls_round_robin_across_providers() {
        let (first, first_dials) = counted_provider();
        let (second, second_dials) = counted_provider();
        let multi = MultiProvider::from_providers(vec![first, second]).unwrap();

        let notification = Notification::new().alert("T", "B");
        for _ in 0..3 {
            let result = multi.send(&notification, "abcd1234").await;
            assert_eq!(result.failed.len(), 1);
        }

        // Calls 1 and 3 land on the first provider, call 2 on the second.
        assert_eq!(first_dials.load(Ordering::SeqCst), 2);
        assert_eq!(second_dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transport_failure_reports_per_recipient() {
        let (provider, _) = counted_provider();
        let multi = MultiProvider::from_providers(vec![provider]).unwrap();
        let result = multi.send(&Notification::new(), vec!["a", "b"]).await;
        assert!(result.sent.is_empty());
        assert_eq!(result.failed.len(), 2);
        for failure in &result.failed {
            assert!(failure.status.is_none());
            assert!(failure
                .error
                .as_deref()
                .unwrap()
                .contains("connection refused"));
        }
    }

    #[tokio::test]
    async fn shutdown_fans_out() {
        let (first, _) = counted_provider();
        let (second, _) = counted_provider();
        let multi = MultiProvider::from_providers(vec![first, second]).unwrap();
        multi.shutdown().await;
        multi.shutdown().await;

        let result = multi.send(&Notification::new(), "abcd1234").await;
        assert_eq!(
            result.failed[0].error.as_deref(),
            Some("client session is either closed or destroyed")
        );
    }

    #[test]
    fn empty_provider_list_is_rejected() {
        assert!(MultiProvider::from_providers(Vec::new()).is_err());
    }
}

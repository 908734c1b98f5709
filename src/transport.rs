//! Connection establishment: TCP/proxy dialing plus TLS with ALPN `h2`.
//!
//! The [`Transport`] trait is the seam between the session layer and the
//! network. Production code uses [`TlsTransport`]; tests inject an
//! in-memory transport.

use std::io::Cursor;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::debug;

use crate::{proxy, ApnsError, Credentials, Endpoint, Proxy, Result};

/// Byte-stream requirements for an HTTP/2 session.
pub trait Io: AsyncRead + AsyncWrite + Send {}

impl<T: AsyncRead + AsyncWrite + Send> Io for T {}

/// A boxed duplex byte stream ready for the HTTP/2 handshake.
pub struct BoxedIo(Pin<Box<dyn Io>>);

impl BoxedIo {
    /// Box a concrete stream.
    pub fn new<T: Io + 'static>(io: T) -> Self {
        Self(Box::pin(io))
    }
}

impl AsyncRead for BoxedIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        self.0.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for BoxedIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        self.0.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.0.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.0.as_mut().poll_shutdown(cx)
    }
}

/// Establishes the byte stream a session runs over.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connect to `endpoint` and return a stream ready for `h2`.
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedIo>;
}

/// The production transport: direct or proxied TCP, then rustls with
/// ALPN `h2` and SNI set to the endpoint host.
pub struct TlsTransport {
    tls: Arc<ClientConfig>,
    proxy: Option<Proxy>,
}

impl TlsTransport {
    /// Build a transport from credential material.
    pub fn new(
        credentials: Option<&Credentials>,
        reject_unauthorized: bool,
        proxy: Option<Proxy>,
    ) -> Result<Self> {
        let tls = client_tls_config(credentials, reject_unauthorized)?;
        Ok(Self {
            tls: Arc::new(tls),
            proxy,
        })
    }
}

#[async_trait]
impl Transport for TlsTransport {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedIo> {
        let tcp = match &self.proxy {
            Some(proxy) => proxy::dial(proxy, endpoint).await?,
            None => {
                let stream = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
                    .await
                    .map_err(|e| {
                        ApnsError::Connect(format!("cannot connect to {endpoint}: {e}"))
                    })?;
                stream.set_nodelay(true)?;
                stream
            }
        };

        let server_name = ServerName::try_from(endpoint.host.clone())
            .map_err(|e| ApnsError::Tls(format!("invalid server name {:?}: {e}", endpoint.host)))?;
        let connector = TlsConnector::from(self.tls.clone());
        let stream = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ApnsError::Connect(format!("TLS handshake with {endpoint} failed: {e}")))?;

        debug!(endpoint = %endpoint, "TLS session established");
        Ok(BoxedIo::new(stream))
    }
}

/// Assemble the rustls client configuration for a credential set.
fn client_tls_config(
    credentials: Option<&Credentials>,
    reject_unauthorized: bool,
) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let mut client_auth: Option<(Vec<CertificateDer<'static>>, PrivateKeyDer<'static>)> = None;
    if let Some(Credentials::Tls {
        cert_pem,
        key_pem,
        pfx,
        ca_pem,
        ..
    }) = credentials
    {
        if pfx.is_some() {
            return Err(ApnsError::Config(
                "PKCS#12 bundles are not supported; provide PEM cert and key".to_string(),
            ));
        }
        if let Some(ca) = ca_pem {
            for cert in rustls_pemfile::certs(&mut Cursor::new(ca)) {
                roots
                    .add(cert.map_err(|e| ApnsError::Tls(format!("invalid CA certificate: {e}")))?)?;
            }
        }
        client_auth = Some((parse_cert_chain(cert_pem)?, parse_private_key(key_pem)?));
    }

    let builder = ClientConfig::builder();
    let mut config = if reject_unauthorized {
        let builder = builder.with_root_certificates(roots);
        match client_auth {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
            None => builder.with_no_client_auth(),
        }
    } else {
        let verifier = Arc::new(NoCertificateVerification::default());
        let builder = builder
            .dangerous()
            .with_custom_certificate_verifier(verifier);
        match client_auth {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
            None => builder.with_no_client_auth(),
        }
    };

    // APNs speaks HTTP/2 only.
    config.alpn_protocols = vec![b"h2".to_vec()];
    Ok(config)
}

fn parse_cert_chain(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>> {
    let certs: Vec<_> = rustls_pemfile::certs(&mut Cursor::new(pem))
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| ApnsError::Tls(format!("invalid client certificate: {e}")))?;
    if certs.is_empty() {
        return Err(ApnsError::Tls(
            "no certificates found in client certificate PEM".to_string(),
        ));
    }
    Ok(certs)
}

fn parse_private_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut Cursor::new(pem))
        .map_err(|e| ApnsError::Tls(format!("invalid client key: {e}")))?
        .ok_or_else(|| ApnsError::Tls("no private key found in client key PEM".to_string()))
}

/// Certificate verifier used when `reject_unauthorized` is disabled.
#[derive(Debug)]
struct NoCertificateVerification(rustls::crypto::CryptoProvider);

impl Default for NoCertificateVerification {
    fn default() -> Self {
        Self(rustls::crypto::CryptoProvider::get_default().map_or_else(
            || rustls::crypto::aws_lc_rs::default_provider(),
            |provider| provider.as_ref().clone(),
        ))
    }
}

impl rustls::client::danger::ServerCertVerifier for NoCertificateVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0
            .signature_verification_algorithms
            .supported_schemes()
    }
}

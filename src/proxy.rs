//! HTTP CONNECT tunneling.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::{ApnsError, Endpoint, Proxy, Result};

/// Establish a CONNECT tunnel through `proxy` to `target`.
///
/// The returned socket has consumed the proxy's response and is ready for
/// a TLS handshake with the target. Every failure surfaces as
/// [`ApnsError::Connect`] with a message containing
/// `cannot connect to proxy server`.
pub(crate) async fn dial(proxy: &Proxy, target: &Endpoint) -> Result<TcpStream> {
    let mut stream = TcpStream::connect((proxy.host.as_str(), proxy.port))
        .await
        .map_err(proxy_error)?;
    stream.set_nodelay(true).map_err(proxy_error)?;

    let request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nConnection: Keep-Alive\r\n\r\n",
        authority = target.authority(),
    );
    stream.write_all(request.as_bytes()).await.map_err(proxy_error)?;

    let response = read_connect_response(&mut stream).await?;
    let status_line = response.lines().next().unwrap_or_default();
    if !connect_succeeded(status_line) {
        return Err(ApnsError::Connect(format!(
            "cannot connect to proxy server: unexpected response \"{status_line}\""
        )));
    }

    debug!(proxy = %proxy.host, target = %target, "CONNECT tunnel established");
    Ok(stream)
}

/// Read until the end of the proxy's response headers.
async fn read_connect_response(stream: &mut TcpStream) -> Result<String> {
    let mut buf = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !buf.ends_with(b"\r\n\r\n") {
        if buf.len() > 8192 {
            return Err(ApnsError::Connect(
                "cannot connect to proxy server: response headers too large".to_string(),
            ));
        }
        let n = stream.read(&mut byte).await.map_err(proxy_error)?;
        if n == 0 {
            return Err(ApnsError::Connect(
                "cannot connect to proxy server: connection closed before response".to_string(),
            ));
        }
        buf.push(byte[0]);
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn connect_succeeded(status_line: &str) -> bool {
    // "HTTP/1.1 200 Connection established" and friends.
    status_line
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse::<u16>().ok())
        .is_some_and(|code| (200..300).contains(&code))
}

fn proxy_error(err: std::io::Error) -> ApnsError {
    ApnsError::Connect(format!("cannot connect to proxy server: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn status_line_parsing() {
        assert!(connect_succeeded("HTTP/1.1 200 Connection established"));
        assert!(connect_succeeded("HTTP/1.0 200 OK"));
        assert!(!connect_succeeded("HTTP/1.1 407 Proxy Authentication Required"));
        assert!(!connect_succeeded("garbage"));
    }

    #[tokio::test]
    async fn tunnel_through_accepting_proxy() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).into_owned();
            socket
                .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                .await
                .unwrap();
            // Echo one byte so the caller can confirm the tunnel is live.
            let n = socket.read(&mut buf).await.unwrap();
            socket.write_all(&buf[..n]).await.unwrap();
            request
        });

        let proxy = Proxy::new("127.0.0.1", addr.port());
        let target = Endpoint::new("api.sandbox.push.apple.com", 443);
        let mut stream = dial(&proxy, &target).await.unwrap();

        stream.write_all(b"x").await.unwrap();
        let mut byte = [0u8; 1];
        stream.read_exact(&mut byte).await.unwrap();
        assert_eq!(&byte, b"x");

        let request = server.await.unwrap();
        assert!(request.starts_with("CONNECT api.sandbox.push.apple.com:443 HTTP/1.1\r\n"));
        assert!(request.contains("Connection: Keep-Alive"));
    }

    #[tokio::test]
    async fn refusing_proxy_is_reported() {
        // Bind then drop to get a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = Proxy::new("127.0.0.1", addr.port());
        let target = Endpoint::new("api.push.apple.com", 443);
        let err = dial(&proxy, &target).await.unwrap_err();
        assert!(err.to_string().contains("cannot connect to proxy server"));
    }

    #[tokio::test]
    async fn rejecting_proxy_is_reported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 1024];
            let _ = socket.read(&mut buf).await.unwrap();
            socket
                .write_all(b"HTTP/1.1 403 Forbidden\r\n\r\n")
                .await
                .unwrap();
        });

        let proxy = Proxy::new("127.0.0.1", addr.port());
        let target = Endpoint::new("api.push.apple.com", 443);
        let err = dial(&proxy, &target).await.unwrap_err();
        assert!(err.to_string().contains("cannot connect to proxy server"));
        assert!(err.to_string().contains("403"));
    }
}

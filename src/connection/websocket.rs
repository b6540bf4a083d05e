//! [`Transport`] over a WebSocket (`ws://` or `wss://`).

use super::transport::{Channel, ChannelEvent, Transport};
use crate::backend::TokenProvider;
use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};
use tungstenite::client::IntoClientRequest;
use tungstenite::http::header::AUTHORIZATION;
use tungstenite::http::HeaderValue;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{HandshakeError, Message, WebSocket};
use url::Url;

pub struct WebSocketTransport {
    url: Url,
    connect_timeout: Duration,
    token: Option<Arc<dyn TokenProvider>>,
}

impl WebSocketTransport {
    pub fn new(url: &str, connect_timeout: Duration) -> Result<Self> {
        let url = Url::parse(url)?;
        match url.scheme() {
            "ws" | "wss" => {}
            other => return Err(SyncError::UnsupportedScheme(other.to_string())),
        }
        if url.host_str().is_none() {
            return Err(SyncError::InvalidConfig(format!("no host in {url}")));
        }
        Ok(Self {
            url,
            connect_timeout,
            token: None,
        })
    }

    /// None when the config has no push endpoint.
    pub fn from_config(config: &SyncConfig) -> Result<Option<Self>> {
        config
            .ws_url
            .as_deref()
            .map(|url| Self::new(url, config.connect_timeout()))
            .transpose()
    }

    /// The token is sent as a bearer header on the upgrade request and
    /// again as an `auth` frame once the channel is open.
    pub fn with_token_provider(mut self, provider: Arc<dyn TokenProvider>) -> Self {
        self.token = Some(provider);
        self
    }

    fn dial(&self) -> Result<TcpStream> {
        let host = self.url.host_str().unwrap_or_default();
        let port = self.url.port_or_known_default().unwrap_or(80);

        let mut last_error = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    trace!(%addr, error = %e, "Dial failed");
                    last_error = Some(e);
                }
            }
        }
        Err(match last_error {
            Some(e) => e.into(),
            None => SyncError::Transport(format!("{host} did not resolve")),
        })
    }
}

/// In-band authentication frame sent right after the handshake.
fn auth_frame(token: &str) -> Message {
    Message::Text(serde_json::json!({ "type": "auth", "token": token }).to_string())
}

impl Transport for WebSocketTransport {
    fn open(&self) -> Result<Box<dyn Channel>> {
        let stream = self.dial()?;
        stream.set_nodelay(true)?;
        // Bounds the handshake; reads are re-armed per `recv`.
        stream.set_read_timeout(Some(self.connect_timeout))?;
        stream.set_write_timeout(Some(self.connect_timeout))?;
        // Same socket; lets `recv` set timeouts underneath TLS.
        let tcp = stream.try_clone()?;

        let token = self.token.as_ref().and_then(|provider| provider.token());
        let mut request = self.url.as_str().into_client_request()?;
        if let Some(token) = &token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| SyncError::InvalidConfig(format!("bad token: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (mut socket, response) = tungstenite::client_tls_with_config(request, stream, None, None)
            .map_err(|e| match e {
                HandshakeError::Failure(e) => SyncError::from(e),
                HandshakeError::Interrupted(_) => {
                    SyncError::Transport("handshake timed out".to_string())
                }
            })?;
        debug!(url = %self.url, status = %response.status(), "WebSocket open");

        if let Some(token) = &token {
            socket.send(auth_frame(token))?;
            trace!("Sent auth frame");
        }

        Ok(Box::new(WebSocketChannel { socket, tcp }))
    }

    fn describe(&self) -> String {
        self.url.to_string()
    }
}

struct WebSocketChannel {
    socket: WebSocket<MaybeTlsStream<TcpStream>>,
    tcp: TcpStream,
}

impl Channel for WebSocketChannel {
    fn recv(&mut self, timeout: Duration) -> Result<ChannelEvent> {
        self.tcp
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        match self.socket.read() {
            Ok(Message::Text(text)) => Ok(ChannelEvent::Message(text)),
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => Ok(ChannelEvent::Message(text)),
                Err(_) => {
                    debug!("Ignoring non-UTF-8 binary frame");
                    Ok(ChannelEvent::Idle)
                }
            },
            Ok(Message::Close(frame)) => {
                debug!(?frame, "Server closed channel");
                Ok(ChannelEvent::Closed)
            }
            // Pings are answered by tungstenite on the next read.
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => Ok(ChannelEvent::Idle),
            Err(tungstenite::Error::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                Ok(ChannelEvent::Idle)
            }
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => {
                Ok(ChannelEvent::Closed)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn close(&mut self) {
        let _ = self.socket.close(None);
        let _ = self.socket.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_accepts_ws_and_wss() {
        for url in ["ws://localhost:5000/ws", "wss://api.example.com/ws"] {
            let transport = WebSocketTransport::new(url, Duration::from_secs(1)).unwrap();
            assert_eq!(transport.describe(), url);
        }
    }

    #[test]
    fn test_rejects_other_schemes() {
        for url in ["http://api.example.com/ws", "ftp://api.example.com/ws"] {
            let result = WebSocketTransport::new(url, Duration::from_secs(1));
            assert!(matches!(result, Err(SyncError::UnsupportedScheme(_))), "{url}");
        }
    }

    #[test]
    fn test_from_config_without_endpoint() {
        let transport = WebSocketTransport::from_config(&SyncConfig::default()).unwrap();
        assert!(transport.is_none());
    }

    #[test]
    fn test_refused_dial_is_error() {
        // Port 9 (discard) on loopback is closed on test machines.
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/ws", Duration::from_millis(200)).unwrap();
        assert!(transport.open().is_err());
    }

    /// Accept one client and return the first frame it sends.
    fn first_frame_server() -> (String, thread::JoinHandle<Message>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("ws://{}/ws", listener.local_addr().unwrap());
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
            let mut socket = tungstenite::accept(stream).unwrap();
            socket.read().unwrap()
        });
        (url, server)
    }

    #[test]
    fn test_open_sends_auth_frame_first() {
        let (url, server) = first_frame_server();
        let transport = WebSocketTransport::new(&url, Duration::from_secs(2))
            .unwrap()
            .with_token_provider(Arc::new(|| Some("t0k".to_string())));

        let mut channel = transport.open().unwrap();
        let frame = server.join().unwrap();
        channel.close();

        let Message::Text(text) = frame else {
            panic!("Expected text frame, got {:?}", frame);
        };
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, serde_json::json!({"type": "auth", "token": "t0k"}));
    }

    #[test]
    fn test_open_without_token_sends_nothing() {
        let (url, server) = first_frame_server();
        let transport = WebSocketTransport::new(&url, Duration::from_secs(2)).unwrap();

        let mut channel = transport.open().unwrap();
        channel.close();

        assert!(matches!(server.join().unwrap(), Message::Close(_)));
    }
}

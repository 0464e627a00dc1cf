//! WebSocket plumbing: URL construction and the shared send half

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;
use url::Url;

use crate::error::{RealtimeError, RealtimeResult};
use crate::models::Frame;

/// Path of the realtime endpoint on the gateway
pub const REALTIME_PATH: &str = "/realtime/v1/websocket";

pub(crate) type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

pub(crate) type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Build the socket URL from an HTTP(S) gateway endpoint
///
/// `https` becomes `wss` and `http` becomes `ws`; any existing path and
/// query on the endpoint are replaced.
pub fn build_socket_url(
    endpoint: &str,
    api_key: &str,
    access_token: &str,
    protocol_version: &str,
) -> RealtimeResult<Url> {
    let mut url = Url::parse(endpoint.trim())
        .map_err(|e| RealtimeError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => {
            return Err(RealtimeError::InvalidEndpoint(format!(
                "unsupported scheme {:?}",
                other
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| RealtimeError::InvalidEndpoint(format!("cannot use scheme {}", scheme)))?;

    url.set_path(REALTIME_PATH);
    url.set_query(None);
    url.set_fragment(None);
    url.query_pairs_mut()
        .append_pair("apikey", api_key)
        .append_pair("jwt", access_token)
        .append_pair("vsn", protocol_version);

    Ok(url)
}

/// Send half of one connection, shared by the join and the heartbeat
///
/// Every frame gets the next value of a per-connection reference counter.
/// The counter is advanced while the sink lock is held, so references go
/// out on the wire in increasing order.
#[derive(Clone)]
pub(crate) struct FrameSender {
    sink: Arc<Mutex<WsSink>>,
    refs: Arc<AtomicU64>,
}

impl FrameSender {
    fn new(sink: WsSink) -> Self {
        Self {
            sink: Arc::new(Mutex::new(sink)),
            refs: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Send a frame, returning the reference it was stamped with
    pub async fn send(&self, frame: Frame) -> RealtimeResult<u64> {
        let mut sink = self.sink.lock().await;
        let reference = self.refs.fetch_add(1, Ordering::SeqCst) + 1;
        let text = serde_json::to_string(&frame.with_reference(reference))?;
        sink.send(Message::Text(text)).await?;
        Ok(reference)
    }

    /// Send a close frame and flush the sink
    pub async fn close(&self) -> RealtimeResult<()> {
        let mut sink = self.sink.lock().await;
        sink.close().await?;
        Ok(())
    }
}

/// Open a socket and split it into the shared sender and the receive half
pub(crate) async fn open(url: &Url) -> RealtimeResult<(FrameSender, WsStream)> {
    debug!(host = ?url.host_str(), "Opening realtime socket");
    let (socket, _response) = connect_async(url.as_str()).await?;
    let (sink, stream) = socket.split();
    Ok((FrameSender::new(sink), stream))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_becomes_wss() {
        let url = build_socket_url("https://abc.example.co", "anon", "tok", "1.0.0").unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.host_str(), Some("abc.example.co"));
        assert_eq!(url.path(), "/realtime/v1/websocket");

        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("apikey".to_string(), "anon".to_string()),
                ("jwt".to_string(), "tok".to_string()),
                ("vsn".to_string(), "1.0.0".to_string()),
            ]
        );
    }

    #[test]
    fn test_http_becomes_ws_and_keeps_port() {
        let url =
            build_socket_url("http://127.0.0.1:54321/rest/v1?x=1", "k", "t", "1.0.0").unwrap();
        assert_eq!(url.scheme(), "ws");
        assert_eq!(url.port(), Some(54321));
        assert_eq!(url.path(), REALTIME_PATH);
        assert!(!url.as_str().contains("x=1"));
    }

    #[test]
    fn test_query_values_are_encoded() {
        let url = build_socket_url("https://abc.example.co", "a b", "x+y/z", "1.0.0").unwrap();
        assert!(url.as_str().contains("apikey=a+b"));
        assert!(url.as_str().contains("jwt=x%2By%2Fz"));
    }

    #[test]
    fn test_rejects_unsupported_scheme() {
        assert!(matches!(
            build_socket_url("ftp://abc.example.co", "k", "t", "1.0.0"),
            Err(RealtimeError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            build_socket_url("not a url", "k", "t", "1.0.0"),
            Err(RealtimeError::InvalidEndpoint(_))
        ));
    }
}

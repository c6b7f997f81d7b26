//! WebSocket feed transport (tokio-tungstenite)

use crate::error::{UpstreamError, UpstreamResult};
use crate::feed::{FeedSession, FeedTransport};
use crate::wire::{decode_tick, encode_disconnect, encode_request, FeedRequest};
use async_trait::async_trait;
use common::{FeedInstrument, Tick};
use config::FeedConfig;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

/// Connects to the broker's streaming endpoint.
pub struct WsFeedTransport {
    url: Url,
}

impl WsFeedTransport {
    pub fn new(config: &FeedConfig) -> UpstreamResult<Self> {
        Ok(Self {
            url: feed_url(config)?,
        })
    }
}

/// Feed URL with the auth query parameters the broker expects.
pub fn feed_url(config: &FeedConfig) -> UpstreamResult<Url> {
    let mut url = Url::parse(&config.url)
        .map_err(|e| UpstreamError::unavailable(format!("invalid feed url '{}': {}", config.url, e)))?;
    url.query_pairs_mut()
        .append_pair("version", "2")
        .append_pair("token", &config.access_token)
        .append_pair("clientId", &config.client_id)
        .append_pair("authType", "2");
    Ok(url)
}

#[async_trait]
impl FeedTransport for WsFeedTransport {
    async fn connect(&self, connection_id: usize) -> UpstreamResult<Box<dyn FeedSession>> {
        let (stream, _) = connect_async(self.url.as_str()).await?;
        info!(connection_id, "Feed WebSocket connected");
        Ok(Box::new(WsFeedSession {
            connection_id,
            stream,
        }))
    }
}

struct WsFeedSession {
    connection_id: usize,
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsFeedSession {
    async fn send(&mut self, request: FeedRequest, instruments: &[FeedInstrument]) -> UpstreamResult<()> {
        if instruments.is_empty() {
            return Ok(());
        }
        let text = encode_request(request, instruments)?;
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }
}

#[async_trait]
impl FeedSession for WsFeedSession {
    async fn subscribe(&mut self, instruments: &[FeedInstrument]) -> UpstreamResult<()> {
        self.send(FeedRequest::Subscribe, instruments).await
    }

    async fn unsubscribe(&mut self, instruments: &[FeedInstrument]) -> UpstreamResult<()> {
        self.send(FeedRequest::Unsubscribe, instruments).await
    }

    async fn next_tick(&mut self) -> Option<UpstreamResult<Tick>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };
            match message {
                Message::Text(text) => return Some(decode_tick(&text)),
                Message::Binary(bytes) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(decode_tick(&text)),
                    Err(_) => {
                        debug!(connection_id = self.connection_id, "Ignoring non-UTF8 frame");
                    }
                },
                Message::Close(frame) => {
                    warn!(connection_id = self.connection_id, ?frame, "Feed WebSocket closed by upstream");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.send(Message::Text(encode_disconnect())).await;
        let _ = self.stream.close(None).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_url_carries_credentials() {
        let config = FeedConfig {
            url: "wss://api-feed.example.com".to_string(),
            client_id: "1000".to_string(),
            access_token: "abc".to_string(),
            connect_timeout_ms: 1000,
        };
        let url = feed_url(&config).unwrap();
        assert_eq!(url.scheme(), "wss");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert!(pairs.contains(&("token".to_string(), "abc".to_string())));
        assert!(pairs.contains(&("clientId".to_string(), "1000".to_string())));
        assert!(pairs.contains(&("authType".to_string(), "2".to_string())));
    }

    #[test]
    fn test_invalid_url_rejected() {
        let config = FeedConfig {
            url: "not a url".to_string(),
            ..FeedConfig::default()
        };
        assert!(WsFeedTransport::new(&config).is_err());
    }
}

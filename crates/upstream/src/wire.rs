//! Feed request messages and tick decoding.
//!
//! Subscribe and unsubscribe are JSON requests carrying at most
//! `max_tokens_per_message` instruments each; larger batches are split by
//! [`chunk_batches`]. Ticks arrive already decoded as JSON objects.

use crate::error::{UpstreamError, UpstreamResult};
use common::{FeedInstrument, Tick};
use serde::Serialize;

/// Request code for a ticker-mode subscription.
pub const SUBSCRIBE_TICKER: u8 = 15;
/// Request code for dropping a ticker-mode subscription.
pub const UNSUBSCRIBE_TICKER: u8 = 16;
/// Request code the feed treats as a graceful disconnect.
pub const DISCONNECT: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedRequest {
    Subscribe,
    Unsubscribe,
}

impl FeedRequest {
    pub fn code(&self) -> u8 {
        match self {
            FeedRequest::Subscribe => SUBSCRIBE_TICKER,
            FeedRequest::Unsubscribe => UNSUBSCRIBE_TICKER,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireInstrument {
    exchange_segment: &'static str,
    security_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct WireRequest {
    request_code: u8,
    instrument_count: usize,
    instrument_list: Vec<WireInstrument>,
}

/// Split a batch into chunks of at most `max_per_message` instruments.
/// A zero limit is treated as one instrument per message.
pub fn chunk_batches(
    instruments: &[FeedInstrument],
    max_per_message: usize,
) -> impl Iterator<Item = &[FeedInstrument]> {
    instruments.chunks(max_per_message.max(1))
}

/// Encode one request message. The caller is responsible for chunking.
pub fn encode_request(request: FeedRequest, instruments: &[FeedInstrument]) -> UpstreamResult<String> {
    let message = WireRequest {
        request_code: request.code(),
        instrument_count: instruments.len(),
        instrument_list: instruments
            .iter()
            .map(|i| WireInstrument {
                exchange_segment: i.segment.as_str(),
                security_id: i.security_id.to_string(),
            })
            .collect(),
    };
    Ok(serde_json::to_string(&message)?)
}

/// Encode a batch as one message per chunk.
pub fn encode_batches(
    request: FeedRequest,
    instruments: &[FeedInstrument],
    max_per_message: usize,
) -> UpstreamResult<Vec<String>> {
    chunk_batches(instruments, max_per_message)
        .map(|chunk| encode_request(request, chunk))
        .collect()
}

pub fn encode_disconnect() -> String {
    serde_json::json!({ "RequestCode": DISCONNECT }).to_string()
}

/// Decode a tick message `{security_id, ltp, timestamp?}`.
pub fn decode_tick(text: &str) -> UpstreamResult<Tick> {
    let tick: Tick = serde_json::from_str(text)?;
    if !tick.ltp.is_finite() || tick.ltp < 0.0 {
        return Err(UpstreamError::Decode(format!(
            "invalid last traded price {} for {}",
            tick.ltp, tick.security_id
        )));
    }
    Ok(tick)
}

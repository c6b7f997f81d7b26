//! Upstream feed transport - traits and in-memory implementation

use crate::error::{UpstreamError, UpstreamResult};
use crate::wire::FeedRequest;
use async_trait::async_trait;
use common::{FeedInstrument, Tick};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Opens sessions to the upstream streaming feed.
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn connect(&self, connection_id: usize) -> UpstreamResult<Box<dyn FeedSession>>;
}

/// One live upstream connection.
///
/// `subscribe`/`unsubscribe` send a single request message; callers chunk
/// batches to the upstream per-message limit first.
#[async_trait]
pub trait FeedSession: Send {
    async fn subscribe(&mut self, instruments: &[FeedInstrument]) -> UpstreamResult<()>;

    async fn unsubscribe(&mut self, instruments: &[FeedInstrument]) -> UpstreamResult<()>;

    /// Next decoded tick. `None` means the connection is gone.
    async fn next_tick(&mut self) -> Option<UpstreamResult<Tick>>;

    async fn close(&mut self);
}

// ==================== Mock Implementation ====================

/// A request message a mock session received.
#[derive(Debug, Clone, PartialEq)]
pub struct SentRequest {
    pub connection_id: usize,
    pub request: FeedRequest,
    pub instruments: Vec<FeedInstrument>,
}

#[derive(Default)]
struct MockFeedState {
    failures_remaining: usize,
    connect_attempts: usize,
    sent: Vec<SentRequest>,
    tick_senders: HashMap<usize, mpsc::UnboundedSender<UpstreamResult<Tick>>>,
}

/// In-memory feed for tests: scripted connect failures, recorded requests
/// and injectable ticks.
#[derive(Clone, Default)]
pub struct MockFeedTransport {
    state: Arc<Mutex<MockFeedState>>,
}

impl MockFeedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `n` connect attempts.
    pub fn fail_next_connects(&self, n: usize) {
        self.state.lock().failures_remaining = n;
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn sent_requests(&self) -> Vec<SentRequest> {
        self.state.lock().sent.clone()
    }

    pub fn is_connected(&self, connection_id: usize) -> bool {
        self.state
            .lock()
            .tick_senders
            .get(&connection_id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Deliver a tick on a connection. Returns false if it is not connected.
    pub fn push_tick(&self, connection_id: usize, tick: Tick) -> bool {
        self.state
            .lock()
            .tick_senders
            .get(&connection_id)
            .map(|tx| tx.send(Ok(tick)).is_ok())
            .unwrap_or(false)
    }

    /// Simulate the upstream dropping a connection.
    pub fn drop_connection(&self, connection_id: usize) {
        self.state.lock().tick_senders.remove(&connection_id);
    }
}

#[async_trait]
impl FeedTransport for MockFeedTransport {
    async fn connect(&self, connection_id: usize) -> UpstreamResult<Box<dyn FeedSession>> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(UpstreamError::unavailable("mock connect refused"));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.tick_senders.insert(connection_id, tx);
        Ok(Box::new(MockFeedSession {
            connection_id,
            ticks: rx,
            state: self.state.clone(),
        }))
    }
}

struct MockFeedSession {
    connection_id: usize,
    ticks: mpsc::UnboundedReceiver<UpstreamResult<Tick>>,
    state: Arc<Mutex<MockFeedState>>,
}

impl MockFeedSession {
    fn record(&self, request: FeedRequest, instruments: &[FeedInstrument]) -> UpstreamResult<()> {
        let mut state = self.state.lock();
        if !state.tick_senders.contains_key(&self.connection_id) {
            return Err(UpstreamError::Closed);
        }
        state.sent.push(SentRequest {
            connection_id: self.connection_id,
            request,
            instruments: instruments.to_vec(),
        });
        Ok(())
    }
}

#[async_trait]
impl FeedSession for MockFeedSession {
    async fn subscribe(&mut self, instruments: &[FeedInstrument]) -> UpstreamResult<()> {
        self.record(FeedRequest::Subscribe, instruments)
    }

    async fn unsubscribe(&mut self, instruments: &[FeedInstrument]) -> UpstreamResult<()> {
        self.record(FeedRequest::Unsubscribe, instruments)
    }

    async fn next_tick(&mut self) -> Option<UpstreamResult<Tick>> {
        self.ticks.recv().await
    }

    async fn close(&mut self) {
        self.ticks.close();
        self.state.lock().tick_senders.remove(&self.connection_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{ExchangeSegment, SecurityId};

    #[tokio::test]
    async fn test_mock_feed_delivers_ticks_and_drops() {
        let transport = MockFeedTransport::new();
        transport.fail_next_connects(1);
        assert!(transport.connect(0).await.is_err());

        let mut session = transport.connect(0).await.unwrap();
        assert_eq!(transport.connect_attempts(), 2);

        let nifty = FeedInstrument::new(ExchangeSegment::Index, SecurityId(13));
        session.subscribe(&[nifty]).await.unwrap();
        assert_eq!(transport.sent_requests().len(), 1);

        assert!(transport.push_tick(0, Tick::new(SecurityId(13), 22000.0)));
        let tick = session.next_tick().await.unwrap().unwrap();
        assert_eq!(tick.ltp, 22000.0);

        transport.drop_connection(0);
        assert!(session.next_tick().await.is_none());
        assert!(session.subscribe(&[nifty]).await.is_err());
    }
}

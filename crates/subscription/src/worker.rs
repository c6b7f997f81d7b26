//! Connection worker - one task per upstream connection.
//!
//! Drives the slot's reconnect state machine, resubscribes the slot's
//! instruments after every (re)connect, forwards ledger commands and pushes
//! decoded ticks to a [`TickSink`] in receipt order.

use crate::manager::SubscriptionManager;
use crate::reconnect::{ConnectionState, ReconnectAction};
use crate::types::FeedCommand;
use common::{FeedInstrument, SharedClock, Tick};
use observability::FeedMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use upstream::{chunk_batches, FeedSession, FeedTransport, UpstreamError, UpstreamResult};

/// Receives decoded ticks from the connection workers.
pub trait TickSink: Send + Sync {
    fn on_tick(&self, connection_id: usize, tick: Tick);
}

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub max_tokens_per_message: usize,
    pub connect_timeout: Duration,
}

enum SessionEnd {
    Shutdown,
    Lost,
}

pub struct ConnectionWorker {
    connection_id: usize,
    manager: Arc<SubscriptionManager>,
    transport: Arc<dyn FeedTransport>,
    sink: Arc<dyn TickSink>,
    commands: mpsc::UnboundedReceiver<FeedCommand>,
    config: WorkerConfig,
    clock: SharedClock,
    cancel: CancellationToken,
    metrics: FeedMetrics,
}

impl ConnectionWorker {
    pub fn new(
        connection_id: usize,
        manager: Arc<SubscriptionManager>,
        transport: Arc<dyn FeedTransport>,
        sink: Arc<dyn TickSink>,
        config: WorkerConfig,
        clock: SharedClock,
        cancel: CancellationToken,
    ) -> crate::FeedResult<Self> {
        let commands = manager.attach_worker(connection_id)?;
        Ok(Self {
            connection_id,
            manager,
            transport,
            sink,
            commands,
            config,
            clock,
            cancel,
            metrics: FeedMetrics::new(),
        })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(mut self) {
        let id = self.connection_id;
        info!(connection_id = id, "Connection worker started");

        while !self.cancel.is_cancelled() {
            let action = match self.manager.next_action(id) {
                Ok(action) => action,
                Err(e) => {
                    error!(connection_id = id, error = %e, "Connection worker stopping");
                    return;
                }
            };

            match action {
                ReconnectAction::ConnectNow => {
                    if let SessionEnd::Shutdown = self.connect_and_stream().await {
                        break;
                    }
                }
                ReconnectAction::WaitUntil(at) => {
                    let wait = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
                    debug!(connection_id = id, ?wait, "Waiting before reconnect");
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                ReconnectAction::Idle => {
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                    }
                }
            }
        }

        info!(connection_id = id, "Connection worker stopped");
    }

    async fn connect_and_stream(&mut self) -> SessionEnd {
        let id = self.connection_id;
        match self.manager.connection_attempt(id) {
            Ok(true) => {}
            Ok(false) => return SessionEnd::Lost,
            Err(_) => return SessionEnd::Shutdown,
        }

        let connected = tokio::select! {
            _ = self.cancel.cancelled() => return SessionEnd::Shutdown,
            result = tokio::time::timeout(self.config.connect_timeout, self.transport.connect(id)) => result,
        };

        let mut session = match connected {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                self.record_failure(&e);
                return SessionEnd::Lost;
            }
            Err(_) => {
                self.record_failure(&UpstreamError::Timeout {
                    endpoint: "feed_connect",
                    after: self.config.connect_timeout,
                });
                return SessionEnd::Lost;
            }
        };

        // Queued commands predate the snapshot below, which already reflects them
        while self.commands.try_recv().is_ok() {}

        let instruments = match self.manager.connection_established(id) {
            Ok(instruments) => instruments,
            Err(_) => return SessionEnd::Shutdown,
        };
        let max = self.config.max_tokens_per_message;
        if let Err(e) = send_batched(session.as_mut(), &instruments, true, max).await {
            warn!(connection_id = id, error = %e, "Resubscribe failed");
            let _ = self.manager.connection_lost(id);
            return SessionEnd::Lost;
        }
        self.manager.rebalance();

        let end = self.stream(session.as_mut()).await;
        match end {
            SessionEnd::Shutdown => session.close().await,
            SessionEnd::Lost => {
                let _ = self.manager.connection_lost(id);
            }
        }
        end
    }

    fn record_failure(&self, error: &UpstreamError) {
        let id = self.connection_id;
        match self.manager.connection_failed(id) {
            Ok(ConnectionState::Cooldown) => {
                warn!(connection_id = id, error = %error, "Connect failed, cooling down")
            }
            Ok(_) => warn!(connection_id = id, error = %error, "Connect failed, backing off"),
            Err(e) => error!(connection_id = id, error = %e, "Connect failed on unknown slot"),
        }
    }

    async fn stream(&mut self, session: &mut dyn FeedSession) -> SessionEnd {
        let id = self.connection_id;
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Shutdown,
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    let max = self.config.max_tokens_per_message;
                    let result = match &command {
                        FeedCommand::Subscribe(instruments) => {
                            send_batched(session, instruments, true, max).await
                        }
                        FeedCommand::Unsubscribe(instruments) => {
                            send_batched(session, instruments, false, max).await
                        }
                    };
                    if let Err(e) = result {
                        warn!(connection_id = id, error = %e, "Feed command failed");
                        return SessionEnd::Lost;
                    }
                }
                tick = session.next_tick() => match tick {
                    Some(Ok(tick)) => {
                        self.metrics.record_tick(id);
                        self.sink.on_tick(id, tick);
                    }
                    Some(Err(UpstreamError::Decode(reason))) => {
                        debug!(connection_id = id, %reason, "Skipping undecodable tick");
                    }
                    Some(Err(e)) => {
                        warn!(connection_id = id, error = %e, "Feed read failed");
                        return SessionEnd::Lost;
                    }
                    None => return SessionEnd::Lost,
                },
            }
        }
    }
}

/// Send a batch as one request per chunk of at most `max_per_message`.
async fn send_batched(
    session: &mut dyn FeedSession,
    instruments: &[FeedInstrument],
    subscribe: bool,
    max_per_message: usize,
) -> UpstreamResult<()> {
    for chunk in chunk_batches(instruments, max_per_message) {
        if subscribe {
            session.subscribe(chunk).await?;
        } else {
            session.unsubscribe(chunk).await?;
        }
    }
    Ok(())
}

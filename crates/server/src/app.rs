//! Service assembly and lifecycle
//!
//! [`FeedServices`] wires the components from a [`MasterConfig`];
//! [`FeedApp`] runs them: populate the cache, subscribe the always-on
//! baseline, start one worker per upstream connection plus the
//! reconciliation and end-of-day tasks, then serve HTTP until shutdown.

use crate::api::{create_router, ApiState};
use crate::baseline::Baseline;
use crate::listener::ServerConfig;
use crate::error::{Result, ServerError};
use crate::http::HttpServer;
use crate::shutdown::ShutdownController;
use crate::tasks::spawn_reconcile_loop;
use crate::ticks::TickRouter;
use chrono::FixedOffset;
use common::{system_clock, SharedClock};
use config::{MasterConfig, WatchlistStoreKind};
use instrument::{AtmEngine, AtmEngineConfig, InstrumentRegistry};
use market_data::{CacheServiceConfig, ClosingPriceSource, CsvClosingPriceSource, OptionChainCacheService};
use std::sync::Arc;
use std::time::Duration;
use subscription::{ConnectionWorker, ManagerConfig, SubscriptionManager, TickSink, WorkerConfig};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use upstream::{
    BrokerRestClient, FeedTransport, HttpBrokerClient, MarketCalendar, RateLimitedClient,
    SessionCalendar, WsFeedTransport,
};
use watchlist::{
    EndOfDay, EodSchedule, InMemoryWatchlistStore, JsonFileWatchlistStore, WatchlistManager,
    WatchlistStore,
};

const DEFAULT_WATCHLIST_PATH: &str = "data/watchlists.json";
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// External edges of the service, injectable for tests.
pub struct FeedParts {
    pub registry: Arc<InstrumentRegistry>,
    pub rest: Arc<dyn BrokerRestClient>,
    pub closing: Arc<dyn ClosingPriceSource>,
    pub calendar: Arc<dyn MarketCalendar>,
    pub store: Arc<dyn WatchlistStore>,
    pub clock: SharedClock,
}

impl FeedParts {
    /// Production edges: CSV registry and closing prices, rate-limited
    /// broker REST client, configured session calendar, system clock.
    pub async fn from_config(config: &MasterConfig) -> Result<Self> {
        let registry = Arc::new(InstrumentRegistry::load_path(&config.instruments.master_path)?);

        let rest = RateLimitedClient::new(HttpBrokerClient::new(&config.broker_api)?, &config.broker_api);

        let closing: Arc<dyn ClosingPriceSource> = match &config.instruments.closing_prices_path {
            Some(path) => Arc::new(CsvClosingPriceSource::load_path(path, registry.clone())?),
            None => {
                warn!("No closing price table configured, closed-session chains are estimates only");
                Arc::new(CsvClosingPriceSource::empty(registry.clone()))
            }
        };

        let store: Arc<dyn WatchlistStore> = match config.watchlist.store {
            WatchlistStoreKind::Memory => Arc::new(InMemoryWatchlistStore::new()),
            WatchlistStoreKind::File => {
                let path = config
                    .watchlist
                    .path
                    .clone()
                    .unwrap_or_else(|| DEFAULT_WATCHLIST_PATH.to_string());
                Arc::new(JsonFileWatchlistStore::open(path).await?)
            }
        };

        Ok(Self {
            registry,
            rest: Arc::new(rest),
            closing,
            calendar: Arc::new(SessionCalendar::from_config(&config.sessions)),
            store,
            clock: system_clock(),
        })
    }
}

/// Every component of a running feed, shared by the tasks and handlers.
pub struct FeedServices {
    pub config: MasterConfig,
    pub registry: Arc<InstrumentRegistry>,
    pub atm: Arc<AtmEngine>,
    pub subscriptions: Arc<SubscriptionManager>,
    pub cache: Arc<OptionChainCacheService>,
    pub watchlists: Arc<WatchlistManager>,
    pub eod: Arc<EndOfDay>,
    pub baseline: Arc<Baseline>,
    pub calendar: Arc<dyn MarketCalendar>,
    pub clock: SharedClock,
}

impl FeedServices {
    pub async fn from_config(config: MasterConfig) -> Result<Self> {
        let parts = FeedParts::from_config(&config).await?;
        Ok(Self::assemble(config, parts))
    }

    pub fn assemble(config: MasterConfig, parts: FeedParts) -> Self {
        let FeedParts {
            registry,
            rest,
            closing,
            calendar,
            store,
            clock,
        } = parts;

        let atm = Arc::new(AtmEngine::new(
            registry.clone(),
            AtmEngineConfig::from(&config.atm),
            clock.clone(),
        ));
        let subscriptions = Arc::new(SubscriptionManager::new(
            ManagerConfig::from_config(&config.subscriptions, &config.connections),
            clock.clone(),
        ));
        let cache = Arc::new(OptionChainCacheService::new(
            registry.clone(),
            rest,
            closing,
            calendar.clone(),
            clock.clone(),
            CacheServiceConfig::from_config(&config.instruments, &config.cache),
        ));
        let watchlists = Arc::new(WatchlistManager::new(
            atm.clone(),
            subscriptions.clone(),
            store,
            clock.clone(),
        ));
        let eod = Arc::new(EndOfDay::new(subscriptions.clone(), watchlists.clone()));
        let baseline = Arc::new(Baseline::new(
            atm.clone(),
            subscriptions.clone(),
            cache.clone(),
            clock.clone(),
            config
                .instruments
                .tracked
                .iter()
                .filter(|t| t.always_on)
                .map(|t| t.symbol.clone()),
        ));

        Self {
            config,
            registry,
            atm,
            subscriptions,
            cache,
            watchlists,
            eod,
            baseline,
            calendar,
            clock,
        }
    }

    pub fn tick_router(&self) -> Arc<TickRouter> {
        Arc::new(TickRouter::new(
            self.atm.clone(),
            self.cache.clone(),
            self.baseline.clone(),
            self.clock.clone(),
        ))
    }

    pub fn api_state(&self) -> ApiState {
        ApiState::new(
            self.config.service.name.clone(),
            self.cache.clone(),
            self.subscriptions.clone(),
            self.watchlists.clone(),
        )
    }

    pub fn exchange_offset(&self) -> Result<FixedOffset> {
        let minutes = self.config.sessions.utc_offset_minutes;
        FixedOffset::east_opt(minutes * 60)
            .ok_or_else(|| ServerError::ConfigError(format!("invalid UTC offset: {} minutes", minutes)))
    }
}

pub struct FeedApp {
    services: Arc<FeedServices>,
    transport: Arc<dyn FeedTransport>,
    http: HttpServer,
}

impl FeedApp {
    pub fn new(services: FeedServices, transport: Arc<dyn FeedTransport>) -> Self {
        let http = HttpServer::new(
            ServerConfig::from_api(&services.config.api),
            create_router(services.api_state()),
        );
        Self {
            services: Arc::new(services),
            transport,
            http,
        }
    }

    /// Production wiring with the WebSocket feed transport.
    pub async fn from_config(config: MasterConfig) -> Result<Self> {
        let transport = Arc::new(WsFeedTransport::new(&config.feed)?);
        let services = FeedServices::from_config(config).await?;
        Ok(Self::new(services, transport))
    }

    pub fn services(&self) -> &Arc<FeedServices> {
        &self.services
    }

    pub fn http(&self) -> &HttpServer {
        &self.http
    }

    /// Run until `shutdown` is cancelled or the HTTP listener fails.
    ///
    /// An empty cache after populate aborts startup before any task runs.
    #[tracing::instrument(skip_all, fields(service = %self.services.config.service.name))]
    pub async fn run(&self, shutdown: &ShutdownController) -> Result<()> {
        let services = &self.services;
        let chains = services.cache.populate().await?;
        info!(chains, "Option chain cache ready");

        services.baseline.bootstrap();

        let mut tasks = self.spawn_workers(shutdown)?;
        tasks.push(spawn_reconcile_loop(
            services.cache.clone(),
            Duration::from_secs(services.config.cache.reconcile_interval_seconds.max(1)),
            shutdown.child_token(),
        ));
        if let Some(task) = self.spawn_end_of_day(shutdown)? {
            tasks.push(task);
        }

        let result = self.http.run(shutdown.child_token()).await;
        if let Err(e) = &result {
            error!(error = %e, "HTTP server stopped with error");
        }
        shutdown.shutdown();

        info!(tasks = tasks.len(), "Waiting for background tasks to stop...");
        match tokio::time::timeout(SHUTDOWN_TIMEOUT, futures::future::join_all(tasks)).await {
            Ok(results) => {
                let panicked = results.iter().filter(|r| r.is_err()).count();
                if panicked > 0 {
                    warn!(panicked, "Some background tasks panicked");
                }
            }
            Err(_) => warn!("Timed out waiting for background tasks"),
        }
        info!("Shutdown complete");
        result
    }

    fn spawn_workers(&self, shutdown: &ShutdownController) -> Result<Vec<JoinHandle<()>>> {
        let services = &self.services;
        let sink: Arc<dyn TickSink> = services.tick_router();
        let worker_config = WorkerConfig {
            max_tokens_per_message: services.config.connections.max_tokens_per_message,
            connect_timeout: services.config.feed.connect_timeout(),
        };

        let mut tasks = Vec::new();
        for id in 0..services.subscriptions.connection_count() {
            let worker = ConnectionWorker::new(
                id,
                services.subscriptions.clone(),
                self.transport.clone(),
                sink.clone(),
                worker_config.clone(),
                services.clock.clone(),
                shutdown.child_token(),
            )?;
            tasks.push(worker.spawn());
        }
        info!(connections = tasks.len(), "Connection workers started");
        Ok(tasks)
    }

    fn spawn_end_of_day(&self, shutdown: &ShutdownController) -> Result<Option<JoinHandle<()>>> {
        let services = &self.services;
        let eod_config = &services.config.end_of_day;
        if !eod_config.enabled {
            info!("End-of-day reset disabled");
            return Ok(None);
        }
        let schedule = EodSchedule::from_config(eod_config, services.exchange_offset()?)
            .ok_or_else(|| ServerError::ConfigError(format!("invalid end_of_day.time: {}", eod_config.time)))?;
        Ok(Some(services.eod.clone().spawn_scheduler(
            schedule,
            services.calendar.clone(),
            services.clock.clone(),
            shutdown.child_token(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{feed_parts, test_config};
    use assert_matches::assert_matches;
    use common::Tick;
    use instrument::testing::{nifty_expiry, NIFTY_SPOT_ID};
    use market_data::CacheError;
    use upstream::MockFeedTransport;

    #[tokio::test]
    async fn test_run_serves_until_shutdown() {
        let mut config = test_config(&["NIFTY"], &["NIFTY"]);
        config.connections.count = 1;
        config.connections.capacity_per_connection = 100;
        let (parts, _calendar, _broker) = feed_parts();
        let transport = Arc::new(MockFeedTransport::new());
        let app = Arc::new(FeedApp::new(FeedServices::assemble(config, parts), transport.clone()));
        let shutdown = ShutdownController::new();

        let handle = {
            let app = app.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { app.run(&shutdown).await })
        };

        for _ in 0..200 {
            if app.http().address().is_some() && transport.is_connected(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(app.http().address().is_some());
        assert!(app.services().subscriptions.is_active(NIFTY_SPOT_ID));

        // A spot tick through the feed reaches the cache
        assert!(transport.push_tick(0, Tick::new(NIFTY_SPOT_ID, 23_420.0)));
        let mut repriced = false;
        for _ in 0..200 {
            let chain = app.services().cache.get("NIFTY", nifty_expiry()).unwrap();
            if chain.underlying_ltp == Some(23_420.0) {
                repriced = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(repriced);

        shutdown.shutdown();
        let result = tokio::time::timeout(Duration::from_secs(10), handle).await;
        assert!(result.is_ok(), "App should shut down within timeout");
        assert!(result.unwrap().unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_empty_cache_aborts_startup() {
        // Nothing tracked: populate has nothing to load
        let config = test_config(&[], &[]);
        let (parts, _calendar, _broker) = feed_parts();
        let app = FeedApp::new(
            FeedServices::assemble(config, parts),
            Arc::new(MockFeedTransport::new()),
        );

        let err = app.run(&ShutdownController::new()).await.unwrap_err();
        assert_matches!(err, ServerError::Cache(CacheError::StartupIntegrity(_)));
        assert!(app.http().address().is_none());
    }

    #[test]
    fn test_exchange_offset_from_sessions() {
        let config = test_config(&["NIFTY"], &[]);
        let (parts, _calendar, _broker) = feed_parts();
        let services = FeedServices::assemble(config, parts);
        assert_eq!(services.exchange_offset().unwrap().local_minus_utc(), 330 * 60);
    }
}

//! Per-chain monitor loop.
//!
//! A [`ChainMonitor`] ties the subsystems together for one chain:
//!
//! 1. [`ChainMonitor::bootstrap`] builds the query client, resolves the
//!    window (config or slashing params) and the missed-blocks groups, and
//!    restores persisted blocks and the last snapshot.
//! 2. [`ChainMonitor::run`] starts the live block pipeline and then waits
//!    on two sources: the populate interval, which refreshes validators,
//!    backfills missing heights and reports; and live new-block notices,
//!    which resolve and store the announced block.
//!
//! Errors from one cycle are logged and counted; the loop never stops.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use thiserror::Error;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use crate::classifier::MissedBlocksGroups;
use crate::config::{ChainConfig, ConfigError};
use crate::live::{BlockPipeline, LiveMessage, NewBlock, PipelineConfig, PipelineObserver};
use crate::metrics::MonitorMetrics;
use crate::query::{
    HttpTransport, NoopObserver, QueryExecutor, QueryObserver, Transport, TransportError,
};
use crate::report::{DiffError, DiffOutcome, Report, Reporter, diff_pair};
use crate::rpc::{ChainClient, ClientError};
use crate::state::{SkipReason, SnapshotOutcome, StateError, StateManager};
use crate::storage::Database;
use crate::types::Height;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Diff(#[from] DiffError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl MonitorError {
    /// Whether trying again later can succeed.
    ///
    /// Configuration and group coverage errors stay wrong until an
    /// operator changes the config; everything else may be transient.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, MonitorError::Config(_))
    }
}

/// What one reporting pass did.
#[derive(Clone, Debug, PartialEq)]
pub enum ReportOutcome {
    /// No snapshot could be taken yet.
    Skipped(SkipReason),
    /// The first snapshot was committed; there is nothing to compare.
    NoOlderSnapshot,
    /// Nothing changed between the two snapshots.
    NoChanges,
    Sent { events: usize, failed_reporters: usize },
}

/// Heights fetched by one backfill pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BackfillSummary {
    pub fetched: usize,
    pub failed: usize,
}

pub struct ChainMonitor {
    config: ChainConfig,
    client: ChainClient,
    state: StateManager,
    groups: MissedBlocksGroups,
    reporters: Vec<Arc<dyn Reporter>>,
    metrics: Option<MonitorMetrics>,
}

impl ChainMonitor {
    /// Builds a monitor whose window is already known.
    pub fn new(
        config: ChainConfig,
        client: ChainClient,
        window: i64,
        database: Arc<dyn Database>,
        reporters: Vec<Arc<dyn Reporter>>,
        metrics: Option<MonitorMetrics>,
    ) -> Result<Self, MonitorError> {
        let groups = config.groups_for(window)?;
        let state = StateManager::new(
            config.name.clone(),
            window,
            config.store_blocks_for(window),
            database,
        );

        Ok(Self {
            config,
            client,
            state,
            groups,
            reporters,
            metrics,
        })
    }

    /// Connects to the chain, resolves the window and restores state.
    pub async fn bootstrap(
        config: ChainConfig,
        database: Arc<dyn Database>,
        reporters: Vec<Arc<dyn Reporter>>,
        metrics: Option<MonitorMetrics>,
    ) -> Result<Self, MonitorError> {
        let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(config.query_timeout())?);
        let observer: Arc<dyn QueryObserver> = match &metrics {
            Some(metrics) => Arc::new(metrics.clone()),
            None => Arc::new(NoopObserver),
        };

        let lcd = QueryExecutor::new(
            config.name.clone(),
            config.lcd_endpoints.clone(),
            transport.clone(),
            observer.clone(),
        );
        let rpc = QueryExecutor::new(
            config.name.clone(),
            config.rpc_endpoints.clone(),
            transport,
            observer,
        );
        let client = ChainClient::new(config.name.clone(), config.consensus_prefix(), lcd, rpc);

        Self::bootstrap_with_client(config, client, database, reporters, metrics).await
    }

    /// Resolves the window through `client` and restores state.
    pub async fn bootstrap_with_client(
        config: ChainConfig,
        client: ChainClient,
        database: Arc<dyn Database>,
        reporters: Vec<Arc<dyn Reporter>>,
        metrics: Option<MonitorMetrics>,
    ) -> Result<Self, MonitorError> {
        let window = match config.blocks_window {
            Some(window) => window,
            None => {
                let params = client.slashing_params().await?;
                info!(chain = %config.name, window = params.signed_blocks_window, "using window from slashing params");
                params.signed_blocks_window
            }
        };

        let monitor = Self::new(config, client, window, database, reporters, metrics)?;
        let restored = monitor.state.load()?;
        info!(
            chain = %monitor.chain(),
            window,
            store_blocks = monitor.state.store_blocks(),
            groups = monitor.groups.len(),
            restored,
            "monitor bootstrapped"
        );
        Ok(monitor)
    }

    pub fn chain(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn groups(&self) -> &MissedBlocksGroups {
        &self.groups
    }

    fn pipeline_observer(&self) -> Arc<dyn PipelineObserver> {
        match &self.metrics {
            Some(metrics) => Arc::new(metrics.clone()),
            None => Arc::new(NoopObserver),
        }
    }

    fn count_cycle_error(&self) {
        if let Some(metrics) = &self.metrics {
            metrics
                .cycle_errors_total
                .with_label_values(&[self.chain()])
                .inc();
        }
    }

    /// Runs the monitor until the task is dropped.
    pub async fn run(self: Arc<Self>) {
        let pipeline_config = PipelineConfig {
            endpoints: self.config.websocket_endpoints(),
            use_tls: self.config.use_tls,
            reconnect_backoff: self.config.reconnect_backoff(),
            reconnect_delay: self.config.reconnect_delay(),
            stale_timeout: self.config.stale_timeout(),
            connect_timeout: self.config.query_timeout(),
            dedup_capacity: self.config.dedup_capacity,
        };
        let (_pipeline, mut live) =
            BlockPipeline::start(self.chain(), pipeline_config, self.pipeline_observer());
        let mut live_open = true;

        let mut ticker = interval(self.config.populate_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_cycle().await {
                        error!(chain = %self.chain(), error = %e, "monitor cycle failed");
                        self.count_cycle_error();
                    }
                }
                message = live.recv(), if live_open => match message {
                    Some(message) => self.handle_live(message).await,
                    None => {
                        warn!(chain = %self.chain(), "live block pipeline stopped");
                        live_open = false;
                    }
                },
            }
        }
    }

    /// One populate cycle: validators, backfill, report.
    pub async fn run_cycle(&self) -> Result<ReportOutcome, MonitorError> {
        self.refresh_validators().await?;
        let summary = self.backfill().await?;
        if summary.failed > 0 {
            warn!(chain = %self.chain(), fetched = summary.fetched, failed = summary.failed, "backfill incomplete");
        }
        self.report().await
    }

    pub async fn refresh_validators(&self) -> Result<usize, MonitorError> {
        let validators = self.client.validators_with_signing_info().await?;
        let count = validators.len();
        self.state.set_validators(validators);
        debug!(chain = %self.chain(), count, "validators refreshed");
        Ok(count)
    }

    /// Fetches the chain head if it is new, then every missing height in
    /// the stored range with bounded concurrency.
    pub async fn backfill(&self) -> Result<BackfillSummary, MonitorError> {
        let mut summary = BackfillSummary::default();

        let head = self.client.latest_height().await?;
        if head > self.state.latest_height() && !self.state.has_block_at_height(head) {
            let block = self.client.block(head).await?;
            self.state.add_block(block)?;
            summary.fetched += 1;
        }

        let missing = self.state.missing_stored_blocks();
        if missing.is_empty() {
            return Ok(summary);
        }
        debug!(chain = %self.chain(), count = missing.len(), "backfilling blocks");

        let mut fetches = stream::iter(missing)
            .map(|height| async move { (height, self.client.block(height).await) })
            .buffer_unordered(self.config.backfill_concurrency.max(1));

        while let Some((height, result)) = fetches.next().await {
            match result {
                Ok(block) => {
                    self.state.add_block(block)?;
                    summary.fetched += 1;
                }
                Err(e) => {
                    summary.failed += 1;
                    warn!(chain = %self.chain(), height, error = %e, "failed to backfill block");
                }
            }
        }

        Ok(summary)
    }

    pub async fn handle_live(&self, message: LiveMessage) {
        match message {
            LiveMessage::Block(block) => {
                if let Err(e) = self.on_new_block(&block).await {
                    error!(chain = %self.chain(), height = block.height, error = %e, "failed to handle new block");
                    self.count_cycle_error();
                }
            }
            LiveMessage::Error { peer, message } => {
                warn!(chain = %self.chain(), %peer, %message, "live pipeline error");
            }
        }
    }

    /// Resolves and stores an announced block, reporting if it advanced
    /// the window.
    pub async fn on_new_block(&self, block: &NewBlock) -> Result<Option<ReportOutcome>, MonitorError> {
        if self.state.has_block_at_height(block.height) {
            return Ok(None);
        }

        let resolved = self.client.block(block.height).await?;
        if !self.state.add_block(resolved)? {
            return Ok(None);
        }

        self.report().await.map(Some)
    }

    /// Snapshots the current state, diffs it against the previous
    /// snapshot and sends any events to every enabled reporter.
    pub async fn report(&self) -> Result<ReportOutcome, MonitorError> {
        let snapshot = match self.state.take_snapshot() {
            SnapshotOutcome::Ready(snapshot) => snapshot,
            SnapshotOutcome::Skipped(reason) => {
                debug!(chain = %self.chain(), %reason, "skipping report");
                return Ok(ReportOutcome::Skipped(reason));
            }
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_snapshot(self.chain(), &snapshot);
        }
        let height: Height = snapshot.height;
        let pair = self.state.commit_snapshot(snapshot)?;

        let events = match diff_pair(&pair, &self.groups)? {
            DiffOutcome::NoOlderSnapshot => {
                debug!(chain = %self.chain(), height, "first snapshot, nothing to compare");
                return Ok(ReportOutcome::NoOlderSnapshot);
            }
            DiffOutcome::Events(events) if events.is_empty() => {
                debug!(chain = %self.chain(), height, "no changes");
                return Ok(ReportOutcome::NoChanges);
            }
            DiffOutcome::Events(events) => events,
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_events(self.chain(), &events);
        }

        let report = Report {
            chain: self.chain().to_string(),
            height,
            events,
        };
        info!(chain = %report.chain, height, events = report.events.len(), "sending report");

        let mut failed_reporters = 0;
        for reporter in self.reporters.iter().filter(|r| r.enabled()) {
            if let Err(e) = reporter.send(&report).await {
                failed_reporters += 1;
                error!(chain = %report.chain, reporter = reporter.name(), error = %e, "failed to send report");
            }
        }

        Ok(ReportOutcome::Sent {
            events: report.events.len(),
            failed_reporters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::EndpointOrder;
    use crate::query::fake::FakeTransport;
    use crate::report::{EventKind, ReporterError};
    use crate::rpc::responses::{ConsensusPubkey, consensus_addresses};
    use crate::storage::InMemoryDatabase;
    use async_trait::async_trait;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use chrono::{DateTime, Utc};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        reports: Mutex<Vec<Report>>,
    }

    #[async_trait]
    impl Reporter for RecordingReporter {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, report: &Report) -> Result<(), ReporterError> {
            self.reports.lock().unwrap().push(report.clone());
            Ok(())
        }
    }

    fn pubkey(byte: u8) -> String {
        STANDARD.encode([byte; 32])
    }

    fn hex_address(byte: u8) -> String {
        let key = ConsensusPubkey {
            kind: "/cosmos.crypto.ed25519.PubKey".to_string(),
            key: pubkey(byte),
        };
        consensus_addresses(&key, "cosmosvalcons")
            .unwrap()
            .0
            .as_str()
            .to_string()
    }

    fn lcd_validators(b_jailed: bool) -> String {
        let validator = |operator: &str, byte: u8, jailed: bool| {
            let status = if jailed {
                "BOND_STATUS_UNBONDING"
            } else {
                "BOND_STATUS_BONDED"
            };
            format!(
                r#"{{"operator_address":"{operator}",
                    "consensus_pubkey":{{"@type":"/cosmos.crypto.ed25519.PubKey","key":"{}"}},
                    "jailed":{jailed},"status":"{status}","tokens":"1",
                    "description":{{"moniker":"{operator}"}}}}"#,
                pubkey(byte)
            )
        };
        format!(
            r#"{{"validators":[{},{}]}}"#,
            validator("valoper-a", 1, false),
            validator("valoper-b", 2, b_jailed)
        )
    }

    fn commit(height: i64) -> String {
        format!(
            r#"{{"result":{{"signed_header":{{
                "header":{{"height":"{height}","time":"2024-05-01T12:00:00Z","proposer_address":"{a}"}},
                "commit":{{"signatures":[
                    {{"block_id_flag":2,"validator_address":"{a}"}},
                    {{"block_id_flag":2,"validator_address":"{b}"}}]}}}}}}}}"#,
            a = hex_address(1),
            b = hex_address(2),
        )
    }

    fn transport() -> Arc<FakeTransport> {
        let active_set = format!(
            r#"{{"result":{{"validators":[{{"address":"{}"}},{{"address":"{}"}}],"total":"2"}}}}"#,
            hex_address(1),
            hex_address(2)
        );
        Arc::new(
            FakeTransport::new()
                .route("staking/v1beta1/validators", &lcd_validators(false))
                .route(
                    "signing_infos/",
                    r#"{"val_signing_info":{"start_height":"1","missed_blocks_counter":"0","tombstoned":false}}"#,
                )
                .route("/status", r#"{"result":{"sync_info":{"latest_block_height":"3"}}}"#)
                .route("/commit?height=1", &commit(1))
                .route("/commit?height=2", &commit(2))
                .route("/commit?height=3", &commit(3))
                .route("/commit?height=4", &commit(4))
                .route("/validators?height=", &active_set),
        )
    }

    fn client(transport: Arc<FakeTransport>) -> ChainClient {
        let executor = |endpoint: &str| {
            QueryExecutor::new(
                "cosmos",
                vec![endpoint.to_string()],
                transport.clone(),
                Arc::new(NoopObserver),
            )
            .with_order(EndpointOrder::Sequential)
        };
        ChainClient::new(
            "cosmos",
            "cosmosvalcons",
            executor("http://lcd"),
            executor("http://rpc"),
        )
    }

    fn monitor(transport: Arc<FakeTransport>, reporter: Arc<RecordingReporter>) -> ChainMonitor {
        let client = client(transport);
        let config = ChainConfig {
            name: "cosmos".to_string(),
            lcd_endpoints: vec!["http://lcd".to_string()],
            rpc_endpoints: vec!["http://rpc".to_string()],
            blocks_window: Some(3),
            ..Default::default()
        };

        ChainMonitor::new(
            config,
            client,
            3,
            Arc::new(InMemoryDatabase::new()),
            vec![reporter as Arc<dyn Reporter>],
            None,
        )
        .expect("valid monitor")
    }

    #[tokio::test]
    async fn cycles_backfill_then_report_only_real_changes() {
        let transport = transport();
        let reporter = Arc::new(RecordingReporter::default());
        let monitor = monitor(transport.clone(), reporter.clone());

        assert_eq!(
            monitor.run_cycle().await.unwrap(),
            ReportOutcome::NoOlderSnapshot
        );
        assert_eq!(monitor.state().latest_height(), 3);
        assert_eq!(monitor.state().blocks_in_window(), 3);
        assert_eq!(monitor.state().validators().len(), 2);

        // Nothing changed: the empty diff never reaches the reporter.
        assert_eq!(monitor.run_cycle().await.unwrap(), ReportOutcome::NoChanges);
        assert!(reporter.reports.lock().unwrap().is_empty());

        transport.replace("staking/v1beta1/validators", &lcd_validators(true));
        assert_eq!(
            monitor.run_cycle().await.unwrap(),
            ReportOutcome::Sent {
                events: 2,
                failed_reporters: 0
            }
        );

        let reports = reporter.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        let kinds: Vec<EventKind> = reports[0].events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec![EventKind::Jailed, EventKind::Inactive]);
        assert!(
            reports[0]
                .events
                .iter()
                .all(|e| e.validator().operator_address == "valoper-b")
        );
    }

    #[tokio::test]
    async fn live_blocks_are_resolved_and_stored_once() {
        let transport = transport();
        let monitor = monitor(transport.clone(), Arc::new(RecordingReporter::default()));
        monitor.run_cycle().await.unwrap();

        let notice = NewBlock {
            height: 4,
            time: DateTime::<Utc>::UNIX_EPOCH,
            proposer: crate::types::ConsensusAddress::from_hex(&hex_address(1)),
        };

        let outcome = monitor.on_new_block(&notice).await.unwrap();
        assert_eq!(outcome, Some(ReportOutcome::NoChanges));
        assert_eq!(monitor.state().latest_height(), 4);
        assert!(!monitor.state().has_block_at_height(1));

        let commits_before = transport
            .calls()
            .iter()
            .filter(|url| url.contains("/commit?height=4"))
            .count();
        assert_eq!(monitor.on_new_block(&notice).await.unwrap(), None);
        let commits_after = transport
            .calls()
            .iter()
            .filter(|url| url.contains("/commit?height=4"))
            .count();
        assert_eq!(commits_before, commits_after);
    }

    #[tokio::test]
    async fn report_is_skipped_until_the_window_fills() {
        let monitor = monitor(transport(), Arc::new(RecordingReporter::default()));
        monitor.refresh_validators().await.unwrap();
        assert_eq!(
            monitor.report().await.unwrap(),
            ReportOutcome::Skipped(SkipReason::NotEnoughBlocks { have: 0, need: 3 })
        );
    }

    #[tokio::test]
    async fn groups_not_covering_the_chain_window_are_not_retryable() {
        let transport = Arc::new(FakeTransport::new().route(
            "/slashing/v1beta1/params",
            r#"{"params":{"signed_blocks_window":"100"}}"#,
        ));
        let narrow = MissedBlocksGroups::from_breakpoints(9, &[0.0, 100.0]);
        let config = ChainConfig {
            name: "cosmos".to_string(),
            lcd_endpoints: vec!["http://lcd".to_string()],
            rpc_endpoints: vec!["http://rpc".to_string()],
            missed_blocks_groups: Some(narrow),
            ..Default::default()
        };

        let err = ChainMonitor::bootstrap_with_client(
            config,
            client(transport),
            Arc::new(InMemoryDatabase::new()),
            Vec::new(),
            None,
        )
        .await
        .err()
        .expect("groups end at 9, window is 100");

        assert!(matches!(err, MonitorError::Config(ConfigError::Groups { .. })));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_endpoints_are_retryable() {
        let transport = Arc::new(FakeTransport::new().fail("/slashing/v1beta1/params"));
        let config = ChainConfig {
            name: "cosmos".to_string(),
            lcd_endpoints: vec!["http://lcd".to_string()],
            rpc_endpoints: vec!["http://rpc".to_string()],
            ..Default::default()
        };

        let err = ChainMonitor::bootstrap_with_client(
            config,
            client(transport),
            Arc::new(InMemoryDatabase::new()),
            Vec::new(),
            None,
        )
        .await
        .err()
        .expect("slashing params are unavailable");

        assert!(matches!(err, MonitorError::Client(_)));
        assert!(err.is_retryable());
    }
}

//! Broadcast Engine
//!
//! Drives the periodic tick cycle: every interval, each catalog instrument
//! gets a new value from the rate source, the value is published to the
//! rate board, and one serialized tick frame is pushed to exactly the
//! connections subscribed to that instrument.
//!
//! A failed delivery only affects its own connection. A failed cycle is
//! logged and the loop resumes on the next interval; the loop only ends when
//! its cancellation token fires.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{DeliveryError, DeliveryPort, RateSource, RateSourceError};
use crate::domain::instrument::{InstrumentCatalog, RateBoard};
use crate::domain::streaming::{RatesPayload, Tick, encode};
use crate::domain::subscription::SharedRegistry;
use crate::infrastructure::metrics;

/// Default time between broadcast cycles.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(5);

// =============================================================================
// Configuration
// =============================================================================

/// Broadcast engine configuration.
#[derive(Debug, Clone, Copy)]
pub struct BroadcastEngineConfig {
    /// Time between cycles.
    pub interval: Duration,
}

impl Default for BroadcastEngineConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_TICK_INTERVAL,
        }
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Outcome of one successful cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Instruments repriced.
    pub instruments: usize,
    /// Frames queued to connections.
    pub deliveries: usize,
    /// Frames that could not be queued.
    pub failures: usize,
}

/// Running engine counters, shared with the health server.
#[derive(Debug, Default)]
pub struct EngineStats {
    cycles_completed: AtomicU64,
    cycles_failed: AtomicU64,
    deliveries: AtomicU64,
    delivery_failures: AtomicU64,
    last_success_ms: AtomicI64,
    last_cycle_failed: AtomicBool,
}

impl EngineStats {
    fn record_success(&self, report: &CycleReport) {
        self.cycles_completed.fetch_add(1, Ordering::Relaxed);
        self.deliveries
            .fetch_add(report.deliveries as u64, Ordering::Relaxed);
        self.delivery_failures
            .fetch_add(report.failures as u64, Ordering::Relaxed);
        self.last_success_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
        self.last_cycle_failed.store(false, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
        self.last_cycle_failed.store(true, Ordering::Relaxed);
    }

    /// Cycles that completed.
    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.cycles_completed.load(Ordering::Relaxed)
    }

    /// Cycles that were aborted by an error.
    #[must_use]
    pub fn cycles_failed(&self) -> u64 {
        self.cycles_failed.load(Ordering::Relaxed)
    }

    /// Frames queued across all completed cycles.
    #[must_use]
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Failed deliveries across all completed cycles.
    #[must_use]
    pub fn delivery_failures(&self) -> u64 {
        self.delivery_failures.load(Ordering::Relaxed)
    }

    /// Epoch milliseconds of the last completed cycle, if any.
    #[must_use]
    pub fn last_success_ms(&self) -> Option<i64> {
        match self.last_success_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    /// Whether the most recent cycle failed.
    #[must_use]
    pub fn last_cycle_failed(&self) -> bool {
        self.last_cycle_failed.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Broadcast Engine
// =============================================================================

/// Periodic tick generator and fan-out driver.
pub struct BroadcastEngine {
    config: BroadcastEngineConfig,
    catalog: Arc<InstrumentCatalog>,
    registry: SharedRegistry,
    board: Arc<RateBoard>,
    source: Arc<dyn RateSource>,
    delivery: Arc<dyn DeliveryPort>,
    stats: Arc<EngineStats>,
}

impl BroadcastEngine {
    /// Create a new engine.
    #[must_use]
    pub fn new(
        config: BroadcastEngineConfig,
        registry: SharedRegistry,
        board: Arc<RateBoard>,
        source: Arc<dyn RateSource>,
        delivery: Arc<dyn DeliveryPort>,
    ) -> Self {
        Self {
            config,
            catalog: Arc::clone(registry.catalog()),
            registry,
            board,
            source,
            delivery,
            stats: Arc::new(EngineStats::default()),
        }
    }

    /// Shared engine statistics.
    #[must_use]
    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Run cycles every interval until `cancel` fires.
    ///
    /// The first cycle runs one interval after start.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(
            tokio::time::Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            interval_ms = u64::try_from(self.config.interval.as_millis()).unwrap_or(u64::MAX),
            instruments = self.catalog.len(),
            "Broadcast engine started"
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                result = self.run_cycle() => result,
            };

            match result {
                Ok(report) => {
                    tracing::debug!(
                        instruments = report.instruments,
                        deliveries = report.deliveries,
                        failures = report.failures,
                        "Broadcast cycle complete"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Broadcast cycle failed, retrying next interval");
                }
            }
        }

        tracing::info!("Broadcast engine stopped");
    }

    /// Run a single cycle over every catalog instrument.
    ///
    /// # Errors
    ///
    /// Returns `CycleError` if the rate source fails or a tick cannot be
    /// encoded. Per-connection delivery failures are counted, not returned.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let started = Instant::now();
        let result = self.tick_all().await;

        match &result {
            Ok(report) => {
                self.stats.record_success(report);
                metrics::record_cycle(report);
            }
            Err(_) => {
                self.stats.record_failure();
                metrics::record_cycle_failure();
            }
        }
        metrics::record_cycle_duration(started.elapsed());

        result
    }

    async fn tick_all(&self) -> Result<CycleReport, CycleError> {
        let mut report = CycleReport::default();

        for instrument in self.catalog.iter() {
            let id = &instrument.id;

            let next = self.source.next_value(id, self.board.current(id)).await?;
            self.board.publish(id, next);

            // One frame per instrument per cycle, shared by every recipient
            let tick = Tick::now(id.clone(), next);
            let frame = encode(&RatesPayload::from_tick(&self.catalog, &tick))
                .map_err(|e| CycleError::Encode(e.to_string()))?;
            report.instruments += 1;

            for connection in self.registry.subscribers(id) {
                match self.delivery.deliver(connection, Arc::clone(&frame)) {
                    Ok(()) => report.deliveries += 1,
                    Err(e @ DeliveryError::Closed(_)) => {
                        report.failures += 1;
                        tracing::debug!(instrument = %id, error = %e, "Tick not delivered");
                    }
                    Err(e @ DeliveryError::Backpressure(_)) => {
                        report.failures += 1;
                        tracing::warn!(instrument = %id, error = %e, "Tick dropped for slow consumer");
                    }
                }
            }
        }

        Ok(report)
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Failure of an entire broadcast cycle.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CycleError {
    /// The rate source could not produce a value.
    #[error(transparent)]
    RateSource(#[from] RateSourceError),

    /// A tick could not be serialized.
    #[error("failed to encode tick: {0}")]
    Encode(String),
}

// =============================================================================
// Tests
// =============================================================================

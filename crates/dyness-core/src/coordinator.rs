// ── Acquisition coordinator ──
//
// Drives authenticate → fetch → normalize → publish on a timer, owns the
// latest snapshot, and tracks freshness. One cycle runs at a time; every
// failure path lands back in `Idle` waiting for the next tick.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use dyness_api::{BmsApi, DynessClient, TransportConfig};
use serde::Serialize;
use strum::{AsRefStr, Display};
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::Authenticator;
use crate::config::CoordinatorConfig;
use crate::device::DeviceInfo;
use crate::diagnostics::{Diagnostics, ErrorRecord};
use crate::error::{AuthError, CoreError, CycleError, TransportError};
use crate::normalize::normalize;
use crate::snapshot::{MetricValue, SensorKey, Snapshot};
use crate::staleness::{CommunicationStatus, StalenessState};
use crate::stream::SnapshotStream;
use crate::transport::RateLimitedTransport;

const SNAPSHOT_CHANNEL_SIZE: usize = 16;

// ── CyclePhase ───────────────────────────────────────────────────

/// Where the current cycle is, observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CyclePhase {
    Idle,
    Authenticating,
    Fetching,
    Normalizing,
    Published,
    Failed,
}

// ── Reading ──────────────────────────────────────────────────────

/// The latest snapshot together with its freshness, read in one go.
#[derive(Debug, Clone)]
pub struct Reading {
    pub snapshot: Option<Arc<Snapshot>>,
    pub communication_status: CommunicationStatus,
    /// A snapshot exists and is inside the staleness window.
    pub available: bool,
}

impl Reading {
    pub fn value(&self, key: SensorKey) -> MetricValue {
        match &self.snapshot {
            Some(snapshot) => snapshot.value(key, self.communication_status),
            None if key == SensorKey::CommunicationStatus => {
                MetricValue::Text(self.communication_status.to_string())
            }
            None => MetricValue::Missing,
        }
    }
}

// ── Coordinator ──────────────────────────────────────────────────

/// Entry point for consumers. Cheaply cloneable via `Arc`.
pub struct Coordinator<A = DynessClient> {
    inner: Arc<CoordinatorInner<A>>,
}

impl<A> Clone for Coordinator<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct CoordinatorInner<A> {
    config: CoordinatorConfig,
    transport: Arc<RateLimitedTransport<A>>,
    /// Held for a whole cycle, so cycles never overlap.
    authenticator: Mutex<Authenticator<A>>,
    latest: ArcSwapOption<Snapshot>,
    snapshot_tx: broadcast::Sender<Arc<Snapshot>>,
    staleness: watch::Sender<StalenessState>,
    diagnostics: watch::Sender<Diagnostics>,
    phase: watch::Sender<CyclePhase>,
    device_info: watch::Sender<DeviceInfo>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Coordinator<DynessClient> {
    /// Validate the configuration and build a coordinator over the HTTP client.
    pub fn from_config(config: CoordinatorConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let transport = TransportConfig {
            tls: config.tls.clone(),
            timeout: config.timeout,
        };
        let client = DynessClient::new(config.region, &transport)?;
        Ok(Self::new(config, client))
    }
}

impl<A: BmsApi> Coordinator<A> {
    /// Create a coordinator. Does not poll until [`start()`](Self::start)
    /// or [`first_refresh()`](Self::first_refresh).
    pub fn new(config: CoordinatorConfig, api: A) -> Self {
        let transport = Arc::new(RateLimitedTransport::new(Arc::new(api), config.request_floor));
        let authenticator = Authenticator::new(
            Arc::clone(&transport),
            config.credentials.clone(),
            config.serials.clone(),
            config.session_lifetime,
            config.session_margin,
        );
        let (snapshot_tx, _) = broadcast::channel(SNAPSHOT_CHANNEL_SIZE);
        let (staleness, _) = watch::channel(StalenessState::default());
        let (diagnostics, _) = watch::channel(Diagnostics::default());
        let (phase, _) = watch::channel(CyclePhase::Idle);
        let (device_info, _) = watch::channel(DeviceInfo::new(&config.serials));

        Self {
            inner: Arc::new(CoordinatorInner {
                config,
                transport,
                authenticator: Mutex::new(authenticator),
                latest: ArcSwapOption::empty(),
                snapshot_tx,
                staleness,
                diagnostics,
                phase,
                device_info,
                cancel: CancellationToken::new(),
                task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Spawn the periodic loop. The first cycle runs immediately.
    pub async fn start(&self) {
        if self.inner.cancel.is_cancelled() {
            warn!("coordinator already shut down, not starting");
            return;
        }
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            debug!("poll loop already running");
            return;
        }
        let coordinator = self.clone();
        let cancel = self.inner.cancel.clone();
        *task = Some(tokio::spawn(poll_task(coordinator, cancel)));
        info!(
            interval_secs = self.inner.config.poll_interval.as_secs(),
            bms = %self.inner.config.serials.bms,
            "coordinator started"
        );
    }

    /// Run one cycle and fail loudly: the setup-time "cannot connect" check.
    pub async fn first_refresh(&self) -> Result<Arc<Snapshot>, CoreError> {
        self.refresh().await.map_err(CoreError::from)
    }

    /// Run one full cycle now. Waits for any cycle already in progress.
    ///
    /// Returns the snapshot that is published once the cycle ends, which
    /// is the previous one if the device timestamp went backwards.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, CycleError> {
        let cancel = self.inner.cancel.clone();
        let result = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(CycleError::ShutDown),
            result = self.run_cycle() => result,
        };
        self.set_phase(CyclePhase::Idle);
        result
    }

    /// Stop the loop, cancel any in-flight cycle without publishing, and
    /// wait for the task to finish.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        let handle = self.inner.task.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "poll task ended abnormally");
            }
        }
        self.set_phase(CyclePhase::Idle);
        info!("coordinator stopped");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    // ── Readers ──────────────────────────────────────────────────

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner.latest.load_full()
    }

    /// Derived on every call from the age of the last success.
    pub fn communication_status(&self) -> CommunicationStatus {
        self.inner
            .staleness
            .borrow()
            .communication_status(Instant::now(), self.inner.config.staleness_window)
    }

    pub fn reading(&self) -> Reading {
        let snapshot = self.latest();
        let communication_status = self.communication_status();
        Reading {
            available: snapshot.is_some() && communication_status == CommunicationStatus::Online,
            snapshot,
            communication_status,
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        self.inner.diagnostics.borrow().clone()
    }

    pub fn diagnostics_stream(&self) -> watch::Receiver<Diagnostics> {
        self.inner.diagnostics.subscribe()
    }

    pub fn device_info(&self) -> DeviceInfo {
        self.inner.device_info.borrow().clone()
    }

    pub fn phase(&self) -> CyclePhase {
        *self.inner.phase.borrow()
    }

    pub fn phase_stream(&self) -> watch::Receiver<CyclePhase> {
        self.inner.phase.subscribe()
    }

    /// One message per publish, starting after this call.
    pub fn subscribe(&self) -> SnapshotStream {
        let receiver = self.inner.snapshot_tx.subscribe();
        SnapshotStream::new(self.latest(), receiver)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.staleness.borrow().consecutive_failures
    }

    /// Delay the loop will wait before the next cycle.
    pub fn next_delay(&self) -> Duration {
        self.inner.config.backoff_delay(self.consecutive_failures())
    }

    // ── Cycle ────────────────────────────────────────────────────

    async fn run_cycle(&self) -> Result<Arc<Snapshot>, CycleError> {
        let mut auth = self.inner.authenticator.lock().await;
        self.begin_attempt();

        self.set_phase(CyclePhase::Authenticating);
        let session = auth
            .obtain_valid_session()
            .await
            .map_err(|e| self.fail(e.into()))?;
        if let Some(detail) = auth.take_device_detail() {
            self.inner
                .device_info
                .send_modify(|info| info.update_from_detail(&detail));
        }
        self.inner.diagnostics.send_if_modified(|d| {
            let issued = Some(session.issued_wall());
            let changed = d.cannot_connect || d.session_issued_at != issued;
            d.cannot_connect = false;
            d.session_issued_at = issued;
            changed
        });

        self.set_phase(CyclePhase::Fetching);
        let raw = match self
            .inner
            .transport
            .fetch_telemetry(&session, &self.inner.config.serials)
            .await
        {
            Ok(raw) => raw,
            Err(TransportError::Unauthorized { message }) => {
                auth.invalidate();
                return Err(self.fail(AuthError::Expired { message }.into()));
            }
            Err(e) => return Err(self.fail(e.into())),
        };

        self.set_phase(CyclePhase::Normalizing);
        self.inner.device_info.send_modify(|info| {
            info.update_from_detail(&raw.device);
            info.update_from_points(&raw.bms);
        });
        let snapshot = normalize(&raw).map_err(|e| self.fail(e.into()))?;
        Ok(self.publish(snapshot))
    }

    fn begin_attempt(&self) {
        let now = Instant::now();
        let wall = Utc::now();
        self.inner
            .staleness
            .send_modify(|s| s.record_attempt(now, wall));
        self.inner.diagnostics.send_modify(|d| {
            d.last_attempt_at = Some(wall);
            d.cycles += 1;
        });
    }

    /// Record a successful fetch and swap in the new snapshot.
    ///
    /// A snapshot older than the published one still proves the link is
    /// up, but it is not published.
    fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let now = Instant::now();
        let wall = Utc::now();
        let recovered_from = self.inner.staleness.borrow().consecutive_failures;
        self.inner
            .staleness
            .send_modify(|s| s.record_success(now, wall));
        if recovered_from > 0 {
            info!(failures = recovered_from, "acquisition recovered");
        }

        if let Some(previous) = self.latest() {
            if snapshot.last_data_update < previous.last_data_update {
                warn!(
                    published = %previous.last_data_update,
                    received = %snapshot.last_data_update,
                    "device timestamp went backwards, keeping published snapshot"
                );
                self.inner.diagnostics.send_modify(|d| {
                    d.consecutive_failures = 0;
                    d.last_success_at = Some(wall);
                    d.last_regressed_update = Some(snapshot.last_data_update);
                });
                return previous;
            }
        }

        let snapshot = Arc::new(snapshot);
        self.inner.latest.store(Some(Arc::clone(&snapshot)));
        // Err only means nobody is subscribed right now.
        let _ = self.inner.snapshot_tx.send(Arc::clone(&snapshot));

        self.inner.diagnostics.send_modify(|d| {
            d.consecutive_failures = 0;
            d.last_success_at = Some(wall);
            d.last_published_at = Some(wall);
            d.published += 1;
        });
        self.set_phase(CyclePhase::Published);
        info!(
            soc = snapshot.soc_pct,
            power_w = snapshot.battery_power_w,
            status = %snapshot.battery_status,
            alarm = %snapshot.alarm_status,
            updated = %snapshot.last_data_update,
            "snapshot published"
        );
        if snapshot.cell_imbalance() {
            warn!(
                spread_v = snapshot.cell_voltage_spread_v,
                "cell voltage spread above imbalance threshold"
            );
        }
        snapshot
    }

    /// Book-keep a failed cycle and hand the error back.
    fn fail(&self, err: CycleError) -> CycleError {
        let wall = Utc::now();
        let rejected = err.is_rejection();
        if !rejected {
            self.inner.staleness.send_modify(StalenessState::record_failure);
        }
        let failures = self.consecutive_failures();

        self.inner.diagnostics.send_modify(|d| {
            d.consecutive_failures = failures;
            d.last_error = Some(ErrorRecord::new(&err, wall));
            if rejected {
                d.cannot_connect = true;
            }
        });
        self.set_phase(CyclePhase::Failed);

        if rejected {
            warn!(error = %err, "credentials rejected, check api_id and api_secret");
        } else {
            warn!(error = %err, kind = err.kind(), class = %err.class(), failures, "acquisition cycle failed");
        }
        err
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.inner.phase.send_if_modified(|current| {
            let changed = *current != phase;
            *current = phase;
            changed
        });
        debug!(%phase, "cycle phase");
    }
}

// ── Background task ──────────────────────────────────────────────

/// Run cycles until cancelled, sleeping the backoff-adjusted interval between them.
async fn poll_task<A: BmsApi>(coordinator: Coordinator<A>, cancel: CancellationToken) {
    loop {
        if let Err(e) = coordinator.refresh().await {
            debug!(error = %e, "cycle ended without a publish");
        }
        if cancel.is_cancelled() {
            break;
        }

        let delay = coordinator.next_delay();
        debug!(delay_secs = delay.as_secs(), "next cycle scheduled");
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(delay) => {}
        }
    }
    debug!("poll loop exited");
}

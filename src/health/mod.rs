/// Node health probing and the background health monitor
pub mod http;
pub mod tcp;

use crate::config::HealthConfig;
use crate::core::NodePool;
use crate::error::CoreResult;
use async_trait::async_trait;
use futures::FutureExt;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

pub use http::HttpHealthChecker;
pub use tcp::TcpHealthChecker;

/// Outcome of a single probe
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a healthy node
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Health checker trait
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Probe a health check target
    async fn check_health(&self, target: &str) -> HealthStatus;
}

/// Dispatches a target to the HTTP or TCP probe by its scheme
pub struct TargetHealthChecker {
    http: HttpHealthChecker,
    tcp: TcpHealthChecker,
}

impl TargetHealthChecker {
    pub fn new(check_timeout: Duration) -> CoreResult<Self> {
        Ok(Self {
            http: HttpHealthChecker::new(check_timeout)?,
            tcp: TcpHealthChecker::new(),
        })
    }
}

#[async_trait]
impl HealthChecker for TargetHealthChecker {
    async fn check_health(&self, target: &str) -> HealthStatus {
        if target.starts_with("http://") || target.starts_with("https://") {
            self.http.check_health(target).await
        } else if target.starts_with(tcp::TCP_SCHEME) {
            self.tcp.check_health(target).await
        } else {
            HealthStatus::Unhealthy {
                reason: format!("Unsupported health check target: {}", target),
            }
        }
    }
}

/// Timing of the monitor loop
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::from(&HealthConfig::default())
    }
}

impl MonitorSettings {
    /// Replace zero durations with the defaults.
    ///
    /// A zero interval cannot drive the monitor's ticker.
    pub fn sanitized(self) -> Self {
        let defaults = Self::default();
        let pick = |value: Duration, fallback: Duration, name: &str| {
            if value.is_zero() {
                warn!("Health monitor {} of zero replaced with {:?}", name, fallback);
                fallback
            } else {
                value
            }
        };

        Self {
            interval: pick(self.interval, defaults.interval, "interval"),
            probe_timeout: pick(self.probe_timeout, defaults.probe_timeout, "probe timeout"),
            shutdown_timeout: pick(
                self.shutdown_timeout,
                defaults.shutdown_timeout,
                "shutdown timeout",
            ),
        }
    }
}

impl From<&HealthConfig> for MonitorSettings {
    fn from(config: &HealthConfig) -> Self {
        Self {
            interval: config.interval(),
            probe_timeout: config.timeout(),
            shutdown_timeout: config.shutdown_timeout(),
        }
    }
}

/// Background task probing every registered node once per interval.
///
/// Probes run outside the registry lock with a per-probe timeout; results
/// are written back in one short write-locked pass.
pub struct HealthMonitor {
    pool: NodePool,
    checker: Arc<dyn HealthChecker>,
    settings: MonitorSettings,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    /// Start the monitor loop; must be called within a tokio runtime.
    ///
    /// Zero durations in `settings` fall back to the defaults.
    pub fn spawn(pool: NodePool, checker: Arc<dyn HealthChecker>, settings: MonitorSettings) -> Self {
        let settings = settings.sanitized();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(monitor_loop(
            pool.clone(),
            checker.clone(),
            settings,
            shutdown_rx,
        ));

        Self {
            pool,
            checker,
            settings,
            shutdown_tx,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn settings(&self) -> MonitorSettings {
        self.settings
    }

    /// Run one probe cycle immediately, outside the schedule
    pub async fn check_now(&self) -> Vec<(String, HealthStatus)> {
        run_cycle(&self.pool, &self.checker, self.settings.probe_timeout).await
    }

    pub async fn is_running(&self) -> bool {
        self.handle
            .lock()
            .await
            .as_ref()
            .map_or(false, |handle| !handle.is_finished())
    }

    /// Signal the loop to stop and wait, bounded, for it to exit.
    ///
    /// Safe to call more than once.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);

        let Some(mut handle) = self.handle.lock().await.take() else {
            return;
        };

        match timeout(self.settings.shutdown_timeout, &mut handle).await {
            Ok(_) => info!("Health monitor stopped"),
            Err(_) => {
                warn!(
                    "Health monitor did not stop within {:?}, aborting",
                    self.settings.shutdown_timeout
                );
                handle.abort();
                // Wait for the cancelled cycle to drop its in-flight probes
                let _ = handle.await;
            }
        }
    }
}

async fn monitor_loop(
    pool: NodePool,
    checker: Arc<dyn HealthChecker>,
    settings: MonitorSettings,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("Health monitor started (interval {:?})", settings.interval);

    loop {
        tokio::select! {
            biased;
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_cycle(&pool, &checker, settings.probe_timeout).await;
            }
        }
    }

    debug!("Health monitor loop exited");
}

/// Probe every node once and record the results.
///
/// A probe that panics or times out marks only its own node unhealthy.
async fn run_cycle(
    pool: &NodePool,
    checker: &Arc<dyn HealthChecker>,
    probe_timeout: Duration,
) -> Vec<(String, HealthStatus)> {
    let targets: Vec<(String, Option<String>)> = pool
        .read()
        .await
        .iter()
        .map(|node| (node.node_id.clone(), node.health_check_target.clone()))
        .collect();

    let probes = targets.into_iter().map(|(node_id, target)| {
        let checker = checker.clone();
        async move {
            let Some(target) = target else {
                return (node_id, HealthStatus::Healthy);
            };

            let probe = AssertUnwindSafe(timeout(probe_timeout, checker.check_health(&target)));
            let status = match probe.catch_unwind().await {
                Ok(Ok(status)) => status,
                Ok(Err(_)) => HealthStatus::Timeout,
                Err(_) => HealthStatus::Unhealthy {
                    reason: "Health check panicked".to_string(),
                },
            };
            (node_id, status)
        }
    });

    let results = futures::future::join_all(probes).await;

    let now = SystemTime::now();
    let mut registry = pool.write().await;
    for (node_id, status) in &results {
        // Unregistered while the probe was in flight
        let Some(node) = registry.get_mut(node_id) else {
            continue;
        };

        let healthy = status.is_healthy();
        if node.healthy && !healthy {
            warn!("Node {} became unhealthy: {}", node_id, status);
        } else if !node.healthy && healthy {
            info!("Node {} recovered", node_id);
        }

        node.healthy = healthy;
        node.last_health_check = now;
        if !healthy {
            node.error_count += 1;
        }
    }

    debug!(
        "Health check cycle complete: {}/{} healthy",
        registry.healthy_count(),
        registry.len()
    );

    results
}

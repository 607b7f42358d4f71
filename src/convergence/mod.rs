//! Waiting for routers to report the expected connected-site counts
//!
//! Each target site is polled on a fixed tick until its router reports the
//! expected counts, the shared deadline passes, or the run is canceled.
//! Sites are checked one after another against a single deadline for the
//! whole run. There is no backoff: the tick is constant.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::platform::{ConnectedSites, SitePlatform};
use crate::{Error, Result};

/// Default time between router inspections
pub const DEFAULT_TICK: Duration = Duration::from_secs(5);

/// Default budget for a whole verification run
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Longest tick or run budget honored; larger values are clamped to it
pub const MAX_WAIT: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// `wait` from now, clamped so the deadline never overflows
pub fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait.min(MAX_WAIT)).unwrap_or(now)
}

/// What a converged router must report
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Expectation {
    /// At least one connected site, of any kind
    #[default]
    Presence,
    /// At least one connected site and exactly these counts
    Exact {
        /// Expected one-hop sites
        direct: u32,
        /// Expected multi-hop sites
        indirect: u32,
    },
}

impl Expectation {
    /// Whether an observation satisfies this expectation
    pub fn is_met(&self, sites: &ConnectedSites) -> bool {
        if sites.total < 1 {
            return false;
        }
        match *self {
            Expectation::Presence => true,
            Expectation::Exact { direct, indirect } => {
                sites.direct == direct && sites.indirect == indirect
            }
        }
    }
}

/// A site to watch and what it should converge to
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConvergenceTarget {
    /// Site id, used in logs and errors
    pub site_id: String,
    /// Namespace the site's router runs in
    pub namespace: String,
    /// Counts the router must report
    pub expectation: Expectation,
}

impl ConvergenceTarget {
    /// Create a target
    pub fn new(
        site_id: impl Into<String>,
        namespace: impl Into<String>,
        expectation: Expectation,
    ) -> Self {
        Self {
            site_id: site_id.into(),
            namespace: namespace.into(),
            expectation,
        }
    }
}

/// Where a single-site wait stands
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergenceState {
    /// Still polling
    Waiting,
    /// The router reported matching counts
    Converged(ConnectedSites),
    /// The deadline passed first; carries the last successful observation
    TimedOut(Option<ConnectedSites>),
    /// Cancellation fired first
    Canceled,
}

impl ConvergenceState {
    /// Whether polling has stopped
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConvergenceState::Waiting)
    }
}

/// Tick and deadline for a verification run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WatchSettings {
    /// Time between inspections
    pub tick: Duration,
    /// Budget shared by every site in the run
    pub timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Poll `fetch` every `tick` until `expectation` holds
///
/// The first observation happens one tick after the call. A failed fetch
/// counts as not converged and is logged. When several events are ready at
/// once, cancellation wins over the deadline and the deadline wins over a
/// tick.
pub async fn poll_until_converged<F, Fut>(
    site_id: &str,
    expectation: Expectation,
    tick: Duration,
    deadline: Instant,
    cancel: &CancellationToken,
    mut fetch: F,
) -> ConvergenceState
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ConnectedSites>>,
{
    // interval panics on a zero period
    let tick = tick.clamp(Duration::from_millis(1), MAX_WAIT);
    let mut ticker = interval_at(deadline_after(tick), tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last = None;
    let mut state = ConvergenceState::Waiting;
    while !state.is_terminal() {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => state = ConvergenceState::Canceled,
            _ = sleep_until(deadline) => state = ConvergenceState::TimedOut(last),
            _ = ticker.tick() => match fetch().await {
                Ok(sites) => {
                    debug!(
                        site = %site_id,
                        total = sites.total,
                        direct = sites.direct,
                        indirect = sites.indirect,
                        "observed connected sites"
                    );
                    last = Some(sites);
                    if expectation.is_met(&sites) {
                        state = ConvergenceState::Converged(sites);
                    }
                }
                Err(e) => {
                    warn!(site = %site_id, error = %e, "failed to inspect router, retrying");
                }
            },
        }
    }
    state
}

/// Waits for a set of sites to converge
pub struct ConvergenceWatcher {
    platform: Arc<dyn SitePlatform>,
    settings: WatchSettings,
}

impl ConvergenceWatcher {
    /// Create a watcher over a platform
    pub fn new(platform: Arc<dyn SitePlatform>, settings: WatchSettings) -> Self {
        Self { platform, settings }
    }

    /// Tick and timeout in use
    pub fn settings(&self) -> WatchSettings {
        self.settings
    }

    /// Wait for one site against an externally owned deadline
    #[instrument(skip(self, target, cancel), fields(site = %target.site_id))]
    pub async fn wait_for_site(
        &self,
        target: &ConvergenceTarget,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<ConnectedSites> {
        let started = Instant::now();
        let platform = &self.platform;
        let namespace = target.namespace.as_str();
        let state = poll_until_converged(
            &target.site_id,
            target.expectation,
            self.settings.tick,
            deadline,
            cancel,
            move || async move {
                platform
                    .router_status(namespace)
                    .await
                    .map(|status| status.connected_sites)
            },
        )
        .await;

        match state {
            ConvergenceState::Converged(sites) => {
                info!(
                    total = sites.total,
                    direct = sites.direct,
                    indirect = sites.indirect,
                    "site converged"
                );
                Ok(sites)
            }
            ConvergenceState::TimedOut(last) => {
                warn!(?last, expected = ?target.expectation, "site did not converge");
                Err(Error::Timeout {
                    site: target.site_id.clone(),
                    waited: started.elapsed(),
                })
            }
            ConvergenceState::Canceled | ConvergenceState::Waiting => Err(Error::Canceled {
                site: target.site_id.clone(),
            }),
        }
    }

    /// Wait for every target in order under one deadline
    ///
    /// Stops at the first site that times out or is canceled.
    pub async fn verify(
        &self,
        targets: &[ConvergenceTarget],
        cancel: &CancellationToken,
    ) -> Result<Vec<ConnectedSites>> {
        let deadline = deadline_after(self.settings.timeout);
        let mut observed = Vec::with_capacity(targets.len());
        for target in targets {
            observed.push(self.wait_for_site(target, deadline, cancel).await?);
        }
        info!(sites = observed.len(), "all sites converged");
        Ok(observed)
    }
}

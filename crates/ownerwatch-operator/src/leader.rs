//! Lease-based leader election.
//!
//! Only the lease holder binds and runs controllers. Standby replicas block
//! in [`LeaderElection::acquire`]. Once acquired, [`LeaderElection::hold`]
//! keeps renewing and resolves only when leadership is gone, which the
//! binary treats as fatal.

use std::time::Duration;

use anyhow::{ensure, Context, Result};
use k8s_openapi::api::coordination::v1::Lease;
use kube::Client;
use kube_leader_election::{LeaseLock, LeaseLockParams, LeaseLockResult};
use thiserror::Error;
use tracing::{info, trace, warn};

/// Consecutive renewal failures tolerated before giving up the lease.
const MAX_RENEWAL_FAILURES: u32 = 3;

const DEFAULT_LEASE_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_RENEW_INTERVAL: Duration = Duration::from_secs(5);

/// Reason a held lease was lost
#[derive(Debug, Error)]
pub enum LeadershipLost {
    #[error("lease taken over by {holder}")]
    TakenOver { holder: String },
    #[error("lease renewal failed {attempts} times in a row: {last_error}")]
    RenewalFailed { attempts: u32, last_error: String },
}

/// Lease parameters for an enabled election
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderElectionConfig {
    lease_name: String,
    namespace: String,
    holder_id: String,
    lease_duration: Duration,
    renew_interval: Duration,
}

impl LeaderElectionConfig {
    /// Validated configuration.
    ///
    /// Names must be non-empty and `renew_interval` shorter than
    /// `lease_duration`, or the lease would lapse between renewals.
    pub fn new(
        lease_name: impl Into<String>,
        namespace: impl Into<String>,
        holder_id: impl Into<String>,
        lease_duration: Duration,
        renew_interval: Duration,
    ) -> Result<Self> {
        let config = Self {
            lease_name: lease_name.into(),
            namespace: namespace.into(),
            holder_id: holder_id.into(),
            lease_duration,
            renew_interval,
        };

        ensure!(!config.lease_name.is_empty(), "lease_name cannot be empty");
        ensure!(!config.namespace.is_empty(), "namespace cannot be empty");
        ensure!(!config.holder_id.is_empty(), "holder_id cannot be empty");
        ensure!(
            !config.renew_interval.is_zero(),
            "renew_interval must be greater than zero"
        );
        ensure!(
            config.renew_interval < config.lease_duration,
            "renew_interval ({:?}) must be less than lease_duration ({:?})",
            config.renew_interval,
            config.lease_duration
        );

        Ok(config)
    }

    /// Read from the environment; `Ok(None)` unless `LEADER_ELECTION_ENABLED=true`.
    ///
    /// Required when enabled: `LEADER_ELECTION_LEASE_NAME`, `POD_NAMESPACE`,
    /// `POD_NAME`. Optional: `LEADER_ELECTION_LEASE_DURATION` and
    /// `LEADER_ELECTION_RENEW_INTERVAL` in seconds.
    pub fn from_env() -> Result<Option<Self>> {
        let enabled = std::env::var("LEADER_ELECTION_ENABLED")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        if !enabled {
            return Ok(None);
        }

        let lease_name = std::env::var("LEADER_ELECTION_LEASE_NAME")
            .context("LEADER_ELECTION_LEASE_NAME required when leader election is enabled")?;
        let namespace = std::env::var("POD_NAMESPACE")
            .context("POD_NAMESPACE required when leader election is enabled")?;
        let holder_id = std::env::var("POD_NAME")
            .context("POD_NAME required when leader election is enabled")?;

        Self::new(
            lease_name,
            namespace,
            holder_id,
            seconds_from_env("LEADER_ELECTION_LEASE_DURATION", DEFAULT_LEASE_DURATION),
            seconds_from_env("LEADER_ELECTION_RENEW_INTERVAL", DEFAULT_RENEW_INTERVAL),
        )
        .map(Some)
    }

    pub fn lease_name(&self) -> &str {
        &self.lease_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn lease_duration(&self) -> Duration {
        self.lease_duration
    }

    pub fn renew_interval(&self) -> Duration {
        self.renew_interval
    }
}

/// Whole seconds from an env var, falling back (with a warning) on bad input
fn seconds_from_env(var_name: &str, default: Duration) -> Duration {
    let Ok(raw) = std::env::var(var_name) else {
        return default;
    };
    match raw.parse::<u64>() {
        Ok(secs) => Duration::from_secs(secs),
        Err(e) => {
            warn!(
                env_var = var_name,
                value = %raw,
                error = %e,
                default_secs = default.as_secs(),
                "Failed to parse duration env var, using default"
            );
            default
        }
    }
}

fn lease_holder(lease: &Lease) -> &str {
    lease
        .spec
        .as_ref()
        .and_then(|s| s.holder_identity.as_deref())
        .unwrap_or("unknown")
}

/// Lease lock plus renewal cadence
pub struct LeaderElection {
    lease_lock: LeaseLock,
    renew_interval: Duration,
}

impl LeaderElection {
    pub fn new(client: Client, config: &LeaderElectionConfig) -> Self {
        let lease_lock = LeaseLock::new(
            client,
            config.namespace(),
            LeaseLockParams {
                holder_id: config.holder_id().to_string(),
                lease_name: config.lease_name().to_string(),
                lease_ttl: config.lease_duration(),
            },
        );

        Self {
            lease_lock,
            renew_interval: config.renew_interval(),
        }
    }

    /// Block until this replica holds the lease.
    pub async fn acquire(&self) {
        info!("Attempting to acquire leadership");

        loop {
            match self.lease_lock.try_acquire_or_renew().await {
                Ok(LeaseLockResult::Acquired(lease)) => {
                    info!(holder = %lease_holder(&lease), "Leadership acquired");
                    return;
                }
                Ok(LeaseLockResult::NotAcquired(lease)) => {
                    info!(
                        current_holder = %lease_holder(&lease),
                        "Another replica is leader, waiting"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "Failed to check leadership, retrying");
                }
            }

            tokio::time::sleep(self.renew_interval).await;
        }
    }

    /// Keep renewing the lease; resolves only once leadership is lost.
    pub async fn hold(self) -> LeadershipLost {
        let mut interval = tokio::time::interval(self.renew_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut consecutive_failures: u32 = 0;

        info!(
            interval_secs = self.renew_interval.as_secs(),
            max_failures = MAX_RENEWAL_FAILURES,
            "Starting lease renewal loop"
        );

        loop {
            interval.tick().await;

            match self.lease_lock.try_acquire_or_renew().await {
                Ok(LeaseLockResult::Acquired(_)) => {
                    if consecutive_failures > 0 {
                        info!(
                            previous_failures = consecutive_failures,
                            "Lease renewed after transient failures"
                        );
                    }
                    consecutive_failures = 0;
                    trace!("Lease renewed");
                }
                Ok(LeaseLockResult::NotAcquired(lease)) => {
                    return LeadershipLost::TakenOver {
                        holder: lease_holder(&lease).to_string(),
                    };
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_RENEWAL_FAILURES {
                        return LeadershipLost::RenewalFailed {
                            attempts: consecutive_failures,
                            last_error: e.to_string(),
                        };
                    }
                    warn!(
                        error = %e,
                        attempt = consecutive_failures,
                        max_attempts = MAX_RENEWAL_FAILURES,
                        "Transient lease renewal failure, will retry"
                    );
                }
            }
        }
    }
}

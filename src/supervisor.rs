//! Reconnection after unexpected link loss.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::manager::{ConnectionManager, LinkLoss};
use crate::session::ConnectionState;
use crate::transport::Radio;

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect.
    pub base_delay: Duration,
    /// Ceiling for any single delay.
    pub max_delay: Duration,
    /// Reconnects before giving up.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect number `attempt` (zero-based):
    /// `min(base * 2^attempt, max)`.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

/// Reacts to link-loss notifications by reconnecting through the manager.
///
/// One task runs per lost device; a second loss for a device already being
/// recovered is folded into the running task.
pub struct ReconnectSupervisor<R: Radio> {
    manager: Arc<ConnectionManager<R>>,
    policy: ReconnectPolicy,
}

impl<R: Radio> ReconnectSupervisor<R> {
    /// Creates a supervisor.
    #[must_use]
    pub const fn new(manager: Arc<ConnectionManager<R>>, policy: ReconnectPolicy) -> Self {
        Self { manager, policy }
    }

    /// Consumes link-loss notifications until `shutdown` is cancelled or the
    /// manager goes away.
    pub async fn run(self, mut losses: mpsc::UnboundedReceiver<LinkLoss>, shutdown: CancellationToken) {
        let recovering: Arc<Mutex<HashSet<String>>> = Arc::default();
        let mut tasks = JoinSet::new();

        loop {
            let loss = tokio::select! {
                () = shutdown.cancelled() => break,
                loss = losses.recv() => match loss {
                    Some(loss) => loss,
                    None => break,
                },
                Some(_) = tasks.join_next(), if !tasks.is_empty() => continue,
            };

            let newly_tracked = recovering
                .lock()
                .map(|mut set| set.insert(loss.device_id.clone()))
                .unwrap_or(false);
            if !newly_tracked {
                tracing::debug!(device = %loss.device_id, "already recovering");
                continue;
            }

            let manager = Arc::clone(&self.manager);
            let policy = self.policy;
            let recovering = Arc::clone(&recovering);
            let shutdown = shutdown.clone();
            tasks.spawn(async move {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = recover(&manager, policy, &loss.device_id) => {}
                }
                if let Ok(mut set) = recovering.lock() {
                    set.remove(&loss.device_id);
                }
            });
        }

        tasks.shutdown().await;
    }
}

/// Backs off and reconnects until the session is ready again or the budget
/// is spent, in which case the device is left `Failed`.
async fn recover<R: Radio>(manager: &ConnectionManager<R>, policy: ReconnectPolicy, device_id: &str) {
    let Ok(handle) = manager.registry().get(device_id) else {
        return;
    };

    loop {
        let attempt = {
            let mut session = handle.lock().await;
            if session.state() == ConnectionState::Ready {
                return;
            }
            let attempt = session.reconnect_attempts();
            if attempt >= policy.max_attempts {
                drop(session);
                let reason = format!("reconnect budget of {} attempts spent", policy.max_attempts);
                if let Err(e) = manager.fail_device(device_id, reason).await {
                    tracing::warn!(device = %device_id, "{e}");
                }
                return;
            }
            session.bump_reconnect_attempts();
            attempt
        };

        let delay = policy.delay(attempt);
        tracing::info!(
            device = %device_id,
            attempt = attempt + 1,
            of = policy.max_attempts,
            "reconnecting in {}ms",
            delay.as_millis()
        );
        tokio::time::sleep(delay).await;

        match manager.reconnect_device(device_id).await {
            Ok(()) => return,
            Err(e) => tracing::warn!(device = %device_id, "reconnect failed: {e}"),
        }
    }
}

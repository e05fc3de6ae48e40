//! Connection manager.
//!
//! Drives every configured device through
//! `Idle -> Connecting -> Discovering -> Ready` with a bounded retry loop, and
//! connects the device set in two phases: all devices concurrently, then any
//! stragglers strictly one at a time. Scanning and link establishment are
//! mutually exclusive on the radio.

pub mod matcher;
pub mod registry;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::event::{Event, EventDispatcher};
use crate::session::{Capabilities, ConnectionState, DeviceSession};
use crate::transport::{Link, Radio, RadioFuture};
use crate::types::{DeviceConfig, DiscoveredPeripheral};

pub use matcher::{MatchOutcome, Matcher, locate};
pub use registry::{SessionHandle, SessionRegistry};

/// Upper bound for the keep-alive probe after a link opens.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Retry and timeout settings for connection attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Attempts per connect cycle.
    pub attempts: u32,
    /// Scans per attempt before the device counts as not found.
    pub locate_attempts: u32,
    /// Bound on opening a link.
    pub connect_timeout: Duration,
    /// Bound on capability discovery.
    pub discovery_timeout: Duration,
    /// Pause between attempts.
    pub retry_delay: Duration,
    /// Bound on one device's whole cycle during the concurrent phase.
    pub device_timeout: Duration,
    /// Length of each scan.
    pub scan_duration: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            attempts: 3,
            locate_attempts: 5,
            connect_timeout: Duration::from_secs(10),
            discovery_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(1),
            device_timeout: Duration::from_secs(30),
            scan_duration: Duration::from_secs(5),
        }
    }
}

/// Notification that a ready link dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLoss {
    pub device_id: String,
    /// Generation of the link that dropped.
    pub generation: u64,
}

/// One attempt within a connect cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Attempt {
    number: u32,
    budget: u32,
}

impl Attempt {
    const fn first(budget: u32) -> Self {
        Self {
            number: 1,
            budget: if budget == 0 { 1 } else { budget },
        }
    }

    /// The attempt that follows a failure, if the failure is transient and
    /// budget remains.
    fn next(self, error: &Error) -> Option<Self> {
        (error.is_retryable() && self.number < self.budget).then_some(Self {
            number: self.number + 1,
            ..self
        })
    }
}

/// Where a session lands when a cycle gives up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OnExhausted {
    /// `Failed`, with a `Failed` event.
    Fail,
    /// A non-terminal state; the caller decides what happens next.
    Settle(ConnectionState),
}

/// Connects configured devices and tracks their sessions.
pub struct ConnectionManager<R: Radio> {
    radio: Arc<R>,
    settings: ConnectionSettings,
    registry: Arc<SessionRegistry<R::Link>>,
    dispatcher: EventDispatcher,
    /// Scans hold it exclusively, link establishment shared.
    radio_gate: RwLock<()>,
    /// Serializes sequential-phase and reconnect cycles.
    exclusive: Mutex<()>,
    loss_tx: mpsc::UnboundedSender<LinkLoss>,
}

impl<R: Radio> ConnectionManager<R> {
    /// Creates a manager with an idle session per device.
    ///
    /// Returns the manager and the receiver of link-loss notifications,
    /// which the reconnection supervisor consumes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if device ids are not unique.
    pub fn new(
        radio: R,
        settings: ConnectionSettings,
        devices: impl IntoIterator<Item = DeviceConfig>,
        dispatcher: EventDispatcher,
    ) -> Result<(Self, mpsc::UnboundedReceiver<LinkLoss>)> {
        let (loss_tx, loss_rx) = mpsc::unbounded_channel();
        let manager = Self {
            radio: Arc::new(radio),
            settings,
            registry: Arc::new(SessionRegistry::new(devices)?),
            dispatcher,
            radio_gate: RwLock::new(()),
            exclusive: Mutex::new(()),
            loss_tx,
        };
        Ok((manager, loss_rx))
    }

    /// Returns the session registry.
    #[must_use]
    pub const fn registry(&self) -> &Arc<SessionRegistry<R::Link>> {
        &self.registry
    }

    /// Returns the event dispatcher.
    #[must_use]
    pub const fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Returns the connection settings.
    #[must_use]
    pub const fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    /// Connects every configured device.
    ///
    /// All devices are first attempted concurrently, each bounded by
    /// `device_timeout`. Devices that are not ready afterwards get one more
    /// cycle each, strictly one after another. Returns the final states.
    pub async fn connect_all(&self) -> Vec<(String, ConnectionState)> {
        let ids = self.registry.ids().to_vec();
        tracing::info!(devices = ids.len(), "connecting concurrently");
        join_all(ids.iter().map(|id| self.connect_concurrently(id))).await;

        let ready = self.registry.ready_ids().await;
        let pending: Vec<&String> = ids.iter().filter(|id| !ready.contains(id)).collect();
        if pending.is_empty() {
            tracing::info!("all devices ready after concurrent phase");
            return self.registry.states().await;
        }

        tracing::info!(
            pending = pending.len(),
            "radio contention suspected, retrying sequentially"
        );
        for id in pending {
            let _exclusive = self.exclusive.lock().await;
            if let Err(e) = self.run_cycle(id, OnExhausted::Fail).await {
                tracing::warn!(device = %id, "sequential connect failed: {e}");
            }
        }

        self.registry.states().await
    }

    /// Runs one connect cycle for a device. Ready sessions return at once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] once every attempt failed, or a
    /// terminal error such as [`Error::AmbiguousDevice`] immediately. The
    /// session is left `Failed` either way.
    pub async fn connect_device(&self, device_id: &str) -> Result<()> {
        self.run_cycle(device_id, OnExhausted::Fail).await
    }

    /// Runs one reconnect cycle on behalf of the supervisor. A failed cycle
    /// leaves the session `Disconnected`.
    pub(crate) async fn reconnect_device(&self, device_id: &str) -> Result<()> {
        let _exclusive = self.exclusive.lock().await;
        self.run_cycle(device_id, OnExhausted::Settle(ConnectionState::Disconnected))
            .await
    }

    /// Marks a device `Failed` and reports it.
    pub(crate) async fn fail_device(&self, device_id: &str, reason: String) -> Result<()> {
        let handle = self.registry.get(device_id)?;
        let mut session = handle.lock().await;
        session.teardown().await;
        session.set_state(ConnectionState::Failed);
        drop(session);
        tracing::error!(device = %device_id, "giving up: {reason}");
        self.dispatcher.dispatch(Event::Failed {
            device_id: device_id.to_string(),
            reason,
        });
        Ok(())
    }

    /// Disconnects one device and resets it to `Idle`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] for an unconfigured id.
    pub async fn disconnect_device(&self, device_id: &str) -> Result<()> {
        let handle = self.registry.get(device_id)?;
        let mut session = handle.lock().await;
        let was_ready = session.is_connected();
        session.teardown().await;
        session.set_state(ConnectionState::Idle);
        drop(session);
        if was_ready {
            self.dispatcher.dispatch(Event::Disconnected {
                device_id: device_id.to_string(),
            });
        }
        Ok(())
    }

    /// Disconnects every device.
    pub async fn disconnect_all(&self) {
        for id in self.registry.ids() {
            if let Err(e) = self.disconnect_device(id).await {
                tracing::warn!(device = %id, "disconnect failed: {e}");
            }
        }
    }

    async fn connect_concurrently(&self, device_id: &str) {
        let timeout = self.settings.device_timeout;
        let cycle = self.run_cycle(device_id, OnExhausted::Settle(ConnectionState::Idle));
        match tokio::time::timeout(timeout, cycle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(device = %device_id, "concurrent connect failed: {e}"),
            Err(_) => {
                tracing::warn!(
                    device = %device_id,
                    "concurrent connect timed out after {}ms",
                    timeout.as_millis()
                );
                self.abandon(device_id).await;
            }
        }
    }

    /// Cleans up after a cycle whose future was dropped mid-flight.
    async fn abandon(&self, device_id: &str) {
        let Ok(handle) = self.registry.get(device_id) else {
            return;
        };
        let mut session = handle.lock().await;
        session.teardown().await;
        if let Some(peripheral) = session.peripheral().cloned() {
            self.release(&peripheral).await;
        }
        session.set_state(ConnectionState::Idle);
    }

    async fn run_cycle(&self, device_id: &str, on_exhausted: OnExhausted) -> Result<()> {
        let handle = self.registry.get(device_id)?;
        let mut session = handle.lock().await;
        if session.is_connected() {
            return Ok(());
        }

        let mut attempt = Attempt::first(self.settings.attempts);
        let error = loop {
            match self.try_attempt(&mut session, attempt).await {
                Ok(()) => break None,
                Err(e) => {
                    // The link handle is never reused across attempts.
                    session.teardown().await;
                    let Some(next) = attempt.next(&e) else {
                        break Some(e);
                    };
                    tracing::debug!(
                        device = %device_id,
                        attempt = attempt.number,
                        "attempt failed, retrying: {e}"
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                    attempt = next;
                }
            }
        };

        let Some(error) = error else {
            tracing::info!(device = %device_id, attempt = attempt.number, "ready");
            self.dispatcher.dispatch(Event::Connected {
                device_id: device_id.to_string(),
            });
            if let Some(state) = session.read_status().await {
                self.dispatcher.dispatch(Event::StateChanged {
                    device_id: device_id.to_string(),
                    state,
                });
            }
            return Ok(());
        };

        let error = if error.is_retryable() {
            Error::RetriesExhausted {
                device_id: device_id.to_string(),
                attempts: attempt.number,
                last: Box::new(error),
            }
        } else {
            error
        };

        match on_exhausted {
            OnExhausted::Fail => {
                session.set_state(ConnectionState::Failed);
                drop(session);
                tracing::error!(device = %device_id, "{error}");
                self.dispatcher.dispatch(Event::Failed {
                    device_id: device_id.to_string(),
                    reason: error.to_string(),
                });
            }
            OnExhausted::Settle(state) => session.set_state(state),
        }
        Err(error)
    }

    async fn try_attempt(
        &self,
        session: &mut DeviceSession<R::Link>,
        attempt: Attempt,
    ) -> Result<()> {
        tracing::debug!(
            device = %session.id(),
            attempt = attempt.number,
            of = attempt.budget,
            "connecting"
        );
        session.set_state(ConnectionState::Connecting);
        let config = Arc::clone(session.config());

        let peripheral = self.locate(&config).await?;
        session.set_peripheral(peripheral.clone());

        let lost = self.open_link(session, &peripheral).await?;

        session.set_state(ConnectionState::Discovering);
        let capabilities = self.discover(session, &config, &lost).await?;
        session.mark_ready(capabilities);
        Ok(())
    }

    /// Scans until the device resolves, up to `locate_attempts` scans.
    async fn locate(&self, config: &DeviceConfig) -> Result<DiscoveredPeripheral> {
        let scans = self.settings.locate_attempts.max(1);
        for scan in 1..=scans {
            let scanned = {
                let _gate = self.radio_gate.write().await;
                self.radio.scan(self.settings.scan_duration).await?
            };
            tracing::debug!(device = %config.id, scan, found = scanned.len(), "scanned");
            if let Some(peripheral) = locate(config, self.registry.configs(), &scanned)? {
                return Ok(peripheral.clone());
            }
        }
        Err(Error::DeviceNotFound {
            device_id: config.id.clone(),
            scans,
        })
    }

    /// Opens a fresh link, attaches it to the session and starts watching it
    /// for loss. Returns the token that is cancelled when the link drops.
    async fn open_link(
        &self,
        session: &mut DeviceSession<R::Link>,
        peripheral: &DiscoveredPeripheral,
    ) -> Result<CancellationToken> {
        let timeout = self.settings.connect_timeout;
        let result = {
            let _gate = self.radio_gate.read().await;
            tokio::time::timeout(timeout, self.radio.connect(peripheral)).await
        };
        let link = match result {
            Ok(Ok(link)) => link,
            Ok(Err(e)) => {
                self.release(peripheral).await;
                return Err(e);
            }
            Err(_) => {
                self.release(peripheral).await;
                return Err(Error::timeout("connect", timeout));
            }
        };

        if !link.is_connected().await {
            if let Err(e) = link.disconnect().await {
                tracing::debug!(device = %session.id(), "disconnect of dropped link: {e}");
            }
            return Err(Error::LinkLost {
                operation: "connect",
            });
        }

        match tokio::time::timeout(PROBE_TIMEOUT, link.probe()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(device = %session.id(), "probe failed: {e}"),
            Err(_) => tracing::debug!(device = %session.id(), "probe timed out"),
        }

        let lost = CancellationToken::new();
        let link_lost = link.link_lost();
        let generation = session.attach_link(link, lost.clone());
        self.watch_link(session.id().to_string(), generation, link_lost, lost.clone());
        Ok(lost)
    }

    /// Discovers and filters capabilities, giving up early if the link drops.
    async fn discover(
        &self,
        session: &DeviceSession<R::Link>,
        config: &DeviceConfig,
        lost: &CancellationToken,
    ) -> Result<Capabilities> {
        let link = session.link().ok_or(Error::NotConnected)?;
        let timeout = self.settings.discovery_timeout;

        let discovered = tokio::select! {
            () = lost.cancelled() => {
                return Err(Error::LinkLost { operation: "discover" });
            }
            result = tokio::time::timeout(timeout, link.discover(config.service)) => {
                result.map_err(|_| Error::timeout("discover", timeout))??
            }
        };
        if lost.is_cancelled() {
            return Err(Error::LinkLost {
                operation: "discover",
            });
        }

        let find = |uuid| discovered.iter().copied().find(|c| c.uuid == uuid);
        let command = find(config.command_capability).ok_or_else(|| Error::CapabilityNotFound {
            device_id: config.id.clone(),
            capability: config.command_capability.to_string(),
        })?;
        let status = find(config.status_capability);
        if status.is_none() {
            tracing::warn!(
                device = %config.id,
                capability = %config.status_capability,
                "status capability missing, session is write-only"
            );
        }

        Ok(Capabilities { command, status })
    }

    async fn release(&self, peripheral: &DiscoveredPeripheral) {
        if let Err(e) = self.radio.release(peripheral).await {
            tracing::debug!(peripheral = %peripheral.id, "release failed: {e}");
        }
    }

    /// Watches one link generation. On loss it cancels `lost`, and if the
    /// session is still ready on that generation marks it `Disconnected`
    /// and notifies the supervisor.
    fn watch_link(
        &self,
        device_id: String,
        generation: u64,
        link_lost: RadioFuture<'static, ()>,
        lost: CancellationToken,
    ) {
        let registry = Arc::clone(&self.registry);
        let dispatcher = self.dispatcher.clone();
        let loss_tx = self.loss_tx.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = lost.cancelled() => return,
                () = link_lost => {}
            }
            lost.cancel();

            let Ok(handle) = registry.get(&device_id) else {
                return;
            };
            let mut session = handle.lock().await;
            if session.generation() != generation || !session.is_connected() {
                tracing::debug!(device = %device_id, generation, "stale link loss ignored");
                return;
            }
            session.on_link_lost();
            drop(session);

            tracing::info!(device = %device_id, "link lost");
            dispatcher.dispatch(Event::Disconnected {
                device_id: device_id.clone(),
            });
            // Supervisor gone means shutdown
            let _ = loss_tx.send(LinkLoss {
                device_id,
                generation,
            });
        });
    }
}

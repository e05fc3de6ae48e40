//! Registry of device sessions.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::error::{Error, Result};
use crate::session::{ConnectionState, DeviceSession};
use crate::transport::Link;
use crate::types::DeviceConfig;

/// Shared handle to one session.
pub type SessionHandle<L> = Arc<Mutex<DeviceSession<L>>>;

/// One session slot per configured device, in configuration order.
///
/// Owned by the connection manager and shared by reference with the
/// supervisor and the hub bridge.
pub struct SessionRegistry<L> {
    order: Vec<String>,
    configs: Vec<Arc<DeviceConfig>>,
    sessions: HashMap<String, SessionHandle<L>>,
}

impl<L: Link> SessionRegistry<L> {
    /// Creates an idle session for every device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if two devices share an id.
    pub fn new(devices: impl IntoIterator<Item = DeviceConfig>) -> Result<Self> {
        let mut order = Vec::new();
        let mut configs = Vec::new();
        let mut sessions = HashMap::new();
        for device in devices {
            let id = device.id.clone();
            if sessions.contains_key(&id) {
                return Err(Error::Config {
                    reason: format!("duplicate device id {id:?}"),
                });
            }
            let device = Arc::new(device);
            sessions.insert(
                id.clone(),
                Arc::new(Mutex::new(DeviceSession::new(Arc::clone(&device)))),
            );
            configs.push(device);
            order.push(id);
        }
        Ok(Self {
            order,
            configs,
            sessions,
        })
    }

    /// Returns the session for a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownDevice`] if the id is not configured.
    pub fn get(&self, device_id: &str) -> Result<SessionHandle<L>> {
        self.sessions
            .get(device_id)
            .cloned()
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))
    }

    /// Returns the configured device ids in order.
    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Returns every device configuration in order.
    #[must_use]
    pub fn configs(&self) -> &[Arc<DeviceConfig>] {
        &self.configs
    }

    /// Returns the number of configured devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns true if no devices are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Iterates over `(id, session)` in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionHandle<L>)> {
        self.order
            .iter()
            .filter_map(|id| self.sessions.get(id).map(|s| (id.as_str(), s)))
    }

    /// Snapshots every session's state.
    pub async fn states(&self) -> Vec<(String, ConnectionState)> {
        let mut states = Vec::with_capacity(self.order.len());
        for (id, session) in self.iter() {
            states.push((id.to_string(), session.lock().await.state()));
        }
        states
    }

    /// Returns the ids of ready sessions.
    pub async fn ready_ids(&self) -> Vec<String> {
        self.states()
            .await
            .into_iter()
            .filter(|(_, state)| *state == ConnectionState::Ready)
            .map(|(id, _)| id)
            .collect()
    }
}

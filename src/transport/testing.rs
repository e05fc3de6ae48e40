//! Scriptable in-memory radio for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transport::{Link, Radio, RadioFuture};
use crate::types::{
    Capability, DEFAULT_COMMAND_CAPABILITY, DEFAULT_SERVICE, DEFAULT_STATUS_CAPABILITY,
    DiscoveredPeripheral,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Op {
    Scan,
    ConnectStart(String),
    ConnectEnd(String),
    Release(String),
    Probe(String),
    Discover(String),
    Write(String, Vec<u8>),
    Read(String),
    Disconnect(String),
}

#[derive(Debug, Clone)]
pub(crate) enum ConnectStep {
    Ok,
    Delay(Duration),
    Fail,
    Hang,
    /// Link opens but is already down.
    Dropped,
}

#[derive(Debug, Clone)]
pub(crate) enum DiscoverStep {
    Ok(Vec<Capability>),
    Hang,
    /// Drops the link mid-discovery, then hangs.
    DropLink,
}

#[derive(Default)]
struct Script {
    connect: VecDeque<ConnectStep>,
    discover: VecDeque<DiscoverStep>,
    status: Option<Vec<u8>>,
    fail_writes: bool,
}

#[derive(Clone)]
struct LinkControl {
    lost: CancellationToken,
    connected: Arc<AtomicBool>,
}

impl LinkControl {
    fn drop_link(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.lost.cancel();
    }
}

#[derive(Default)]
struct FakeState {
    peripherals: Vec<DiscoveredPeripheral>,
    scripts: HashMap<String, Script>,
    ops: Vec<Op>,
    links: HashMap<String, LinkControl>,
}

pub(crate) fn default_capabilities() -> Vec<Capability> {
    vec![
        Capability {
            uuid: DEFAULT_COMMAND_CAPABILITY,
            service: DEFAULT_SERVICE,
        },
        Capability {
            uuid: DEFAULT_STATUS_CAPABILITY,
            service: DEFAULT_SERVICE,
        },
    ]
}

pub(crate) fn peripheral(id: &str, name: &str) -> DiscoveredPeripheral {
    DiscoveredPeripheral {
        id: id.to_string(),
        address: id.to_string(),
        name: Some(name.to_string()),
        service_ids: vec![DEFAULT_SERVICE],
        rssi: Some(-60),
    }
}

/// A radio whose peripherals and failures are scripted per peripheral id.
#[derive(Clone, Default)]
pub(crate) struct FakeRadio {
    state: Arc<Mutex<FakeState>>,
}

impl FakeRadio {
    pub(crate) fn with_peripherals(peripherals: Vec<DiscoveredPeripheral>) -> Self {
        let radio = Self::default();
        radio.lock().peripherals = peripherals;
        radio
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, op: Op) {
        self.lock().ops.push(op);
    }

    pub(crate) fn script_connect(&self, id: &str, steps: Vec<ConnectStep>) {
        self.lock()
            .scripts
            .entry(id.to_string())
            .or_default()
            .connect
            .extend(steps);
    }

    pub(crate) fn script_discover(&self, id: &str, steps: Vec<DiscoverStep>) {
        self.lock()
            .scripts
            .entry(id.to_string())
            .or_default()
            .discover
            .extend(steps);
    }

    pub(crate) fn set_status(&self, id: &str, frame: &[u8]) {
        self.lock().scripts.entry(id.to_string()).or_default().status = Some(frame.to_vec());
    }

    pub(crate) fn fail_writes(&self, id: &str, fail: bool) {
        self.lock()
            .scripts
            .entry(id.to_string())
            .or_default()
            .fail_writes = fail;
    }

    /// Simulates the peripheral dropping its current link.
    pub(crate) fn drop_link(&self, id: &str) {
        if let Some(control) = self.lock().links.get(id) {
            control.drop_link();
        }
    }

    pub(crate) fn ops(&self) -> Vec<Op> {
        self.lock().ops.clone()
    }

    pub(crate) fn count(&self, matches: impl Fn(&Op) -> bool) -> usize {
        self.lock().ops.iter().filter(|op| matches(op)).count()
    }

    pub(crate) fn connects(&self, id: &str) -> usize {
        self.count(|op| matches!(op, Op::ConnectStart(p) if p == id))
    }

    pub(crate) fn writes(&self, id: &str) -> Vec<Vec<u8>> {
        self.lock()
            .ops
            .iter()
            .filter_map(|op| match op {
                Op::Write(p, data) if p == id => Some(data.clone()),
                _ => None,
            })
            .collect()
    }
}

impl Radio for FakeRadio {
    type Link = FakeLink;

    fn scan(&self, _duration: Duration) -> RadioFuture<'_, Result<Vec<DiscoveredPeripheral>>> {
        Box::pin(async move {
            self.record(Op::Scan);
            Ok(self.lock().peripherals.clone())
        })
    }

    fn connect<'a>(
        &'a self,
        peripheral: &'a DiscoveredPeripheral,
    ) -> RadioFuture<'a, Result<FakeLink>> {
        Box::pin(async move {
            let id = peripheral.id.clone();
            self.record(Op::ConnectStart(id.clone()));
            let step = self
                .lock()
                .scripts
                .get_mut(&id)
                .and_then(|script| script.connect.pop_front())
                .unwrap_or(ConnectStep::Ok);

            let connected = match step {
                ConnectStep::Ok => true,
                ConnectStep::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    true
                }
                ConnectStep::Fail => {
                    self.record(Op::ConnectEnd(id.clone()));
                    return Err(Error::Io(std::io::Error::other("connect refused")));
                }
                ConnectStep::Hang => futures::future::pending().await,
                ConnectStep::Dropped => false,
            };

            let control = LinkControl {
                lost: CancellationToken::new(),
                connected: Arc::new(AtomicBool::new(connected)),
            };
            self.lock().links.insert(id.clone(), control.clone());
            self.record(Op::ConnectEnd(id.clone()));
            Ok(FakeLink {
                id,
                radio: self.clone(),
                control,
            })
        })
    }

    fn release<'a>(&'a self, peripheral: &'a DiscoveredPeripheral) -> RadioFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record(Op::Release(peripheral.id.clone()));
            Ok(())
        })
    }
}

pub(crate) struct FakeLink {
    id: String,
    radio: FakeRadio,
    control: LinkControl,
}

impl Link for FakeLink {
    fn probe(&self) -> RadioFuture<'_, Result<()>> {
        Box::pin(async move {
            self.radio.record(Op::Probe(self.id.clone()));
            Ok(())
        })
    }

    fn discover(&self, service: Uuid) -> RadioFuture<'_, Result<Vec<Capability>>> {
        Box::pin(async move {
            self.radio.record(Op::Discover(self.id.clone()));
            let step = self
                .radio
                .lock()
                .scripts
                .get_mut(&self.id)
                .and_then(|script| script.discover.pop_front())
                .unwrap_or_else(|| DiscoverStep::Ok(default_capabilities()));

            match step {
                DiscoverStep::Ok(capabilities) => Ok(capabilities
                    .into_iter()
                    .filter(|capability| capability.service == service)
                    .collect()),
                DiscoverStep::Hang => futures::future::pending().await,
                DiscoverStep::DropLink => {
                    self.control.drop_link();
                    futures::future::pending().await
                }
            }
        })
    }

    fn write<'a>(
        &'a self,
        _capability: &'a Capability,
        data: &'a [u8],
    ) -> RadioFuture<'a, Result<()>> {
        Box::pin(async move {
            let fail = self
                .radio
                .lock()
                .scripts
                .get(&self.id)
                .is_some_and(|script| script.fail_writes);
            if fail {
                return Err(Error::Io(std::io::Error::other("write rejected")));
            }
            self.radio.record(Op::Write(self.id.clone(), data.to_vec()));
            Ok(())
        })
    }

    fn read<'a>(&'a self, _capability: &'a Capability) -> RadioFuture<'a, Result<Vec<u8>>> {
        Box::pin(async move {
            self.radio.record(Op::Read(self.id.clone()));
            Ok(self
                .radio
                .lock()
                .scripts
                .get(&self.id)
                .and_then(|script| script.status.clone())
                .unwrap_or_default())
        })
    }

    fn disconnect(&self) -> RadioFuture<'_, Result<()>> {
        Box::pin(async move {
            self.radio.record(Op::Disconnect(self.id.clone()));
            self.control.connected.store(false, Ordering::SeqCst);
            Ok(())
        })
    }

    fn is_connected(&self) -> RadioFuture<'_, bool> {
        let connected = self.control.connected.load(Ordering::SeqCst);
        Box::pin(async move { connected })
    }

    fn link_lost(&self) -> RadioFuture<'static, ()> {
        let lost = self.control.lost.clone();
        Box::pin(async move { lost.cancelled().await })
    }
}

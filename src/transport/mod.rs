//! Radio abstraction.
//!
//! The connection manager only sees these traits. [`ble`] implements them
//! over the host Bluetooth stack; tests use an in-memory fake.

pub mod ble;
#[cfg(test)]
pub(crate) mod testing;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use uuid::Uuid;

use crate::error::Result;
use crate::types::{Capability, DiscoveredPeripheral};

/// Boxed future returned by radio operations.
pub type RadioFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A radio adapter able to scan for and link to peripherals.
///
/// Scanning and link establishment must not overlap on the same adapter;
/// the connection manager enforces that, implementations need not.
pub trait Radio: Send + Sync + 'static {
    /// Link type produced by [`Radio::connect`].
    type Link: Link;

    /// Scans for peripherals for the given duration.
    fn scan(&self, duration: Duration) -> RadioFuture<'_, Result<Vec<DiscoveredPeripheral>>>;

    /// Opens a link to a scanned peripheral.
    fn connect<'a>(
        &'a self,
        peripheral: &'a DiscoveredPeripheral,
    ) -> RadioFuture<'a, Result<Self::Link>>;

    /// Tears down any link the stack may still hold for the peripheral,
    /// e.g. after an abandoned connect.
    fn release<'a>(&'a self, peripheral: &'a DiscoveredPeripheral) -> RadioFuture<'a, Result<()>>;
}

/// A live link to one peripheral. Exclusively owned by a session.
pub trait Link: Send + Sync + 'static {
    /// Lightweight exchange that keeps freshly opened links alive.
    fn probe(&self) -> RadioFuture<'_, Result<()>>;

    /// Discovers the capabilities under one service.
    fn discover(&self, service: Uuid) -> RadioFuture<'_, Result<Vec<Capability>>>;

    /// Writes bytes to a capability.
    fn write<'a>(&'a self, capability: &'a Capability, data: &'a [u8])
    -> RadioFuture<'a, Result<()>>;

    /// Reads the current value of a capability.
    fn read<'a>(&'a self, capability: &'a Capability) -> RadioFuture<'a, Result<Vec<u8>>>;

    /// Closes the link.
    fn disconnect(&self) -> RadioFuture<'_, Result<()>>;

    /// Returns true if the link is up.
    fn is_connected(&self) -> RadioFuture<'_, bool>;

    /// Resolves once the link drops. Never resolves for a deliberate
    /// [`Link::disconnect`] that happens after the future is dropped.
    fn link_lost(&self) -> RadioFuture<'static, ()>;
}

pub use ble::{BleLink, BleRadio};

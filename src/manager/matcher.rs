//! Resolving a configured device against scan results.
//!
//! Matchers run in a fixed order. The first one that finds exactly one
//! candidate wins; one that finds several stops the search, since picking
//! between them would be a guess.
//!
//! A device with a configured address resolves by address only. The name and
//! sole-candidate fallbacks never pick a peripheral whose address or name
//! belongs to another configured device.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{DeviceConfig, DiscoveredPeripheral};

/// A single matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Matcher {
    /// Radio address, ignoring case and separators.
    Address,
    /// Exact advertised local name.
    Name,
    /// The only scanned peripheral advertising the device's service.
    SoleServiceCandidate,
}

/// Outcome of one matcher.
#[derive(Debug, PartialEq, Eq)]
pub enum MatchOutcome<'a> {
    Found(&'a DiscoveredPeripheral),
    NoMatch,
    Ambiguous(usize),
}

impl Matcher {
    /// Evaluation order.
    pub const ORDER: [Self; 3] = [Self::Address, Self::Name, Self::SoleServiceCandidate];

    /// Matchers that may resolve `config`, in order.
    #[must_use]
    pub fn for_device(config: &DeviceConfig) -> &'static [Self] {
        if config.address.is_some() {
            &Self::ORDER[..1]
        } else {
            &Self::ORDER[1..]
        }
    }

    /// Returns the matcher's name for logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Address => "address",
            Self::Name => "name",
            Self::SoleServiceCandidate => "sole service candidate",
        }
    }

    /// Applies the matcher to a scan. `configured` is every configured
    /// device; peripherals claimed by one of the others are skipped by the
    /// fallback matchers.
    #[must_use]
    pub fn evaluate<'a>(
        self,
        config: &DeviceConfig,
        configured: &[Arc<DeviceConfig>],
        scanned: &'a [DiscoveredPeripheral],
    ) -> MatchOutcome<'a> {
        let unclaimed = |p: &&DiscoveredPeripheral| !claimed_by_other(p, config, configured);
        let candidates: Vec<&DiscoveredPeripheral> = match self {
            Self::Address => {
                let Some(wanted) = config.address.as_deref().map(normalize_address) else {
                    return MatchOutcome::NoMatch;
                };
                scanned
                    .iter()
                    .filter(|p| {
                        normalize_address(&p.address) == wanted
                            || normalize_address(&p.id) == wanted
                    })
                    .collect()
            }
            Self::Name => scanned
                .iter()
                .filter(|p| p.name.as_deref() == Some(config.name.as_str()))
                .filter(unclaimed)
                .collect(),
            Self::SoleServiceCandidate => scanned
                .iter()
                .filter(|p| p.service_ids.contains(&config.service))
                .filter(unclaimed)
                .collect(),
        };

        match candidates.as_slice() {
            [] => MatchOutcome::NoMatch,
            [only] => MatchOutcome::Found(only),
            many => MatchOutcome::Ambiguous(many.len()),
        }
    }
}

/// Lowercases and strips `:`/`-` separators.
fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(|c| *c != ':' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// True if another configured device owns the peripheral's address, or
/// advertises under the peripheral's name while `config` does not.
fn claimed_by_other(
    peripheral: &DiscoveredPeripheral,
    config: &DeviceConfig,
    configured: &[Arc<DeviceConfig>],
) -> bool {
    let address = normalize_address(&peripheral.address);
    let id = normalize_address(&peripheral.id);
    configured
        .iter()
        .filter(|other| other.id != config.id)
        .any(|other| {
            let by_address = other.address.as_deref().map(normalize_address).is_some_and(
                |claimed| claimed == address || claimed == id,
            );
            let by_name = other.name != config.name
                && peripheral.name.as_deref() == Some(other.name.as_str());
            by_address || by_name
        })
}

/// Runs the matchers that apply to `config`, in order.
///
/// Returns `Ok(None)` if nothing matched.
///
/// # Errors
///
/// Returns [`Error::AmbiguousDevice`] as soon as a matcher finds more than one
/// candidate.
pub fn locate<'a>(
    config: &DeviceConfig,
    configured: &[Arc<DeviceConfig>],
    scanned: &'a [DiscoveredPeripheral],
) -> Result<Option<&'a DiscoveredPeripheral>> {
    for &matcher in Matcher::for_device(config) {
        match matcher.evaluate(config, configured, scanned) {
            MatchOutcome::Found(peripheral) => {
                tracing::debug!(
                    device = %config.id,
                    peripheral = %peripheral.id,
                    rssi = ?peripheral.rssi,
                    "matched by {}",
                    matcher.as_str()
                );
                return Ok(Some(peripheral));
            }
            MatchOutcome::NoMatch => {}
            MatchOutcome::Ambiguous(candidates) => {
                return Err(Error::AmbiguousDevice {
                    device_id: config.id.clone(),
                    matcher: matcher.as_str(),
                    candidates,
                });
            }
        }
    }
    Ok(None)
}

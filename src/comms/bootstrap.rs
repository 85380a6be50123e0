//! Communication layer bootstrap.
//!
//! Brings the radio up, optionally attaches the mesh stack, binds address
//! discovery to whichever layer ends up active, then starts that layer and
//! waits for it to report `Started`. Stages run strictly in order and the
//! first failure aborts the whole sequence.
//!
//! The start wait polls [`CommsLayer::status`] with cooperative sleeps and is
//! bounded by [`BootstrapConfig::start_timeout`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info};

use super::addrdisco::{AddressDiscoveryContext, DiscoveryError};
use super::{CommsHandle, CommsLayer, CommsStatus, MeshStack, RadioDriver, RadioParams};
use crate::config::Config;
use crate::identity::NodeIdentity;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Why the start stage did not reach `Started`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StartFailure {
    #[error("start request rejected with status {0}")]
    Status(CommsStatus),
    #[error("layer did not report started within {waited:?}")]
    TimedOut { waited: Duration },
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("radio init failed: {0}")]
    RadioInitFailed(String),
    #[error("multi-hop stack attach failed: {0}")]
    StackAttachFailed(String),
    #[error("address discovery: {0}")]
    AddressDiscovery(#[from] DiscoveryError),
    #[error("comms start rejected: {0}")]
    StartRejected(StartFailure),
}

// ── Inputs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub channel: u8,
    pub pan_id: u16,
    pub start_poll: Duration,
    pub start_timeout: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            channel: 11,
            pan_id: 0x22,
            start_poll: Duration::from_millis(1),
            start_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&Config> for BootstrapConfig {
    fn from(config: &Config) -> Self {
        Self {
            channel: config.radio.channel,
            pan_id: config.radio.pan_id,
            start_poll: config.comms.start_poll,
            start_timeout: config.comms.start_timeout,
        }
    }
}

/// Driver set the bootstrap runs against. `mesh` being present is what
/// selects multi-hop mode; it is decided once when the drivers are built.
#[derive(Clone)]
pub struct Drivers {
    pub radio: Arc<dyn RadioDriver>,
    pub mesh: Option<Arc<dyn MeshStack>>,
}

impl Drivers {
    pub fn single_hop(radio: Arc<dyn RadioDriver>) -> Self {
        Self { radio, mesh: None }
    }

    pub fn multi_hop(radio: Arc<dyn RadioDriver>, mesh: Arc<dyn MeshStack>) -> Self {
        Self { radio, mesh: Some(mesh) }
    }
}

// ── bootstrap ─────────────────────────────────────────────────────────────────

/// Run the bootstrap sequence for `identity`.
///
/// On success the returned handle's active layer has been observed
/// `Started` at least once. `discovery` is bound during the sequence; on a
/// radio init failure it is left untouched.
pub async fn bootstrap(
    identity: &NodeIdentity,
    config: &BootstrapConfig,
    drivers: &Drivers,
    discovery: Arc<AddressDiscoveryContext>,
) -> Result<CommsHandle, BootstrapError> {
    let radio = drivers
        .radio
        .init(RadioParams {
            channel: config.channel,
            pan_id: config.pan_id,
            address: identity.address,
        })
        .map_err(|e| BootstrapError::RadioInitFailed(e.to_string()))?;

    radio.set_eui(identity.eui);

    let handle = match &drivers.mesh {
        Some(stack) => {
            let mesh = stack
                .attach(identity.address, radio.clone())
                .map_err(|e| BootstrapError::StackAttachFailed(e.to_string()))?;
            CommsHandle::multi_hop(mesh, radio, discovery.clone())
        }
        None => {
            info!("starting single-hop");
            CommsHandle::single_hop(radio, discovery.clone())
        }
    };

    let layer = handle.active();
    discovery.bind(layer.as_ref())?;

    let status = layer.start(Box::new(|status| debug!(%status, "started")));
    if status != CommsStatus::Success {
        return Err(BootstrapError::StartRejected(StartFailure::Status(status)));
    }

    let polls = wait_started(layer.as_ref(), config.start_poll, config.start_timeout)
        .await
        .map_err(BootstrapError::StartRejected)?;

    debug!(layer = layer.name(), polls, "radio ready");
    Ok(handle)
}

/// Poll `layer` every `poll` until it reports `Started`, giving up after
/// `timeout`. Returns the number of status polls made.
pub async fn wait_started(
    layer: &dyn CommsLayer,
    poll: Duration,
    timeout: Duration,
) -> Result<u64, StartFailure> {
    let deadline = Instant::now() + timeout;
    let mut polls = 0u64;
    loop {
        polls += 1;
        if layer.status() == CommsStatus::Started {
            return Ok(polls);
        }
        let now = Instant::now();
        if now >= deadline {
            return Err(StartFailure::TimedOut { waited: timeout });
        }
        tokio::time::sleep(poll.min(deadline - now)).await;
    }
}

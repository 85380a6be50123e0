//! Communication layer: the contracts the node core talks to and the handle
//! it passes around once the layer is running.
//!
//! # Layers and drivers
//!
//! A [`CommsLayer`] is anything that can be started, polled for status and
//! asked to send a frame. The radio itself is one; a mesh stack attached on
//! top of the radio is another. Layers are produced by a [`RadioDriver`] and
//! optionally wrapped by a [`MeshStack`]; both are external collaborators and
//! are only reached through these traits.
//!
//! # Handle
//!
//! [`CommsHandle`] is the started, active layer. It is built exclusively by
//! [`bootstrap::bootstrap`] after the layer reported `Started`, and is cheap
//! to clone for every downstream consumer.

pub mod addrdisco;
pub mod bootstrap;
pub mod loopback;
#[cfg(feature = "multi-hop")]
pub mod mesh;

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use addrdisco::AddressDiscoveryContext;

/// Active-message network address.
pub type AmAddr = u16;

/// Broadcast destination.
pub const AM_BROADCAST_ADDR: AmAddr = 0xFFFF;

// ── Eui64 ─────────────────────────────────────────────────────────────────────

/// Globally unique 8-byte hardware identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub const LENGTH: usize = 8;

    /// Identifier synthesized from a short address: six zero bytes followed
    /// by the address high and low byte.
    pub fn from_address(address: AmAddr) -> Self {
        let [hi, lo] = address.to_be_bytes();
        Self([0, 0, 0, 0, 0, 0, hi, lo])
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// `true` for the all-zero and all-ones identifiers, which no device owns.
    pub fn is_reserved(&self) -> bool {
        self.0 == [0x00; 8] || self.0 == [0xFF; 8]
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Layer status, both as returned synchronously by control calls and as
/// reported by [`CommsLayer::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommsStatus {
    Success,
    Fail,
    Busy,
    Offline,
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl CommsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CommsStatus::Success => "success",
            CommsStatus::Fail => "fail",
            CommsStatus::Busy => "busy",
            CommsStatus::Offline => "offline",
            CommsStatus::Starting => "starting",
            CommsStatus::Started => "started",
            CommsStatus::Stopping => "stopping",
            CommsStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for CommsStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CommsError {
    #[error("radio driver init failed: {0}")]
    Driver(String),
    #[error("mesh stack attach failed: {0}")]
    Attach(String),
    #[error("layer not started (status {0})")]
    NotStarted(CommsStatus),
    #[error("send failed: {0}")]
    Send(String),
}

// ── Contracts ─────────────────────────────────────────────────────────────────

/// Completion callback for [`CommsLayer::start`]. Invoked at most once, from
/// whatever context the layer completes its start in.
pub type StartCallback = Box<dyn FnOnce(CommsStatus) + Send + 'static>;

/// Inbound frame handler: `(source, payload)`. Called from whatever context
/// the layer delivers frames in, so it must not block.
pub type ReceiveHandler = Arc<dyn Fn(AmAddr, &[u8]) + Send + Sync + 'static>;

/// A communication layer: a bare radio or a stack wrapped around one.
///
/// Implementations do their own internal locking; the node core shares
/// layers behind `Arc` and only ever calls through `&self`.
pub trait CommsLayer: Send + Sync {
    /// Short name used in log lines (e.g. `"radio"`, `"mesh"`).
    fn name(&self) -> &str;

    fn address(&self) -> AmAddr;

    fn eui(&self) -> Eui64;

    fn set_eui(&self, eui: Eui64);

    /// Request the layer to start. Returns [`CommsStatus::Success`] when the
    /// request was accepted; completion is reported through `on_started` and
    /// [`CommsLayer::status`].
    fn start(&self, on_started: StartCallback) -> CommsStatus;

    fn status(&self) -> CommsStatus;

    fn send(&self, destination: AmAddr, payload: &[u8]) -> Result<(), CommsError>;

    /// Install the handler for frames addressed to this node or broadcast.
    /// Replaces any previous handler. Layers with no receive path ignore it.
    fn set_receiver(&self, _handler: ReceiveHandler) {}
}

/// Radio driver initialisation parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioParams {
    pub channel: u8,
    pub pan_id: u16,
    pub address: AmAddr,
}

/// Brings the transceiver up as a [`CommsLayer`].
pub trait RadioDriver: Send + Sync {
    fn init(&self, params: RadioParams) -> Result<Arc<dyn CommsLayer>, CommsError>;
}

/// Multi-hop stack that attaches on top of an initialised radio layer.
pub trait MeshStack: Send + Sync {
    fn attach(
        &self,
        address: AmAddr,
        radio: Arc<dyn CommsLayer>,
    ) -> Result<Arc<dyn CommsLayer>, CommsError>;
}

// ── CommsHandle ───────────────────────────────────────────────────────────────

/// Which layer variant is active.
#[derive(Clone)]
enum ActiveLayer {
    Radio(Arc<dyn CommsLayer>),
    Mesh {
        mesh: Arc<dyn CommsLayer>,
        radio: Arc<dyn CommsLayer>,
    },
}

/// The running communication layer, shared by every consumer.
///
/// Construction is crate-private: the only way to obtain one is a successful
/// bootstrap, so holding a handle implies the layer was observed `Started`.
#[derive(Clone)]
pub struct CommsHandle {
    layer: ActiveLayer,
    discovery: Arc<AddressDiscoveryContext>,
}

impl CommsHandle {
    pub(crate) fn single_hop(
        radio: Arc<dyn CommsLayer>,
        discovery: Arc<AddressDiscoveryContext>,
    ) -> Self {
        Self { layer: ActiveLayer::Radio(radio), discovery }
    }

    pub(crate) fn multi_hop(
        mesh: Arc<dyn CommsLayer>,
        radio: Arc<dyn CommsLayer>,
        discovery: Arc<AddressDiscoveryContext>,
    ) -> Self {
        Self { layer: ActiveLayer::Mesh { mesh, radio }, discovery }
    }

    /// The layer consumers talk to: the mesh when attached, else the radio.
    pub fn active(&self) -> &Arc<dyn CommsLayer> {
        match &self.layer {
            ActiveLayer::Radio(radio) => radio,
            ActiveLayer::Mesh { mesh, .. } => mesh,
        }
    }

    /// The underlying radio layer, regardless of mode.
    pub fn radio(&self) -> &Arc<dyn CommsLayer> {
        match &self.layer {
            ActiveLayer::Radio(radio) => radio,
            ActiveLayer::Mesh { radio, .. } => radio,
        }
    }

    pub fn is_multi_hop(&self) -> bool {
        matches!(self.layer, ActiveLayer::Mesh { .. })
    }

    pub fn mode(&self) -> &'static str {
        if self.is_multi_hop() { "multi-hop" } else { "single-hop" }
    }

    pub fn address(&self) -> AmAddr {
        self.active().address()
    }

    pub fn eui(&self) -> Eui64 {
        self.radio().eui()
    }

    pub fn status(&self) -> CommsStatus {
        self.active().status()
    }

    pub fn send(&self, destination: AmAddr, payload: &[u8]) -> Result<(), CommsError> {
        self.active().send(destination, payload)
    }

    pub fn broadcast(&self, payload: &[u8]) -> Result<(), CommsError> {
        self.send(AM_BROADCAST_ADDR, payload)
    }

    /// Address discovery context bound to this handle's active layer.
    pub fn discovery(&self) -> &Arc<AddressDiscoveryContext> {
        &self.discovery
    }

    /// Route inbound frames on the active layer to `handler`.
    pub fn set_receiver(&self, handler: ReceiveHandler) {
        self.active().set_receiver(handler);
    }

    /// Resolve a global identifier to a network address.
    pub fn resolve(&self, eui: &Eui64) -> Option<AmAddr> {
        self.discovery.resolve(eui)
    }
}

impl fmt::Debug for CommsHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommsHandle")
            .field("mode", &self.mode())
            .field("layer", &self.active().name())
            .field("address", &format_args!("{:04X}", self.address()))
            .field("status", &self.status())
            .finish()
    }
}

//! Node identity: network address and EUI-64 resolved once at boot.
//!
//! A valid device signature supplies both. Without one the node still comes
//! up: it takes the configured default address and an identifier synthesized
//! from it (see [`Eui64::from_address`]).

use tracing::{info, warn};

use crate::comms::{AmAddr, Eui64};
use crate::signature::SignatureStore;

/// Address used when no valid signature is present.
pub const DEFAULT_AM_ADDR: AmAddr = 0x0001;

/// Resolved node identity. Immutable after boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    pub address: AmAddr,
    pub eui: Eui64,
}

impl NodeIdentity {
    /// Identity derived only from `default_address`.
    pub fn fallback(default_address: AmAddr) -> Self {
        Self {
            address: default_address,
            eui: Eui64::from_address(default_address),
        }
    }
}

/// Resolve the node identity from `store`, falling back to
/// `default_address` when the signature is missing or invalid. Never fails.
pub fn resolve(store: &dyn SignatureStore, default_address: AmAddr) -> NodeIdentity {
    let identity = match store.read() {
        Ok(sig) => NodeIdentity { address: sig.node_id, eui: sig.eui64 },
        Err(e) => {
            warn!(error = %e, "device signature unusable, using default address");
            NodeIdentity::fallback(default_address)
        }
    };
    info!(
        addr = format_args!("{:04X}", identity.address),
        eui64 = %identity.eui,
        "identity resolved"
    );
    identity
}

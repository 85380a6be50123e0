//! Mist middleware and example application seam.
//!
//! Both are initialised once with the started comms handle after the
//! announcement stage. Their protocol logic lives outside this crate; the
//! types here only take ownership of the handle and report readiness.

use std::sync::OnceLock;

use tracing::{info, warn};

use crate::comms::CommsHandle;

/// Something the supervisor initialises with the running comms handle.
pub trait NodeApplication: Send + Sync {
    /// Stable identifier used in log messages.
    fn name(&self) -> &str;

    /// Version string logged before `init`, if the application has one.
    fn version(&self) -> Option<&str> {
        None
    }

    fn init(&self, comms: &CommsHandle);
}

/// Version reported by [`MistMiddleware`].
pub const MIST_MIDDLEWARE_VERSION: &str = "0.6.2";

/// Host-side mist middleware shim.
#[derive(Debug, Default)]
pub struct MistMiddleware {
    comms: OnceLock<CommsHandle>,
}

impl MistMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comms(&self) -> Option<&CommsHandle> {
        self.comms.get()
    }
}

impl NodeApplication for MistMiddleware {
    fn name(&self) -> &str {
        "mist-middleware"
    }

    fn version(&self) -> Option<&str> {
        Some(MIST_MIDDLEWARE_VERSION)
    }

    fn init(&self, comms: &CommsHandle) {
        if self.comms.set(comms.clone()).is_err() {
            warn!("mist middleware already initialised");
            return;
        }
        info!(mode = comms.mode(), layer = comms.active().name(), "mist middleware ready");
    }
}

/// Host-side mist example application shim.
#[derive(Debug, Default)]
pub struct MistExample {
    comms: OnceLock<CommsHandle>,
}

impl MistExample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn comms(&self) -> Option<&CommsHandle> {
        self.comms.get()
    }
}

impl NodeApplication for MistExample {
    fn name(&self) -> &str {
        "mist-example"
    }

    fn init(&self, comms: &CommsHandle) {
        if self.comms.set(comms.clone()).is_err() {
            warn!("mist example already initialised");
            return;
        }
        info!(addr = format_args!("{:04X}", comms.address()), "mist example ready");
    }
}

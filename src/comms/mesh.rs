//! Mesh stack driver: attaches a multi-hop layer on top of a radio layer.
//!
//! The layer forwards control calls to the radio underneath. Route selection
//! belongs to the stack firmware; on the host every destination is handed
//! straight to the radio.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use super::{
    AmAddr, CommsError, CommsLayer, CommsStatus, Eui64, MeshStack, ReceiveHandler, StartCallback,
};

#[derive(Debug, Default)]
pub struct MeshStackDriver {
    fail_attach: bool,
}

impl MeshStackDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver whose `attach` always fails.
    pub fn failing() -> Self {
        Self { fail_attach: true }
    }
}

impl MeshStack for MeshStackDriver {
    fn attach(
        &self,
        address: AmAddr,
        radio: Arc<dyn CommsLayer>,
    ) -> Result<Arc<dyn CommsLayer>, CommsError> {
        if self.fail_attach {
            return Err(CommsError::Attach("mesh stack refused the radio".into()));
        }
        if radio.address() != address {
            return Err(CommsError::Attach(format!(
                "radio address {:04X} does not match node address {address:04X}",
                radio.address()
            )));
        }
        info!(address = format_args!("{address:04X}"), "starting multi-hop");
        Ok(Arc::new(MeshLayer {
            address,
            radio,
            start_requested: AtomicBool::new(false),
        }))
    }
}

pub struct MeshLayer {
    address: AmAddr,
    radio: Arc<dyn CommsLayer>,
    start_requested: AtomicBool,
}

impl CommsLayer for MeshLayer {
    fn name(&self) -> &str {
        "mesh"
    }

    fn address(&self) -> AmAddr {
        self.address
    }

    fn eui(&self) -> Eui64 {
        self.radio.eui()
    }

    fn set_eui(&self, eui: Eui64) {
        self.radio.set_eui(eui);
    }

    fn start(&self, on_started: StartCallback) -> CommsStatus {
        if self.start_requested.swap(true, Ordering::AcqRel) {
            return CommsStatus::Busy;
        }
        let status = self.radio.start(Box::new(move |status| {
            debug!(%status, "mesh radio start completed");
            on_started(status);
        }));
        if status != CommsStatus::Success {
            self.start_requested.store(false, Ordering::Release);
        }
        status
    }

    fn status(&self) -> CommsStatus {
        if !self.start_requested.load(Ordering::Acquire) {
            return CommsStatus::Stopped;
        }
        self.radio.status()
    }

    fn send(&self, destination: AmAddr, payload: &[u8]) -> Result<(), CommsError> {
        match self.status() {
            CommsStatus::Started => self.radio.send(destination, payload),
            other => Err(CommsError::NotStarted(other)),
        }
    }

    fn set_receiver(&self, handler: ReceiveHandler) {
        self.radio.set_receiver(handler);
    }
}

//! Device announcement: periodic presence broadcast.
//!
//! [`start_announcements`] validates its inputs and spawns a single background
//! task (see `service`) that broadcasts an [`Announcement`] on the comms
//! handle every period, starting immediately. Failure to start is reported to
//! the caller; the node is expected to carry on without announcements.
//!
//! [`learn_peers`] is the receiving half: announcements heard from other
//! nodes populate the address discovery cache.

mod service;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::comms::{AmAddr, CommsHandle, CommsStatus};
use crate::identity::NodeIdentity;
use crate::signature::parse_eui64;

use service::AnnouncementService;

/// Default broadcast period.
pub const DEFAULT_ANNOUNCEMENT_PERIOD_S: u32 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnnouncementError {
    #[error("announcement init failed: period must be > 0")]
    ZeroPeriod,
    #[error("announcement init failed: comms layer is {0}")]
    LayerNotStarted(CommsStatus),
}

/// Presence frame payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Announcement {
    /// EUI-64 as 16 upper-case hex digits.
    pub eui64: String,
    pub address: AmAddr,
    pub sequence: u32,
    pub uptime_s: u64,
    pub period_s: u32,
    /// `"single-hop"` or `"multi-hop"`.
    pub mode: String,
}

/// Handle to the running announcement task.
#[derive(Debug)]
pub struct AnnouncementTask {
    period_s: u32,
    sent: Arc<AtomicU32>,
    join: JoinHandle<()>,
}

impl AnnouncementTask {
    pub fn period_s(&self) -> u32 {
        self.period_s
    }

    /// Announcements successfully handed to the comms layer.
    pub fn sent(&self) -> u32 {
        self.sent.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.join.is_finished()
    }
}

/// Start broadcasting announcements for `identity` over `comms` every
/// `period_s` seconds until `shutdown` is cancelled.
///
/// Must be called from within a Tokio runtime.
pub fn start_announcements(
    comms: &CommsHandle,
    identity: &NodeIdentity,
    period_s: u32,
    shutdown: CancellationToken,
) -> Result<AnnouncementTask, AnnouncementError> {
    if period_s == 0 {
        return Err(AnnouncementError::ZeroPeriod);
    }
    let status = comms.status();
    if status != CommsStatus::Started {
        return Err(AnnouncementError::LayerNotStarted(status));
    }

    let sent = Arc::new(AtomicU32::new(0));
    let svc = AnnouncementService::new(
        comms.clone(),
        *identity,
        Duration::from_secs(u64::from(period_s)),
        sent.clone(),
        shutdown,
    );
    let join = tokio::spawn(svc.run());
    debug!(period_s, "announcement task spawned");

    Ok(AnnouncementTask { period_s, sent, join })
}

/// Feed every announcement heard on `comms` into its discovery context.
/// Frames that are not announcements are ignored.
pub fn learn_peers(comms: &CommsHandle) {
    let discovery = comms.discovery().clone();
    comms.set_receiver(Arc::new(move |source: AmAddr, payload: &[u8]| {
        let Ok(annc) = serde_json::from_slice::<Announcement>(payload) else {
            trace!(source = format_args!("{source:04X}"), "not an announcement");
            return;
        };
        match parse_eui64(&annc.eui64) {
            Ok(eui) => {
                discovery.learn(eui, annc.address);
                debug!(%eui, address = format_args!("{:04X}", annc.address), "peer announced");
            }
            Err(e) => warn!(source = format_args!("{source:04X}"), error = %e, "bad announcement"),
        }
    }));
}

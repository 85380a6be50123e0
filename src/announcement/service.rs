//! Background announcement task.
//!
//! Ticks a `tokio::time::interval` and broadcasts one frame per tick. A send
//! that fails is logged and skipped; the next tick tries again.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Announcement;
use crate::comms::CommsHandle;
use crate::identity::NodeIdentity;

pub(super) struct AnnouncementService {
    comms: CommsHandle,
    identity: NodeIdentity,
    period: Duration,
    sent: Arc<AtomicU32>,
    shutdown: CancellationToken,
}

impl AnnouncementService {
    pub(super) fn new(
        comms: CommsHandle,
        identity: NodeIdentity,
        period: Duration,
        sent: Arc<AtomicU32>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { comms, identity, period, sent, shutdown }
    }

    /// Run the broadcast loop until shutdown.
    pub(super) async fn run(self) {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sequence: u32 = 0;

        info!(
            period_s = self.period.as_secs(),
            mode = self.comms.mode(),
            "announcement service running"
        );

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    let sent = self.sent.load(Ordering::Relaxed);
                    info!(sent, "announcement service stopping");
                    break;
                }

                _ = ticker.tick() => {
                    self.announce(sequence, started.elapsed().as_secs());
                    sequence = sequence.wrapping_add(1);
                }
            }
        }
    }

    fn announce(&self, sequence: u32, uptime_s: u64) {
        let frame = Announcement {
            eui64: self.identity.eui.to_string(),
            address: self.identity.address,
            sequence,
            uptime_s,
            period_s: self.period.as_secs() as u32,
            mode: self.comms.mode().to_string(),
        };

        let payload = match serde_json::to_vec(&frame) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, sequence, "cannot encode announcement");
                return;
            }
        };

        match self.comms.broadcast(&payload) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                debug!(sequence, uptime_s, len = payload.len(), "announcement sent");
            }
            Err(e) => warn!(error = %e, sequence, "announcement send failed"),
        }
    }
}

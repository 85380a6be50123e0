//! Node supervisor: owns the bring-up order and the heartbeat.
//!
//! Bring-up sequence:
//!   1. Resolve the node identity
//!   2. Bootstrap the comms layer (fatal on failure)
//!   3. Listen for peer announcements, then arm the beacon (non-fatal on
//!      failure)
//!   4. Initialise the mist middleware and example application
//!
//! After that the node sits in [`heartbeat`] logging its uptime forever.
//! Everything the supervisor consumes is injected through [`NodeServices`].

pub mod stage;

pub use stage::{HaltPolicy, NodeStage};

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::announcement::{self, AnnouncementTask};
use crate::comms::addrdisco::AddressDiscoveryContext;
use crate::comms::bootstrap::{self, BootstrapConfig, BootstrapError, Drivers};
use crate::comms::{AmAddr, CommsHandle};
use crate::config::Config;
use crate::identity::{self, NodeIdentity};
use crate::mist::NodeApplication;
use crate::signature::SignatureStore;

/// Heartbeat interval used when none (or zero) is configured.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("comms bootstrap failed: {0}")]
    Bootstrap(#[from] BootstrapError),
    #[error("bring-up already ran (stage {})", .0.as_str())]
    AlreadyBooted(NodeStage),
}

/// Tunables for one bring-up pass.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub default_address: AmAddr,
    pub bootstrap: BootstrapConfig,
    pub announcement_period_s: u32,
    pub heartbeat_interval: Duration,
    pub address_cache_capacity: usize,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            default_address: identity::DEFAULT_AM_ADDR,
            bootstrap: BootstrapConfig::default(),
            announcement_period_s: announcement::DEFAULT_ANNOUNCEMENT_PERIOD_S,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            address_cache_capacity: 32,
        }
    }
}

impl From<&Config> for NodeSettings {
    fn from(config: &Config) -> Self {
        Self {
            default_address: config.default_address,
            bootstrap: BootstrapConfig::from(config),
            announcement_period_s: config.announcement_period_s,
            heartbeat_interval: config.heartbeat_interval,
            address_cache_capacity: config.address_cache_capacity,
        }
    }
}

/// External collaborators the supervisor drives.
#[derive(Clone)]
pub struct NodeServices {
    pub signature: Arc<dyn SignatureStore>,
    pub drivers: Drivers,
    pub middleware: Arc<dyn NodeApplication>,
    pub example: Arc<dyn NodeApplication>,
}

/// Everything a successful bring-up produced.
#[derive(Debug)]
pub struct RunningNode {
    pub identity: NodeIdentity,
    pub comms: CommsHandle,
    /// `None` when the beacon failed to start.
    pub announcements: Option<AnnouncementTask>,
}

pub struct Supervisor {
    settings: NodeSettings,
    services: NodeServices,
    stage: NodeStage,
    discovery: Arc<AddressDiscoveryContext>,
    booted: Instant,
}

impl Supervisor {
    pub fn new(settings: NodeSettings, services: NodeServices) -> Self {
        let discovery = Arc::new(AddressDiscoveryContext::new(settings.address_cache_capacity));
        Self {
            settings,
            services,
            stage: NodeStage::Init,
            discovery,
            booted: Instant::now(),
        }
    }

    pub fn stage(&self) -> NodeStage {
        self.stage
    }

    pub fn discovery(&self) -> &AddressDiscoveryContext {
        &self.discovery
    }

    /// Run the bring-up sequence once.
    ///
    /// A fatal error leaves the supervisor in [`NodeStage::FatalHalt`]; the
    /// caller is expected to arrest the process (see [`halt`]).
    pub async fn bring_up(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<RunningNode, NodeError> {
        if self.stage != NodeStage::Init {
            return Err(NodeError::AlreadyBooted(self.stage));
        }

        let identity = identity::resolve(
            self.services.signature.as_ref(),
            self.settings.default_address,
        );
        self.enter(NodeStage::IdentityResolved);

        let started = bootstrap::bootstrap(
            &identity,
            &self.settings.bootstrap,
            &self.services.drivers,
            self.discovery.clone(),
        )
        .await;
        let comms = match started {
            Ok(comms) => comms,
            Err(e) => return Err(self.fail(e.into())),
        };
        self.enter(NodeStage::CommsStarted);

        announcement::learn_peers(&comms);
        let announcements = match announcement::start_announcements(
            &comms,
            &identity,
            self.settings.announcement_period_s,
            shutdown.child_token(),
        ) {
            Ok(task) => {
                debug!(period_s = task.period_s(), "announcements started");
                Some(task)
            }
            Err(e) => {
                error!(error = %e, "announcements unavailable");
                None
            }
        };
        self.enter(NodeStage::AnnouncementArmed);

        for app in [&self.services.middleware, &self.services.example] {
            if let Some(version) = app.version() {
                info!(app = app.name(), version, "initialising");
            }
            app.init(&comms);
        }
        self.enter(NodeStage::MiddlewareArmed);

        Ok(RunningNode { identity, comms, announcements })
    }

    /// Enter steady state and run the heartbeat until `shutdown` is
    /// cancelled. Returns the number of heartbeats logged.
    pub async fn steady_state(&mut self, node: &RunningNode, shutdown: &CancellationToken) -> u64 {
        self.enter(NodeStage::SteadyState);
        info!(
            addr = format_args!("{:04X}", node.identity.address),
            mode = node.comms.mode(),
            announcing = node.announcements.is_some(),
            "node up"
        );
        heartbeat(self.booted, self.settings.heartbeat_interval, shutdown).await
    }

    /// Bring the node up and stay in steady state until `shutdown`.
    pub async fn run(mut self, shutdown: CancellationToken) -> Result<(), NodeError> {
        let node = self.bring_up(&shutdown).await?;
        self.steady_state(&node, &shutdown).await;
        Ok(())
    }

    fn enter(&mut self, next: NodeStage) {
        if !self.stage.can_enter(next) {
            warn!(from = self.stage.as_str(), to = next.as_str(), "unexpected stage transition");
        }
        debug!(from = self.stage.as_str(), to = next.as_str(), "stage");
        self.stage = next;
    }

    fn fail(&mut self, err: NodeError) -> NodeError {
        error!(stage = self.stage.as_str(), error = %err, "bring-up failed");
        if HaltPolicy::is_fatal(&err) {
            self.enter(NodeStage::FatalHalt);
        }
        err
    }
}

/// Log uptime every `interval`, starting immediately, until `shutdown` is
/// cancelled. Returns the number of heartbeats logged. A zero interval falls
/// back to [`DEFAULT_HEARTBEAT_INTERVAL`].
pub async fn heartbeat(booted: Instant, interval: Duration, shutdown: &CancellationToken) -> u64 {
    let interval = if interval.is_zero() {
        warn!(default_s = DEFAULT_HEARTBEAT_INTERVAL.as_secs(), "zero heartbeat interval");
        DEFAULT_HEARTBEAT_INTERVAL
    } else {
        interval
    };
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut beats = 0u64;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            _ = ticker.tick() => {
                beats += 1;
                info!(uptime = booted.elapsed().as_secs(), "uptime");
            }
        }
    }

    beats
}

/// Arrest the calling thread. A halted node produces no further output.
pub fn halt() -> ! {
    loop {
        std::thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comms::loopback::{LoopbackConfig, LoopbackDriver};
    use crate::comms::{CommsStatus, Eui64};
    use crate::mist::{MistExample, MistMiddleware};
    use crate::signature::{DeviceSignature, SignatureError};
    use std::path::PathBuf;

    struct NoSignature;

    impl SignatureStore for NoSignature {
        fn read(&self) -> Result<DeviceSignature, SignatureError> {
            Err(SignatureError::Missing(PathBuf::from("flash")))
        }
    }

    fn services(radio: LoopbackConfig) -> (NodeServices, Arc<MistMiddleware>, Arc<MistExample>) {
        let middleware = Arc::new(MistMiddleware::new());
        let example = Arc::new(MistExample::new());
        let services = NodeServices {
            signature: Arc::new(NoSignature),
            drivers: Drivers::single_hop(Arc::new(LoopbackDriver::new(radio))),
            middleware: middleware.clone(),
            example: example.clone(),
        };
        (services, middleware, example)
    }

    #[tokio::test]
    async fn bring_up_reaches_middleware_armed() {
        let (services, middleware, example) = services(LoopbackConfig::default());
        let mut sup = Supervisor::new(NodeSettings::default(), services);
        let shutdown = CancellationToken::new();

        let node = sup.bring_up(&shutdown).await.unwrap();

        assert_eq!(sup.stage(), NodeStage::MiddlewareArmed);
        assert_eq!(node.identity.eui, Eui64::from_address(0x0001));
        assert_eq!(node.comms.status(), CommsStatus::Started);
        assert!(node.announcements.is_some());
        assert!(middleware.comms().is_some());
        assert!(example.comms().is_some());
        assert!(sup.discovery().is_bound());
        shutdown.cancel();
    }

    #[tokio::test]
    async fn radio_failure_halts_before_announcements() {
        let (services, middleware, example) =
            services(LoopbackConfig { fail_init: true, ..Default::default() });
        let mut sup = Supervisor::new(NodeSettings::default(), services);

        let err = sup.bring_up(&CancellationToken::new()).await.unwrap_err();

        assert!(HaltPolicy::is_fatal(&err));
        assert_eq!(sup.stage(), NodeStage::FatalHalt);
        assert!(middleware.comms().is_none());
        assert!(example.comms().is_none());
        assert!(!sup.discovery().is_bound());
    }

    #[tokio::test]
    async fn second_bring_up_is_rejected() {
        let (services, _, _) = services(LoopbackConfig::default());
        let mut sup = Supervisor::new(NodeSettings::default(), services);
        let shutdown = CancellationToken::new();
        sup.bring_up(&shutdown).await.unwrap();

        let err = sup.bring_up(&shutdown).await.unwrap_err();
        assert!(matches!(err, NodeError::AlreadyBooted(NodeStage::MiddlewareArmed)));
        assert!(!HaltPolicy::is_fatal(&err));
        shutdown.cancel();
    }

    #[tokio::test]
    async fn announcement_failure_is_isolated() {
        let (services, middleware, example) = services(LoopbackConfig::default());
        let settings = NodeSettings { announcement_period_s: 0, ..Default::default() };
        let mut sup = Supervisor::new(settings, services);

        let node = sup.bring_up(&CancellationToken::new()).await.unwrap();

        assert!(node.announcements.is_none());
        assert_eq!(sup.stage(), NodeStage::MiddlewareArmed);
        assert!(middleware.comms().is_some());
        assert!(example.comms().is_some());
    }

    #[tokio::test]
    async fn heartbeat_ticks_every_interval() {
        tokio::time::pause();
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(150)).await;
            canceller.cancel();
        });

        let beats = heartbeat(Instant::now(), Duration::from_secs(60), &shutdown).await;

        // t = 0, 60, 120
        assert_eq!(beats, 3);
    }

    #[tokio::test]
    async fn zero_heartbeat_interval_uses_default() {
        tokio::time::pause();
        let shutdown = CancellationToken::new();
        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(61)).await;
            canceller.cancel();
        });

        let beats = heartbeat(Instant::now(), Duration::ZERO, &shutdown).await;

        // t = 0, 60
        assert_eq!(beats, 2);
    }

    #[tokio::test]
    async fn steady_state_enters_final_stage() {
        tokio::time::pause();
        let (services, _, _) = services(LoopbackConfig::default());
        let mut sup = Supervisor::new(NodeSettings::default(), services);
        let shutdown = CancellationToken::new();
        let node = sup.bring_up(&shutdown).await.unwrap();

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(61)).await;
            canceller.cancel();
        });
        let beats = sup.steady_state(&node, &shutdown).await;

        assert_eq!(beats, 2);
        assert_eq!(sup.stage(), NodeStage::SteadyState);
    }
}

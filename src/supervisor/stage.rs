//! Node lifecycle stages and the halt policy applied to bring-up failures.

use super::NodeError;
use crate::comms::bootstrap::BootstrapError;

/// Bring-up stage of the node.
///
/// Stages advance strictly in declaration order up to `SteadyState`.
/// `FatalHalt` is terminal and only reachable before `CommsStarted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NodeStage {
    Init,
    IdentityResolved,
    CommsStarted,
    AnnouncementArmed,
    MiddlewareArmed,
    SteadyState,
    FatalHalt,
}

impl NodeStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeStage::Init => "init",
            NodeStage::IdentityResolved => "identity-resolved",
            NodeStage::CommsStarted => "comms-started",
            NodeStage::AnnouncementArmed => "announcement-armed",
            NodeStage::MiddlewareArmed => "middleware-armed",
            NodeStage::SteadyState => "steady-state",
            NodeStage::FatalHalt => "fatal-halt",
        }
    }

    /// Whether `next` is a legal transition from `self`.
    pub fn can_enter(self, next: NodeStage) -> bool {
        use NodeStage::*;
        matches!(
            (self, next),
            (Init, IdentityResolved)
                | (IdentityResolved, CommsStarted)
                | (CommsStarted, AnnouncementArmed)
                | (AnnouncementArmed, MiddlewareArmed)
                | (MiddlewareArmed, SteadyState)
                | (Init | IdentityResolved, FatalHalt)
        )
    }
}

/// Decides which bring-up failures arrest the node.
///
/// An unattended node that cannot get its comms layer running must stop
/// rather than run degraded, so every bootstrap failure is fatal. Misuse of
/// the supervisor itself is reported to the caller instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct HaltPolicy;

impl HaltPolicy {
    pub fn is_fatal(err: &NodeError) -> bool {
        match err {
            NodeError::Bootstrap(e) => match e {
                BootstrapError::RadioInitFailed(_)
                | BootstrapError::StackAttachFailed(_)
                | BootstrapError::AddressDiscovery(_)
                | BootstrapError::StartRejected(_) => true,
            },
            NodeError::AlreadyBooted(_) => false,
        }
    }
}

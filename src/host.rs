//! Host (driver) boundary.
//!
//! The S2 layer does not own a send queue, transport framing or the node
//! inventory; it talks to them through [`SecurityHost`]. The driver owns
//! one [`SecurityManager2`] and injects it into every codec operation via
//! this trait. Sending and awaiting commands are the only suspension
//! points in the layer.

use crate::cc::CommandRaw;
use crate::s2::manager::SecurityManager2;
use crate::s2::SecurityError;
use crate::types::{EndpointAddr, HomeId, NodeId, SecurityClass};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Send Options
// ============================================================================

/// Queue priority of an outgoing command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransmitPriority {
    /// Nonce reports jump the queue so decryption can resume.
    Nonce,
    /// Interview/maintenance queries yield to application traffic.
    NodeQuery,
    /// Normal application traffic.
    #[default]
    Default,
}

/// Radio-level transmit options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransmitOptions {
    /// Request a link-layer acknowledgement.
    pub ack: bool,
    /// Let the mesh re-route on delivery failure.
    pub auto_route: bool,
}

impl Default for TransmitOptions {
    fn default() -> Self {
        Self {
            ack: true,
            auto_route: true,
        }
    }
}

/// Options for one `send_command` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SendCommandOptions {
    /// Radio-level transmit options.
    pub transmit_options: TransmitOptions,
    /// Cap on transmit attempts; `None` uses the driver default.
    pub max_send_attempts: Option<u8>,
    /// Queue priority.
    pub priority: TransmitPriority,
    /// Whether a missing ACK may mark the node dead.
    pub change_node_status_on_missing_ack: bool,
    /// Force S2 encapsulation under this class instead of the peer's
    /// highest granted one.
    pub s2_security_class: Option<SecurityClass>,
}

impl SendCommandOptions {
    /// Options for a NonceReport: single attempt, elevated priority, and
    /// a missing ACK must not change node status.
    pub fn nonce_report() -> Self {
        Self {
            max_send_attempts: Some(1),
            priority: TransmitPriority::Nonce,
            change_node_status_on_missing_ack: false,
            ..Self::default()
        }
    }

    /// Options for an interview query.
    pub fn node_query() -> Self {
        Self {
            priority: TransmitPriority::NodeQuery,
            ..Self::default()
        }
    }

    /// Force a security class for the encapsulation.
    pub fn with_security_class(mut self, class: SecurityClass) -> Self {
        self.s2_security_class = Some(class);
        self
    }
}

// ============================================================================
// Transport Errors
// ============================================================================

/// Errors from the transport below the command-class layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer (or we) could not decode an S2 frame. Drives the
    /// interview retry and class-discovery logic.
    #[error("message could not be decoded")]
    CannotDecode,

    /// The node did not acknowledge the transmission.
    #[error("no acknowledgement from {0}")]
    NoAck(NodeId),

    /// The driver is not ready to send.
    #[error("driver not ready")]
    NotReady,

    /// A security-layer failure surfaced through the transport.
    #[error(transparent)]
    Security(#[from] SecurityError),
}

// ============================================================================
// Host Trait
// ============================================================================

/// What the S2 layer needs from its driver.
///
/// `send_command` applies the encapsulation policy on the way out (using
/// this crate's codec and the injected manager) and returns the decoded
/// response command, `None` on response timeout. Ordering per peer is the
/// driver's contract: commands to one node go out strictly in enqueue
/// order.
pub trait SecurityHost {
    /// Our node id on this network.
    fn own_node_id(&self) -> NodeId;

    /// The 32-bit network identifier.
    fn home_id(&self) -> HomeId;

    /// The process-wide security manager.
    fn security_manager(&self) -> &SecurityManager2;

    /// Mutable access to the security manager.
    fn security_manager_mut(&mut self) -> &mut SecurityManager2;

    /// Send a command and await its response, if one is expected.
    /// `Ok(None)` means the response timed out.
    fn send_command(
        &mut self,
        target: NodeId,
        command: CommandRaw,
        options: SendCommandOptions,
    ) -> impl std::future::Future<Output = Result<Option<CommandRaw>, TransportError>>;

    /// Await the next command initiated by `from`. `Ok(None)` on timeout.
    fn receive_command(
        &mut self,
        from: NodeId,
        timeout: Duration,
    ) -> impl std::future::Future<Output = Result<Option<CommandRaw>, TransportError>>;

    /// Suspend the current procedure.
    fn wait(&mut self, duration: Duration) -> impl std::future::Future<Output = ()> {
        tokio::time::sleep(duration)
    }

    /// Record a grant (or known denial) for a node.
    fn set_security_class(&mut self, node: NodeId, class: SecurityClass, granted: bool) {
        self.security_manager_mut()
            .set_security_class(node, class, granted);
    }

    /// Tri-state grant lookup.
    fn has_security_class(&self, node: NodeId, class: SecurityClass) -> Option<bool> {
        self.security_manager().has_security_class(node, class)
    }

    /// Highest class known granted for a node.
    fn highest_security_class(&self, node: NodeId) -> Option<SecurityClass> {
        self.security_manager().highest_security_class(node)
    }

    /// CCs an endpoint is known to implement (from the node inventory).
    fn endpoint_cc_list(&self, endpoint: EndpointAddr) -> Vec<u8>;

    /// Record which CCs an endpoint supports securely.
    fn record_secure_ccs(&mut self, endpoint: EndpointAddr, ccs: &[u8]);
}

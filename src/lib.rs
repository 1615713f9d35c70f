//! s2link: Security 2 (S2) encapsulation layer
//!
//! Authenticated encryption for command-class payloads between a
//! controller and remote mesh nodes, plus the KEX bootstrap that
//! provisions network keys per security class. The driver above this
//! crate owns the send queue and transport framing; it reaches in through
//! the [`host::SecurityHost`] trait and a single injected
//! [`s2::manager::SecurityManager2`].

pub mod cc;
pub mod config;
pub mod crypto;
pub mod host;
pub mod s2;
pub mod types;

// Re-export identifier and class types
pub use types::{EndpointAddr, HomeId, NodeId, SecurityClass, SECURITY_CLASS_ORDER};

// Re-export config types
pub use config::{Config, ConfigError, NodeConfig, SecurityKeysConfig};

// Re-export command substrate types
pub use cc::{CcList, CommandClasses, CommandRaw, CommandRegistry, KnownCommand, PayloadError};

// Re-export host boundary types
pub use host::{
    SecurityHost, SendCommandOptions, TransmitOptions, TransmitPriority, TransportError,
};

// Re-export S2 layer types
pub use s2::encapsulation::{
    requires_encapsulation, RxContext, Security2Encapsulation, TxContext, DECRYPT_ATTEMPTS,
};
pub use s2::manager::{SecurityManager2, SpanState, SPAN_GRACE};
pub use s2::{Security2Command, Security2CommandExt, SecurityError};

// Re-export crypto surface used by hosts and tests
pub use crypto::{CtrDrbg, NetworkKeys, TempNetworkKeys, SECURITY_S2_AUTH_TAG_LENGTH};

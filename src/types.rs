//! Core identifier and security-class types shared across the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Node / Home Identifiers
// ============================================================================

/// Identifier of a node on the network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u8);

impl NodeId {
    /// Create a new node ID.
    pub const fn new(id: u8) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub const fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

impl From<u8> for NodeId {
    fn from(id: u8) -> Self {
        Self(id)
    }
}

/// 32-bit network ("home") identifier shared by all nodes of one network.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HomeId(u32);

impl HomeId {
    /// Create a new home ID.
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value.
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for HomeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl From<u32> for HomeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Address of an endpoint on a node. Endpoint 0 is the root device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EndpointAddr {
    /// The node this endpoint belongs to.
    pub node_id: NodeId,
    /// Endpoint index; 0 is the root device.
    pub index: u8,
}

impl EndpointAddr {
    /// Create an endpoint address.
    pub fn new(node_id: NodeId, index: u8) -> Self {
        Self { node_id, index }
    }

    /// Root endpoint of a node.
    pub fn root(node_id: NodeId) -> Self {
        Self { node_id, index: 0 }
    }

    /// Check whether this is the root device.
    pub fn is_root(&self) -> bool {
        self.index == 0
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/ep{}", self.node_id, self.index)
    }
}

// ============================================================================
// Security Classes
// ============================================================================

/// Security class a node may hold keys for.
///
/// The S2 classes (`S2Unauthenticated`, `S2Authenticated`,
/// `S2AccessControl`) each come with their own network key. `Temporary`
/// marks the ephemeral key used during bootstrap, `None` marks a node
/// known to have no security class at all.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecurityClass {
    /// Legacy S0 security (key transfer only; no S0 codec in this crate).
    S0Legacy,
    /// S2 without authentication during inclusion.
    S2Unauthenticated,
    /// S2 with authenticated inclusion.
    S2Authenticated,
    /// S2 access control (door locks, garage doors).
    S2AccessControl,
    /// Bootstrap-time temporary key.
    Temporary,
    /// Known to have no security class.
    None,
}

/// Security classes ordered from highest to lowest preference.
pub const SECURITY_CLASS_ORDER: [SecurityClass; 4] = [
    SecurityClass::S2AccessControl,
    SecurityClass::S2Authenticated,
    SecurityClass::S2Unauthenticated,
    SecurityClass::S0Legacy,
];

impl SecurityClass {
    /// Check whether this is one of the three S2 classes.
    pub fn is_s2(&self) -> bool {
        matches!(
            self,
            SecurityClass::S2Unauthenticated
                | SecurityClass::S2Authenticated
                | SecurityClass::S2AccessControl
        )
    }

    /// Bit position of this class in KEX security-class bitmasks.
    ///
    /// The mask starts at `S2Unauthenticated` (bit 0); `S0Legacy` sits at
    /// bit 7. `Temporary` and `None` never appear on the wire.
    pub fn bit(&self) -> Option<u8> {
        match self {
            SecurityClass::S2Unauthenticated => Some(0),
            SecurityClass::S2Authenticated => Some(1),
            SecurityClass::S2AccessControl => Some(2),
            SecurityClass::S0Legacy => Some(7),
            SecurityClass::Temporary | SecurityClass::None => None,
        }
    }

    /// Inverse of [`SecurityClass::bit`].
    pub fn from_bit(bit: u8) -> Option<Self> {
        match bit {
            0 => Some(SecurityClass::S2Unauthenticated),
            1 => Some(SecurityClass::S2Authenticated),
            2 => Some(SecurityClass::S2AccessControl),
            7 => Some(SecurityClass::S0Legacy),
            _ => Option::None,
        }
    }

    /// Encode a set of classes as a single KEX bitmask byte.
    pub fn encode_mask(classes: &[SecurityClass]) -> u8 {
        let mut mask = 0u8;
        for class in classes {
            if let Some(bit) = class.bit() {
                mask |= 1 << bit;
            }
        }
        mask
    }

    /// Decode a KEX bitmask byte into classes, highest first.
    pub fn decode_mask(mask: u8) -> Vec<SecurityClass> {
        SECURITY_CLASS_ORDER
            .iter()
            .copied()
            .filter(|c| c.bit().is_some_and(|b| mask & (1 << b) != 0))
            .collect()
    }
}

impl fmt::Display for SecurityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SecurityClass::S0Legacy => "S0_Legacy",
            SecurityClass::S2Unauthenticated => "S2_Unauthenticated",
            SecurityClass::S2Authenticated => "S2_Authenticated",
            SecurityClass::S2AccessControl => "S2_AccessControl",
            SecurityClass::Temporary => "Temporary",
            SecurityClass::None => "None",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ===== SecurityClass Tests =====

    #[test]
    fn test_s2_predicate() {
        assert!(SecurityClass::S2Unauthenticated.is_s2());
        assert!(SecurityClass::S2Authenticated.is_s2());
        assert!(SecurityClass::S2AccessControl.is_s2());
        assert!(!SecurityClass::S0Legacy.is_s2());
        assert!(!SecurityClass::Temporary.is_s2());
        assert!(!SecurityClass::None.is_s2());
    }

    #[test]
    fn test_class_order_highest_first() {
        assert_eq!(SECURITY_CLASS_ORDER[0], SecurityClass::S2AccessControl);
        assert_eq!(SECURITY_CLASS_ORDER[3], SecurityClass::S0Legacy);
    }

    #[test]
    fn test_class_mask_roundtrip() {
        let classes = [
            SecurityClass::S2Unauthenticated,
            SecurityClass::S2AccessControl,
        ];
        let mask = SecurityClass::encode_mask(&classes);
        assert_eq!(mask, 0b0000_0101);

        let decoded = SecurityClass::decode_mask(mask);
        assert_eq!(
            decoded,
            vec![
                SecurityClass::S2AccessControl,
                SecurityClass::S2Unauthenticated
            ]
        );
    }

    #[test]
    fn test_s0_bit_position() {
        assert_eq!(SecurityClass::encode_mask(&[SecurityClass::S0Legacy]), 0x80);
    }

    #[test]
    fn test_temporary_has_no_bit() {
        assert_eq!(SecurityClass::Temporary.bit(), Option::None);
        assert_eq!(SecurityClass::encode_mask(&[SecurityClass::Temporary]), 0);
    }

    // ===== Identifier Tests =====

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new(5).to_string(), "node:5");
    }

    #[test]
    fn test_home_id_display() {
        assert_eq!(HomeId::new(0xDEADBEEF).to_string(), "deadbeef");
    }

    #[test]
    fn test_endpoint_root() {
        let ep = EndpointAddr::root(NodeId::new(7));
        assert!(ep.is_root());
        assert!(!EndpointAddr::new(NodeId::new(7), 2).is_root());
    }
}

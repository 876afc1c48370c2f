//! Contacts as known to the node directory.

use serde::{Deserialize, Serialize};

use crate::routing::RoutingDescriptor;
use crate::types::PublicKey;

/// The role a node advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Chat,
    Repeater,
    Room,
    Sensor,
}

/// A node the companion knows about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub public_key: PublicKey,
    pub name: String,
    pub kind: NodeKind,
    pub routing: RoutingDescriptor,
}

impl Contact {
    /// A room contact with flood routing.
    pub fn room(public_key: PublicKey, name: impl Into<String>) -> Self {
        Self {
            public_key,
            name: name.into(),
            kind: NodeKind::Room,
            routing: RoutingDescriptor::Flood,
        }
    }

    /// Replace the routing descriptor.
    pub fn with_routing(mut self, routing: RoutingDescriptor) -> Self {
        self.routing = routing;
        self
    }

    pub fn is_room(&self) -> bool {
        self.kind == NodeKind::Room
    }
}

//! # Core Types
//!
//! Fundamental identifiers and value types shared by every part of the world
//! server: entity identities, session identifiers, and spatial coordinates.
//!
//! Identities are stable across the lifetime of an entity. The numeric part is
//! assigned by the object store on first save; an id of zero means "not yet
//! persisted" and is never visible in the cache.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Id value of an entity that has not been persisted yet.
pub const UNASSIGNED_ID: u64 = 0;

/// The closed set of entity kinds the runtime manages.
///
/// Persistence adaptors and the object cache are keyed by this tag, so adding
/// a kind means extending every exhaustive `match` over it - deliberately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    /// A shared world object (props, artifacts, terrain markers).
    Object,
    /// A connected or persisted user, including remote servers.
    Client,
    /// A world - the container entities live in.
    World,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Object => write!(f, "Object"),
            EntityKind::Client => write!(f, "Client"),
            EntityKind::World => write!(f, "World"),
        }
    }
}

/// Stable key of a persisted entity: kind plus store-assigned numeric id.
///
/// The cache, ownership relations and event sources all reference entities
/// by this key rather than by any in-memory address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: EntityKind,
    pub id: u64,
}

impl Identity {
    pub fn new(kind: EntityKind, id: u64) -> Self {
        Self { kind, id }
    }

    pub fn object(id: u64) -> Self {
        Self::new(EntityKind::Object, id)
    }

    pub fn client(id: u64) -> Self {
        Self::new(EntityKind::Client, id)
    }

    pub fn world(id: u64) -> Self {
        Self::new(EntityKind::World, id)
    }

    /// True once the store has assigned a real id.
    pub fn is_assigned(&self) -> bool {
        self.id != UNASSIGNED_ID
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.kind, self.id)
    }
}

/// Unique identifier of one tracked session, minted when the session starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A position in world space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Inclusive axis-aligned box containment check.
    pub fn within(&self, from: &Point, to: &Point) -> bool {
        self.x >= from.x
            && self.x <= to.x
            && self.y >= from.y
            && self.y <= to.y
            && self.z >= from.z
            && self.z <= to.z
    }

    /// Corner of the box spanning `range` in every direction around this point.
    pub fn offset(&self, range: f64) -> Point {
        Point::new(self.x + range, self.y + range, self.z + range)
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.1}, {:.1}, {:.1})", self.x, self.y, self.z)
    }
}

/// Serialization perspective for entity snapshots.
///
/// `Owner` is the view a client gets of itself (private fields included),
/// `Public` is what everyone else sees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Public,
    Owner,
}

/// Current timestamp in seconds since the Unix epoch.
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_display() {
        assert_eq!(Identity::client(42).to_string(), "Client#42");
        assert_eq!(Identity::world(1).to_string(), "World#1");
    }

    #[test]
    fn identity_assignment() {
        assert!(!Identity::object(UNASSIGNED_ID).is_assigned());
        assert!(Identity::object(1).is_assigned());
    }

    #[test]
    fn point_distance() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(3.0, 4.0, 0.0);
        assert!((a.distance(&b) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn point_within_box() {
        let p = Point::new(1.0, 1.0, 1.0);
        let from = Point::new(0.0, 0.0, 0.0);
        let to = Point::new(2.0, 2.0, 2.0);
        assert!(p.within(&from, &to));
        assert!(!Point::new(3.0, 1.0, 1.0).within(&from, &to));
    }

    #[test]
    fn identity_serde_shape() {
        let id = Identity::client(7);
        let value = serde_json::to_value(id).unwrap();
        assert_eq!(value["kind"], "Client");
        assert_eq!(value["id"], 7);
    }
}

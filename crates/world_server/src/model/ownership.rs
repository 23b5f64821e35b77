//! Ownership relation between a client and an object it created.

use serde::{Deserialize, Serialize};

use crate::types::{Identity, UNASSIGNED_ID};

/// Persisted owner/owned relation.
///
/// Exactly one ownership exists per created object; removal and exit-time
/// cleanup are gated on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ownership {
    #[serde(default)]
    pub id: u64,
    pub owner: Identity,
    pub owned: Identity,
}

impl Ownership {
    pub fn new(owner: Identity, owned: Identity) -> Self {
        Self {
            id: UNASSIGNED_ID,
            owner,
            owned,
        }
    }
}

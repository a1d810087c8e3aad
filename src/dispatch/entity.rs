use serde::{Serialize, Serializer};
use std::fmt;

/// A monitored entity: one process, or the system as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    System,
    Process(u32),
}

impl EntityId {
    pub fn pid(self) -> Option<u32> {
        match self {
            EntityId::Process(pid) => Some(pid),
            EntityId::System => None,
        }
    }

    pub fn is_system(self) -> bool {
        self == EntityId::System
    }
}

/// `sys` for the system, the pid otherwise. Also the table-name prefix.
impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::System => f.write_str("sys"),
            EntityId::Process(pid) => write!(f, "{}", pid),
        }
    }
}

impl Serialize for EntityId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EntityId::System => serializer.serialize_str("sys"),
            EntityId::Process(pid) => serializer.serialize_u32(*pid),
        }
    }
}

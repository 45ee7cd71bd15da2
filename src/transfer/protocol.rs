use crate::pool::ProtocolInfo;

use super::Transfer;

/// Protocol specific hooks of a door.
///
/// The pool manager and the pool may need different descriptors: a door
/// typically hides relay details from the pool manager but passes the data
/// channel endpoint to the pool.
pub trait Protocol: Send + Sync {
    /// Descriptor used for pool selection.
    fn pool_manager_protocol_info(&self, transfer: &Transfer) -> ProtocolInfo;

    /// Descriptor used for starting a mover. Defaults to the pool manager's.
    fn pool_protocol_info(&self, transfer: &Transfer) -> ProtocolInfo {
        self.pool_manager_protocol_info(transfer)
    }
}

/// Protocol with a fixed name and version, reporting the client address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericProtocol {
    name: String,
    major_version: u32,
    minor_version: u32,
}

impl GenericProtocol {
    pub fn new(name: impl Into<String>, major_version: u32, minor_version: u32) -> Self {
        Self {
            name: name.into(),
            major_version,
            minor_version,
        }
    }
}

impl Protocol for GenericProtocol {
    fn pool_manager_protocol_info(&self, transfer: &Transfer) -> ProtocolInfo {
        ProtocolInfo::new(&self.name, self.major_version, self.minor_version)
            .with_client_address(transfer.client_address())
    }

    fn pool_protocol_info(&self, transfer: &Transfer) -> ProtocolInfo {
        self.pool_manager_protocol_info(transfer)
            .with_property("session", transfer.session_id().to_string())
    }
}

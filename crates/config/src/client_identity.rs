//! Runtime client identity type.
//!
//! Inserted into request extensions by whatever authenticates the caller, and
//! read back by the `identity` key strategy.

/// The authenticated caller, as seen by admission control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    /// Stable identifier of the caller (user id, API key id).
    pub client_id: String,
}

impl ClientIdentity {
    /// Identity for the given client id.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
        }
    }
}

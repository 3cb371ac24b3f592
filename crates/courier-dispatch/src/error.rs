use courier_core::channel::ChannelKind;
use courier_core::context::MissingAttribute;
use courier_core::ids::UserId;

use crate::shared_store::StoreUnavailable;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    MissingAttribute(#[from] MissingAttribute),

    #[error("channel {kind} not ready for key {key}")]
    NotReady { kind: ChannelKind, key: String },

    #[error("user {user_id} is not a participant of {scope}")]
    Forbidden { user_id: UserId, scope: String },

    #[error("malformed payload: {0}")]
    Serialization(String),

    #[error("storage failure: {0}")]
    Storage(String),

    #[error(transparent)]
    StoreUnavailable(#[from] StoreUnavailable),
}

impl From<serde_json::Error> for DispatchError {
    fn from(e: serde_json::Error) -> Self {
        DispatchError::Serialization(e.to_string())
    }
}

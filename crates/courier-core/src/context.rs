use std::collections::HashMap;

use crate::ids::UserId;

/// Attribute key carrying the conversation a socket is scoped to.
pub const ATTR_CONVERSATION_ID: &str = "conversationId";
/// Attribute key carrying the project a socket is scoped to.
pub const ATTR_PROJECT_ID: &str = "projectId";

/// Routing parameters for one socket connection, built from the handshake
/// path. Strategies fail fast when a required attribute is absent.
#[derive(Clone, Debug)]
pub struct DispatchContext {
    pub user_id: UserId,
    attributes: HashMap<String, String>,
}

impl DispatchContext {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            attributes: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn attr(&self, key: &str) -> Result<&str, MissingAttribute> {
        self.attributes
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| MissingAttribute(key.to_owned()))
    }
}

#[derive(Clone, Debug, thiserror::Error)]
#[error("missing attribute in dispatch context: {0}")]
pub struct MissingAttribute(pub String);

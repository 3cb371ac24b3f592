use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Declares a prefixed string id newtype. The payload is a UUIDv7, so ids
/// sort by creation time and the prefix keeps them greppable in logs.
macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh id.
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7()))
            }

            /// Adopt an id that arrived over the wire or out of the store.
            pub fn from_raw(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                $name::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok($name::from_raw(s))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }
    };
}

id_type!(UserId => "user");
id_type!(ConversationId => "conv");
id_type!(ProjectId => "proj");
id_type!(MessageId => "msg");
/// Identifies one live socket connection within the registry.
id_type!(SocketId => "sock");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minted_ids_carry_their_prefix() {
        assert!(UserId::new().as_str().starts_with("user_"));
        assert!(ConversationId::new().as_str().starts_with("conv_"));
        assert!(ProjectId::new().as_str().starts_with("proj_"));
        assert!(MessageId::new().as_str().starts_with("msg_"));
        assert!(SocketId::new().as_str().starts_with("sock_"));
        assert_eq!(SocketId::PREFIX, "sock");
    }

    #[test]
    fn minting_twice_never_collides() {
        assert_ne!(SocketId::new(), SocketId::new());
    }

    #[test]
    fn sequential_ids_sort_by_creation() {
        let earlier = MessageId::new();
        let later = MessageId::new();
        assert!(earlier.as_str() < later.as_str());
    }

    #[test]
    fn parse_round_trips_through_display() {
        let id = ConversationId::new();
        let parsed: ConversationId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn from_raw_keeps_the_given_value() {
        let id = UserId::from_raw("user_42");
        assert_eq!(id.as_str(), "user_42");
    }

    #[test]
    fn json_form_is_the_bare_string() {
        let id = UserId::from_raw("user_42");
        assert_eq!(serde_json::to_string(&id).unwrap(), r#""user_42""#);
        let back: UserId = serde_json::from_str(r#""user_42""#).unwrap();
        assert_eq!(back, id);
    }
}

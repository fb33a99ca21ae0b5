use serde::{Deserialize, Serialize};

/// Declares a transparent numeric identifier.
///
/// The game API hands out plain integers for every entity; wrapping them
/// keeps server, continent, and base IDs from being mixed up.
macro_rules! numeric_id {
    ($(#[$meta:meta])* $name:ident($inner:ty)) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates the identifier from its raw value.
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw value.
            pub const fn get(&self) -> $inner {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<$inner> for $name {
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

numeric_id!(
    /// A game server (the game calls these "worlds").
    ServerId(i32)
);
numeric_id!(
    /// A continent (the game calls these "zones").
    ContinentId(i32)
);
numeric_id!(
    /// A capturable map base (the game calls these "facilities" or "regions").
    BaseId(i32)
);
numeric_id!(
    /// A player character.
    PlayerId(i64)
);
numeric_id!(
    /// The metagame event type that started an alert.
    AlertId(i32)
);

/// Logical key of a base ownership record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BaseKey {
    pub server_id: ServerId,
    pub base_id: BaseId,
}

impl BaseKey {
    pub fn new(server_id: ServerId, base_id: BaseId) -> Self {
        Self { server_id, base_id }
    }
}

/// Logical key of a player presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerKey {
    pub server_id: ServerId,
    pub player_id: PlayerId,
}

impl PlayerKey {
    pub fn new(server_id: ServerId, player_id: PlayerId) -> Self {
        Self {
            server_id,
            player_id,
        }
    }
}

/// Logical key of a continent alert record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContinentKey {
    pub server_id: ServerId,
    pub continent_id: ContinentId,
}

impl ContinentKey {
    pub fn new(server_id: ServerId, continent_id: ContinentId) -> Self {
        Self {
            server_id,
            continent_id,
        }
    }
}

impl std::fmt::Display for ContinentKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.server_id, self.continent_id)
    }
}

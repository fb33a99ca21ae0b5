//! Event categories.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The category of a buffered event.
///
/// Every category has its own buffer table; the category of an event is
/// fixed by the table it was claimed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    /// A base changed hands.
    BaseControl,
    /// A player was seen at a base.
    PlayerBlip,
    /// A continent alert started or ended.
    ContinentAlert,
}

impl EventCategory {
    /// All known categories, in claim order.
    pub const ALL: [EventCategory; 3] = [
        EventCategory::BaseControl,
        EventCategory::PlayerBlip,
        EventCategory::ContinentAlert,
    ];

    /// Returns the category name as used in configuration and metrics labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::BaseControl => "base_control",
            EventCategory::PlayerBlip => "player_blip",
            EventCategory::ContinentAlert => "continent_alert",
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Raised when parsing a category name that does not exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownCategoryName(pub String);

impl std::fmt::Display for UnknownCategoryName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event category '{}'", self.0)
    }
}

impl std::error::Error for UnknownCategoryName {}

impl FromStr for EventCategory {
    type Err = UnknownCategoryName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventCategory::ALL
            .into_iter()
            .find(|category| category.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownCategoryName(s.trim().to_string()))
    }
}

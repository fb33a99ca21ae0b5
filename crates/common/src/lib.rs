//! Shared identifiers and game constants.
//!
//! Every crate in the workspace speaks in terms of these newtypes so that a
//! base ID can never be passed where a continent ID is expected.

pub mod category;
pub mod faction;
pub mod types;

pub use category::{EventCategory, UnknownCategoryName};
pub use faction::{Faction, InvalidFaction};
pub use types::{
    AlertId, BaseId, BaseKey, ContinentId, ContinentKey, PlayerId, PlayerKey, ServerId,
};

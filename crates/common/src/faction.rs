//! Playable factions (empires).

use serde::{Deserialize, Serialize};

/// A game faction.
///
/// `None` is used by the game for bases that are not owned by anyone, e.g.
/// during continent lock transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(try_from = "i16", into = "i16")]
pub enum Faction {
    #[default]
    None,
    Vs,
    Nc,
    Tr,
    Nso,
}

/// Raised for faction IDs the game does not define.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidFaction(pub i16);

impl std::fmt::Display for InvalidFaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid faction ID '{}'", self.0)
    }
}

impl std::error::Error for InvalidFaction {}

impl Faction {
    /// Returns the faction's numeric ID as used by the game API.
    pub fn id(&self) -> i16 {
        match self {
            Faction::None => 0,
            Faction::Vs => 1,
            Faction::Nc => 2,
            Faction::Tr => 3,
            Faction::Nso => 4,
        }
    }

    /// Returns the full display name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Faction::None => "None",
            Faction::Vs => "Vanu Sovereignty",
            Faction::Nc => "New Conglomerate",
            Faction::Tr => "Terran Republic",
            Faction::Nso => "Nanite Systems Operatives",
        }
    }

    /// Returns the short tag shown on the map.
    pub fn tag(&self) -> &'static str {
        match self {
            Faction::None => "N/A",
            Faction::Vs => "VS",
            Faction::Nc => "NC",
            Faction::Tr => "TR",
            Faction::Nso => "NSO",
        }
    }
}

impl TryFrom<i16> for Faction {
    type Error = InvalidFaction;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Faction::None),
            1 => Ok(Faction::Vs),
            2 => Ok(Faction::Nc),
            3 => Ok(Faction::Tr),
            4 => Ok(Faction::Nso),
            other => Err(InvalidFaction(other)),
        }
    }
}

impl From<Faction> for i16 {
    fn from(faction: Faction) -> Self {
        faction.id()
    }
}

impl std::fmt::Display for Faction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

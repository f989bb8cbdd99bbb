use serde::{Deserialize, Serialize};

/// One of the two isolated business brands sharing the platform.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Entity {
    Zr7,
    Mdl,
}

impl Entity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Zr7 => "ZR7",
            Self::Mdl => "MDL",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ZR7" => Some(Self::Zr7),
            "MDL" => Some(Self::Mdl),
            _ => None,
        }
    }

    /// The counterpart brand. Well-defined because the platform is a
    /// strict two-entity model.
    pub fn other(&self) -> Self {
        match self {
            Self::Zr7 => Self::Mdl,
            Self::Mdl => Self::Zr7,
        }
    }
}

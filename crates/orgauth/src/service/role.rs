use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

/// Role of an identity within one organization.
///
/// Roles form a hierarchy: `Admin` includes `Editor`, which includes `Viewer`.
/// `None` is a member without any implicit privileges.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::EnumIter,
    Serialize,
)]
#[strum(ascii_case_insensitive)]
pub enum OrgRole {
    #[default]
    None,
    Viewer,
    Editor,
    Admin,
}

const ROLE_NAMES: &[&str] = &["None", "Viewer", "Editor", "Admin"];

impl<'de> Deserialize<'de> for OrgRole {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        OrgRole::from_str(&raw).map_err(|_| serde::de::Error::unknown_variant(&raw, ROLE_NAMES))
    }
}

impl OrgRole {
    fn rank(self) -> u8 {
        match self {
            OrgRole::None => 0,
            OrgRole::Viewer => 1,
            OrgRole::Editor => 2,
            OrgRole::Admin => 3,
        }
    }

    /// Whether holding `self` grants everything `other` grants.
    #[must_use]
    pub fn includes(self, other: OrgRole) -> bool {
        if other == OrgRole::None {
            return true;
        }
        self.rank() >= other.rank()
    }
}

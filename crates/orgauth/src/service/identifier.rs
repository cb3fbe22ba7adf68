use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use super::error::InvalidIdentifier;

/// Numeric organization identifier. `0` is reserved for the global scope.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct OrgId(i64);

impl OrgId {
    /// Scope of permissions that apply across all organizations.
    pub const GLOBAL: OrgId = OrgId(0);

    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for OrgId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<i64>().map(OrgId)
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::From,
    derive_more::Display,
)]
#[serde(transparent)]
pub struct UserId(i64);

impl UserId {
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    strum_macros::Display,
    strum_macros::EnumString,
    strum_macros::AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
pub enum Namespace {
    User,
    ServiceAccount,
    ApiKey,
    Anonymous,
    Render,
}

impl Namespace {
    /// Whether identifiers in this namespace are persisted entities with a stable numeric id.
    #[must_use]
    pub fn has_unique_ids(self) -> bool {
        matches!(
            self,
            Namespace::User | Namespace::ServiceAccount | Namespace::ApiKey
        )
    }
}

/// Identifier rendered as `<namespace>:<id>`, e.g. `user:42` or `anonymous:0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespacedId {
    namespace: Namespace,
    id: String,
}

impl NamespacedId {
    pub fn new(namespace: Namespace, id: impl Into<String>) -> Self {
        Self {
            namespace,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn user(id: UserId) -> Self {
        Self::new(Namespace::User, id.to_string())
    }

    /// The single identifier shared by every anonymous session.
    #[must_use]
    pub fn anonymous() -> Self {
        Self::new(Namespace::Anonymous, "0")
    }

    #[must_use]
    pub fn namespace(&self) -> Namespace {
        self.namespace
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn is_namespace(&self, namespace: Namespace) -> bool {
        self.namespace == namespace
    }

    pub fn parse_i64(&self) -> Result<i64, InvalidIdentifier> {
        self.id
            .parse::<i64>()
            .map_err(|e| InvalidIdentifier::new(self.to_string(), e.to_string()))
    }

    /// Numeric id of a persisted user or service account.
    pub fn user_id(&self) -> Result<UserId, InvalidIdentifier> {
        match self.namespace {
            Namespace::User | Namespace::ServiceAccount => self.parse_i64().map(UserId::new),
            _ => Err(InvalidIdentifier::new(
                self.to_string(),
                "namespace does not identify a user",
            )),
        }
    }
}

impl Display for NamespacedId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.id)
    }
}

impl FromStr for NamespacedId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((namespace, id)) = s.split_once(':') else {
            return Err(InvalidIdentifier::new(s, "expected `<namespace>:<id>`"));
        };
        let namespace = Namespace::from_str(namespace)
            .map_err(|_| InvalidIdentifier::new(s, format!("unknown namespace `{namespace}`")))?;
        if id.is_empty() {
            return Err(InvalidIdentifier::new(s, "identifier is empty"));
        }
        Ok(Self::new(namespace, id))
    }
}

impl Serialize for NamespacedId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for NamespacedId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        NamespacedId::from_str(&s).map_err(serde::de::Error::custom)
    }
}

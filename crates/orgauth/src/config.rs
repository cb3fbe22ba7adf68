use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Deserializer, Serialize};
use veil::Redact;

use crate::service::{OrgId, OrgRole};

#[derive(Clone, Deserialize, Serialize, Debug, Default, PartialEq)]
pub struct AuthnConfig {
    // ------------- ANONYMOUS -------------
    #[serde(default)]
    pub anonymous: AnonymousConfig,
    // ------------- CLAIMS TOKEN -------------
    #[serde(default)]
    pub jwt: JwtConfig,
    // ------------- LOGIN -------------
    /// Organization every persisted user is switched to after login,
    /// if they are a member of it. Values below `1` disable the behavior.
    #[serde(default)]
    pub login_default_org_id: Option<OrgId>,
}

impl AuthnConfig {
    /// Load defaults merged with `ORGAUTH__` environment variables,
    /// e.g. `ORGAUTH__JWT__HEADER_NAME`.
    pub fn load() -> Result<Self, figment::Error> {
        get_config()
    }

    /// Configured default organization, if it is a valid organization id.
    #[must_use]
    pub fn default_org_id(&self) -> Option<OrgId> {
        self.login_default_org_id.filter(|id| id.get() >= 1)
    }
}

fn get_config() -> Result<AuthnConfig, figment::Error> {
    let defaults = figment::providers::Serialized::defaults(AuthnConfig::default());

    #[cfg(not(test))]
    let prefixes = &["ORGAUTH__"];
    #[cfg(test)]
    let prefixes = &["ORGAUTH_TEST__"];

    let mut config = figment::Figment::from(defaults);
    for prefix in prefixes {
        let env = figment::providers::Env::prefixed(prefix).split("__");
        config = config.merge(env);
    }

    config.extract::<AuthnConfig>()
}

#[derive(Clone, Deserialize, Serialize, Debug, PartialEq)]
#[serde(default)]
pub struct AnonymousConfig {
    pub enabled: bool,
    /// Organization anonymous sessions act in. Must exist.
    pub org_name: String,
    pub org_role: OrgRole,
    /// Maximum number of distinct anonymous devices. Unlimited if unset.
    pub device_limit: Option<usize>,
}

impl Default for AnonymousConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            org_name: "Main Org.".to_string(),
            org_role: OrgRole::Viewer,
            device_limit: None,
        }
    }
}

#[allow(clippy::struct_excessive_bools)]
#[derive(Clone, Deserialize, Serialize, PartialEq, Redact)]
#[serde(default)]
pub struct JwtConfig {
    pub enabled: bool,
    /// Header the token is read from. Claims-token authentication is off if empty.
    pub header_name: String,
    /// Also accept the token from the `auth_token` query parameter.
    pub url_login: bool,
    pub username_claim: String,
    pub email_claim: String,
    /// Dotted path into the claims, used if `username_claim` is empty.
    pub username_attribute_path: String,
    pub email_attribute_path: String,
    pub auto_sign_up: bool,
    pub role_attribute_path: String,
    pub role_attribute_strict: bool,
    pub allow_assign_server_admin: bool,
    pub skip_org_role_sync: bool,
    pub groups_attribute_path: String,
    /// Whitespace separated `pattern:Role` entries, applied in order.
    /// Without entries, role strings are read as `<scope>:<org>:<role>`.
    #[serde(
        deserialize_with = "deserialize_org_role_mapper",
        serialize_with = "serialize_org_role_mapper"
    )]
    pub regex_org_role_mapper: Vec<OrgRoleMapping>,
    /// JSON object of claims a verified token must carry with exactly these values.
    pub expect_claims: String,
    /// PEM encoded public key used to verify tokens.
    pub key_file: Option<std::path::PathBuf>,
    /// HMAC secret used to verify tokens if no key file is configured.
    #[redact]
    pub key_secret: Option<String>,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            header_name: String::new(),
            url_login: false,
            username_claim: String::new(),
            email_claim: String::new(),
            username_attribute_path: String::new(),
            email_attribute_path: String::new(),
            auto_sign_up: false,
            role_attribute_path: String::new(),
            role_attribute_strict: false,
            allow_assign_server_admin: false,
            skip_org_role_sync: false,
            groups_attribute_path: String::new(),
            regex_org_role_mapper: Vec::new(),
            expect_claims: "{}".to_string(),
            key_file: None,
            key_secret: None,
        }
    }
}

/// One `pattern:Role` entry of the regex organization role mapper.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrgRoleMapping {
    pub pattern: String,
    pub role: OrgRole,
}

impl FromStr for OrgRoleMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (pattern, role) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("Org role mapping `{s}` must have the form `pattern:Role`"))?;
        if pattern.is_empty() {
            return Err(format!("Org role mapping `{s}` has an empty pattern"));
        }
        let role = OrgRole::from_str(role)
            .map_err(|_| format!("Org role mapping `{s}` has unknown role `{role}`"))?;
        Ok(Self {
            pattern: pattern.to_string(),
            role,
        })
    }
}

impl Display for OrgRoleMapping {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.pattern, self.role)
    }
}

fn deserialize_org_role_mapper<'de, D>(deserializer: D) -> Result<Vec<OrgRoleMapping>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.split_whitespace()
        .map(|entry| OrgRoleMapping::from_str(entry).map_err(serde::de::Error::custom))
        .collect()
}

#[allow(clippy::ptr_arg)]
fn serialize_org_role_mapper<S>(value: &Vec<OrgRoleMapping>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    value
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
        .serialize(serializer)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = get_config().unwrap();
            assert_eq!(config, AuthnConfig::default());
            assert!(!config.anonymous.enabled);
            assert_eq!(config.anonymous.org_name, "Main Org.");
            assert_eq!(config.anonymous.org_role, OrgRole::Viewer);
            assert_eq!(config.jwt.expect_claims, "{}");
            assert!(config.default_org_id().is_none());
            Ok(())
        });
    }

    #[test]
    fn test_env_overrides() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ORGAUTH_TEST__ANONYMOUS__ENABLED", "true");
            jail.set_env("ORGAUTH_TEST__ANONYMOUS__ORG_ROLE", "Editor");
            jail.set_env("ORGAUTH_TEST__ANONYMOUS__DEVICE_LIMIT", "5");
            jail.set_env("ORGAUTH_TEST__JWT__ENABLED", "true");
            jail.set_env("ORGAUTH_TEST__JWT__HEADER_NAME", "X-JWT-Assertion");
            jail.set_env("ORGAUTH_TEST__JWT__ROLE_ATTRIBUTE_PATH", "roles");
            jail.set_env("ORGAUTH_TEST__LOGIN_DEFAULT_ORG_ID", "2");
            let config = get_config().unwrap();
            assert!(config.anonymous.enabled);
            assert_eq!(config.anonymous.org_role, OrgRole::Editor);
            assert_eq!(config.anonymous.device_limit, Some(5));
            assert!(config.jwt.enabled);
            assert_eq!(config.jwt.header_name, "X-JWT-Assertion");
            assert_eq!(config.jwt.role_attribute_path, "roles");
            assert_eq!(config.default_org_id(), Some(OrgId::new(2)));
            Ok(())
        });
    }

    #[test]
    fn test_default_org_below_one_is_disabled() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ORGAUTH_TEST__LOGIN_DEFAULT_ORG_ID", "0");
            let config = get_config().unwrap();
            assert_eq!(config.login_default_org_id, Some(OrgId::new(0)));
            assert!(config.default_org_id().is_none());
            Ok(())
        });
    }

    #[test]
    fn test_org_role_env_is_case_insensitive() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ORGAUTH_TEST__ANONYMOUS__ORG_ROLE", "editor");
            let config = get_config().unwrap();
            assert_eq!(config.anonymous.org_role, OrgRole::Editor);
            Ok(())
        });
    }

    #[test]
    fn test_regex_org_role_mapper_keeps_order_and_splits_at_last_colon() {
        figment::Jail::expect_with(|jail| {
            jail.set_env(
                "ORGAUTH_TEST__JWT__REGEX_ORG_ROLE_MAPPER",
                "eng:(?P<org>[^:]+):admin:Editor  ops:(?P<org>[^:]+):viewer:Viewer",
            );
            let config = get_config().unwrap();
            assert_eq!(
                config.jwt.regex_org_role_mapper,
                vec![
                    OrgRoleMapping {
                        pattern: "eng:(?P<org>[^:]+):admin".to_string(),
                        role: OrgRole::Editor,
                    },
                    OrgRoleMapping {
                        pattern: "ops:(?P<org>[^:]+):viewer".to_string(),
                        role: OrgRole::Viewer,
                    },
                ]
            );
            Ok(())
        });
    }

    #[test]
    fn test_regex_org_role_mapper_rejects_unknown_role() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("ORGAUTH_TEST__JWT__REGEX_ORG_ROLE_MAPPER", "eng:(?P<org>.+):Owner");
            assert!(get_config().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_key_secret_is_redacted() {
        let config = JwtConfig {
            key_secret: Some("super-secret".to_string()),
            ..Default::default()
        };
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}

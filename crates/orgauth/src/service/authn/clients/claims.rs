use std::collections::BTreeMap;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use regex::Regex;
use serde_json::Value;

use crate::{
    OrgRoleMapping,
    service::{
        Claims, OrgRole,
        error::{InvalidClaim, InvalidConfiguration},
    },
};

/// Whether the payload of an unverified JWT carries a non-empty `sub` claim.
///
/// No signature verification happens here.
#[must_use]
pub fn has_sub_claim(token: &str) -> bool {
    let Some(payload) = token.split('.').nth(1) else {
        return false;
    };
    let Ok(decoded) = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) else {
        return false;
    };
    let Ok(claims) = serde_json::from_slice::<Claims>(&decoded) else {
        return false;
    };
    claims
        .get("sub")
        .and_then(Value::as_str)
        .is_some_and(|sub| !sub.is_empty())
}

/// Look up a value by dotted path, e.g. `realm_access.roles`.
/// A top-level key equal to the whole path takes precedence.
#[must_use]
pub fn search_value<'a>(path: &str, claims: &'a Claims) -> Option<&'a Value> {
    if let Some(value) = claims.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = claims.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// String at `path`. Missing or `null` yields an empty string.
pub fn search_string(path: &str, claims: &Claims) -> Result<String, InvalidClaim> {
    match search_value(path, claims) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => Err(InvalidClaim::new(
            path,
            format!("expected a string, found {}", json_type(other)),
        )),
    }
}

/// List of strings at `path`. A single string is a one-element list,
/// missing or `null` is an empty list.
pub fn search_string_list(path: &str, claims: &Claims) -> Result<Vec<String>, InvalidClaim> {
    match search_value(path, claims) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::String(s)) => Ok(vec![s.clone()]),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => Ok(s.clone()),
                other => Err(InvalidClaim::new(
                    path,
                    format!("expected a list of strings, found {} item", json_type(other)),
                )),
            })
            .collect(),
        Some(other) => Err(InvalidClaim::new(
            path,
            format!("expected a list of strings, found {}", json_type(other)),
        )),
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Maps role strings asserted by a token to organization roles.
#[derive(Debug, Clone)]
pub enum OrgRoleMapper {
    /// `<scope>:<org>:<role>` where `admin` maps to Editor and `viewer` to Viewer.
    /// Every other suffix is dropped.
    Static,
    /// Patterns with a named group `org`, tried in configuration order.
    Regex(Vec<RegexOrgRoleMapping>),
}

#[derive(Debug, Clone)]
pub struct RegexOrgRoleMapping {
    pub pattern: Regex,
    pub role: OrgRole,
}

impl OrgRoleMapper {
    pub fn from_config(mappings: &[OrgRoleMapping]) -> Result<Self, InvalidConfiguration> {
        if mappings.is_empty() {
            return Ok(Self::Static);
        }

        mappings
            .iter()
            .map(|m| {
                let pattern = Regex::new(&m.pattern).map_err(|e| {
                    InvalidConfiguration::new("jwt.regex_org_role_mapper", e.to_string())
                })?;
                if !pattern.capture_names().flatten().any(|n| n == "org") {
                    return Err(InvalidConfiguration::new(
                        "jwt.regex_org_role_mapper",
                        format!("pattern `{}` has no named group `org`", m.pattern),
                    ));
                }
                Ok(RegexOrgRoleMapping {
                    pattern,
                    role: m.role,
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self::Regex)
    }

    /// Organization name to role. For every organization the first match wins.
    #[must_use]
    pub fn map_roles(&self, roles: &[String]) -> BTreeMap<String, OrgRole> {
        let mut result = BTreeMap::new();
        match self {
            OrgRoleMapper::Static => {
                for role in roles {
                    let parts: Vec<&str> = role.split(':').collect();
                    let [_, org, suffix] = parts.as_slice() else {
                        continue;
                    };
                    let mapped = match *suffix {
                        "admin" => OrgRole::Editor,
                        "viewer" => OrgRole::Viewer,
                        _ => continue,
                    };
                    result.insert((*org).to_string(), mapped);
                }
            }
            OrgRoleMapper::Regex(mappings) => {
                for role in roles {
                    for mapping in mappings {
                        let Some(org) = mapping
                            .pattern
                            .captures(role)
                            .and_then(|caps| caps.name("org"))
                        else {
                            continue;
                        };
                        if org.as_str().is_empty() {
                            continue;
                        }
                        result
                            .entry(org.as_str().to_string())
                            .or_insert(mapping.role);
                    }
                }
            }
        }
        result
    }
}

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use orgauth::{implementations::DirectoryFixture, service::Claims};
use serde::Deserialize;

/// Directory state and known tokens the `authenticate` command runs against.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Fixture {
    #[serde(flatten)]
    pub(crate) directory: DirectoryFixture,
    /// Token to claims, accepted if no key file or secret is configured.
    pub(crate) tokens: HashMap<String, Claims>,
}

impl Fixture {
    pub(crate) fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture `{}`", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse fixture `{}`", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use orgauth::{OrgId, UserId};
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_load_fixture() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "orgs": [{{"id": 1, "name": "Main Org."}}],
                "users": [{{"id": 4, "login": "alice", "email": "alice@example.com"}}],
                "memberships": [{{"org_id": 1, "user_id": 4, "role": "Editor"}}],
                "tokens": {{"abc": {{"sub": "alice"}}}}
            }}"#
        )
        .unwrap();

        let fixture = Fixture::load(file.path()).unwrap();
        assert_eq!(fixture.directory.orgs[0].id, OrgId::new(1));
        assert_eq!(fixture.directory.users[0].id, UserId::new(4));
        assert_eq!(fixture.directory.memberships.len(), 1);
        assert_eq!(fixture.tokens["abc"]["sub"], "alice");
    }

    #[test]
    fn test_sections_are_optional() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        let fixture = Fixture::load(file.path()).unwrap();
        assert!(fixture.directory.orgs.is_empty());
        assert!(fixture.tokens.is_empty());
    }

    #[test]
    fn test_invalid_fixture_names_the_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "[]").unwrap();
        let err = Fixture::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("Failed to parse fixture"));
    }
}

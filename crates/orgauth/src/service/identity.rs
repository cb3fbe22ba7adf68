use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use super::{Namespace, NamespacedId, OrgId, OrgRole};

/// Action to ordered list of scopes.
pub type ActionScopes = HashMap<String, Vec<String>>;

/// Organization id (`OrgId::GLOBAL` for global permissions) to action scopes.
pub type Permissions = HashMap<OrgId, ActionScopes>;

/// Hints used by the user lookup hook to find the persisted user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupParams {
    pub login: Option<String>,
    pub email: Option<String>,
}

/// Instructions from the authenticating client to the hooks that run afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[allow(clippy::struct_excessive_bools)]
pub struct ClientParams {
    pub sync_user: bool,
    pub fetch_synced_user: bool,
    pub sync_permissions: bool,
    pub sync_org_roles: bool,
    pub sync_teams: bool,
    pub allow_sign_up: bool,
    pub lookup_params: LookupParams,
}

/// Canonical representation of an authenticated principal for the duration of one request.
#[derive(Debug, Clone, PartialEq, TypedBuilder, Serialize, Deserialize)]
pub struct Identity {
    /// Empty until the principal has been matched to a persisted entity,
    /// unless the namespace is non-persistent (anonymous, render).
    #[builder(default, setter(strip_option))]
    pub id: Option<NamespacedId>,
    #[builder(default, setter(strip_option, into))]
    pub uid: Option<String>,
    #[builder(default)]
    pub org_id: OrgId,
    #[builder(default, setter(into))]
    pub org_name: String,
    /// Organization name to role, as asserted by the authenticating client.
    /// Empty means "do not touch memberships".
    #[builder(default)]
    pub org_roles: BTreeMap<String, OrgRole>,
    #[builder(default, setter(into))]
    pub login: String,
    #[builder(default, setter(into))]
    pub name: String,
    #[builder(default, setter(into))]
    pub email: String,
    #[builder(default)]
    pub email_verified: bool,
    /// `None` means unknown; a stored value must not be overwritten.
    #[builder(default, setter(strip_option))]
    pub is_server_admin: Option<bool>,
    #[builder(default, setter(into))]
    pub authenticated_by: String,
    #[builder(default, setter(into))]
    pub auth_id: String,
    #[builder(default)]
    pub is_disabled: bool,
    #[builder(default)]
    pub teams: Vec<i64>,
    #[builder(default)]
    pub groups: Vec<String>,
    #[builder(default)]
    pub client_params: ClientParams,
    #[builder(default)]
    pub permissions: Permissions,
    #[builder(default, setter(strip_option, into))]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

impl Identity {
    #[must_use]
    pub fn namespace(&self) -> Option<Namespace> {
        self.id.as_ref().map(NamespacedId::namespace)
    }

    #[must_use]
    pub fn is_namespace(&self, namespace: Namespace) -> bool {
        self.namespace() == Some(namespace)
    }

    #[must_use]
    pub fn is_anonymous(&self) -> bool {
        self.is_namespace(Namespace::Anonymous)
    }

    /// Whether the identifier refers to exactly one persisted entity.
    #[must_use]
    pub fn has_unique_id(&self) -> bool {
        self.namespace().is_some_and(Namespace::has_unique_ids)
    }

    /// Key for caching per-identity data.
    ///
    /// Identities without a unique id share one entry per organization and role.
    #[must_use]
    pub fn cache_key(&self) -> String {
        let namespace = self
            .namespace()
            .map(|ns| ns.to_string())
            .unwrap_or_default();
        let id = if self.has_unique_id() {
            self.id
                .as_ref()
                .map(|id| id.id().to_string())
                .unwrap_or_default()
        } else {
            self.org_role().to_string()
        };
        format!("{}-{namespace}-{id}", self.org_id)
    }

    /// Role within the organization the identity is currently acting in.
    #[must_use]
    pub fn org_role(&self) -> OrgRole {
        self.org_roles
            .get(&self.org_name)
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn server_admin(&self) -> bool {
        self.is_server_admin.unwrap_or(false)
    }

    #[must_use]
    pub fn has_role(&self, role: OrgRole) -> bool {
        if self.server_admin() {
            return true;
        }
        self.org_role().includes(role)
    }

    #[must_use]
    pub fn permissions(&self) -> ActionScopes {
        self.permissions
            .get(&self.org_id)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn global_permissions(&self) -> ActionScopes {
        self.permissions
            .get(&OrgId::GLOBAL)
            .cloned()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_authenticated_by(&self, providers: &[&str]) -> bool {
        providers.iter().any(|p| *p == self.authenticated_by)
    }
}

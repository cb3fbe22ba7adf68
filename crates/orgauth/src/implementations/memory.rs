use std::{
    collections::{BTreeMap, HashMap},
    fmt::{Debug, Formatter},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::service::{
    ActionScopes, Claims, DeviceInfo, DeviceKind, DeviceStore, LookupParams, MembershipService,
    NewUser, Org, OrgDirectory, OrgId, OrgMembership, OrgRole, PermissionStore,
    TokenVerificationError, TokenVerifier, User, UserDirectory, UserId,
    error::{
        AddMembershipError, BackendError, DeviceLimitReached, LastOrgAdmin, OrgLookupError,
        OrganizationNotFound, RemoveMembershipError, TagDeviceError,
    },
};

/// Seed data for an [`InMemoryDirectory`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryFixture {
    pub orgs: Vec<Org>,
    pub users: Vec<User>,
    pub memberships: Vec<OrgMembership>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    orgs: BTreeMap<OrgId, Org>,
    users: BTreeMap<UserId, User>,
    memberships: BTreeMap<(UserId, OrgId), OrgRole>,
    permissions: BTreeMap<(OrgId, UserId), ActionScopes>,
    mutations: usize,
}

impl DirectoryState {
    fn admin_count(&self, org_id: OrgId) -> usize {
        self.memberships
            .iter()
            .filter(|((_, o), role)| *o == org_id && **role == OrgRole::Admin)
            .count()
    }
}

/// Organizations, users, memberships and permissions held in process memory.
///
/// Implements [`MembershipService`], [`OrgDirectory`], [`UserDirectory`] and [`PermissionStore`].
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_fixture(fixture: DirectoryFixture) -> Self {
        let state = DirectoryState {
            orgs: fixture.orgs.into_iter().map(|o| (o.id, o)).collect(),
            users: fixture.users.into_iter().map(|u| (u.id, u)).collect(),
            memberships: fixture
                .memberships
                .into_iter()
                .map(|m| ((m.user_id, m.org_id), m.role))
                .collect(),
            ..Default::default()
        };
        Self {
            state: RwLock::new(state),
        }
    }

    pub async fn insert_org(&self, org: Org) {
        self.state.write().await.orgs.insert(org.id, org);
    }

    pub async fn insert_user(&self, user: User) {
        self.state.write().await.users.insert(user.id, user);
    }

    pub async fn insert_membership(&self, membership: OrgMembership) {
        self.state
            .write()
            .await
            .memberships
            .insert((membership.user_id, membership.org_id), membership.role);
    }

    pub async fn grant_permissions(&self, org_id: OrgId, user_id: UserId, scopes: ActionScopes) {
        self.state
            .write()
            .await
            .permissions
            .insert((org_id, user_id), scopes);
    }

    pub async fn user_permissions(&self, org_id: OrgId, user_id: UserId) -> Option<ActionScopes> {
        self.state
            .read()
            .await
            .permissions
            .get(&(org_id, user_id))
            .cloned()
    }

    pub async fn user(&self, user_id: UserId) -> Option<User> {
        self.state.read().await.users.get(&user_id).cloned()
    }

    /// All memberships, ordered by user and organization.
    pub async fn memberships(&self) -> Vec<OrgMembership> {
        self.state
            .read()
            .await
            .memberships
            .iter()
            .map(|(&(user_id, org_id), &role)| OrgMembership {
                org_id,
                user_id,
                role,
            })
            .collect()
    }

    /// Number of successful write operations issued through the service traits.
    pub async fn mutation_count(&self) -> usize {
        self.state.read().await.mutations
    }
}

#[async_trait]
impl MembershipService for InMemoryDirectory {
    async fn list_user_memberships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<OrgMembership>, BackendError> {
        Ok(self
            .state
            .read()
            .await
            .memberships
            .iter()
            .filter(|((u, _), _)| *u == user_id)
            .map(|(&(user_id, org_id), &role)| OrgMembership {
                org_id,
                user_id,
                role,
            })
            .collect())
    }

    async fn add_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
        role: OrgRole,
    ) -> Result<(), AddMembershipError> {
        let mut state = self.state.write().await;
        if !state.orgs.contains_key(&org_id) {
            return Err(OrganizationNotFound::by_id(org_id).into());
        }
        state.memberships.insert((user_id, org_id), role);
        state.mutations += 1;
        Ok(())
    }

    async fn update_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
        role: OrgRole,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        let Some(current) = state.memberships.get_mut(&(user_id, org_id)) else {
            return Err(BackendError::message(format!(
                "User {user_id} is not a member of organization {org_id}"
            )));
        };
        *current = role;
        state.mutations += 1;
        Ok(())
    }

    async fn remove_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<(), RemoveMembershipError> {
        let mut state = self.state.write().await;
        let Some(role) = state.memberships.get(&(user_id, org_id)).copied() else {
            return Ok(());
        };
        if role == OrgRole::Admin && state.admin_count(org_id) <= 1 {
            return Err(LastOrgAdmin::new(org_id).into());
        }
        state.memberships.remove(&(user_id, org_id));
        state.mutations += 1;
        Ok(())
    }
}

#[async_trait]
impl OrgDirectory for InMemoryDirectory {
    async fn get_by_name(&self, name: &str) -> Result<Org, OrgLookupError> {
        self.state
            .read()
            .await
            .orgs
            .values()
            .find(|org| org.name == name)
            .cloned()
            .ok_or_else(|| OrganizationNotFound::by_name(name).into())
    }

    async fn get_by_id(&self, id: OrgId) -> Result<Org, OrgLookupError> {
        self.state
            .read()
            .await
            .orgs
            .get(&id)
            .cloned()
            .ok_or_else(|| OrganizationNotFound::by_id(id).into())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn set_active_org(&self, user_id: UserId, org_id: OrgId) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        if !state.memberships.contains_key(&(user_id, org_id)) {
            return Err(BackendError::message(format!(
                "User {user_id} is not a member of organization {org_id}"
            )));
        }
        let Some(user) = state.users.get_mut(&user_id) else {
            return Err(BackendError::message(format!("User {user_id} does not exist")));
        };
        user.active_org_id = Some(org_id);
        state.mutations += 1;
        Ok(())
    }

    async fn find_user(&self, lookup: &LookupParams) -> Result<Option<User>, BackendError> {
        let state = self.state.read().await;
        let by_login = lookup
            .login
            .as_deref()
            .filter(|login| !login.is_empty())
            .and_then(|login| state.users.values().find(|u| u.login == login));
        let by_email = || {
            lookup
                .email
                .as_deref()
                .filter(|email| !email.is_empty())
                .and_then(|email| state.users.values().find(|u| u.email == email))
        };
        Ok(by_login.or_else(by_email).cloned())
    }

    async fn create_user(&self, user: &NewUser) -> Result<User, BackendError> {
        let mut state = self.state.write().await;
        if state
            .users
            .values()
            .any(|u| !user.login.is_empty() && u.login == user.login)
        {
            return Err(BackendError::message(format!(
                "User with login `{}` already exists",
                user.login
            )));
        }
        let next_id = state
            .users
            .keys()
            .next_back()
            .map_or(1, |id| id.get() + 1);
        let created = User {
            id: UserId::new(next_id),
            login: user.login.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            active_org_id: None,
        };
        state.users.insert(created.id, created.clone());
        state.mutations += 1;
        Ok(created)
    }
}

#[async_trait]
impl PermissionStore for InMemoryDirectory {
    async fn delete_user_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<(), BackendError> {
        let mut state = self.state.write().await;
        if state.permissions.remove(&(org_id, user_id)).is_some() {
            state.mutations += 1;
        }
        Ok(())
    }
}

/// Tracks anonymous devices, rejecting new devices once `limit` is reached.
#[derive(Debug, Default)]
pub struct InMemoryDeviceStore {
    limit: Option<usize>,
    devices: RwLock<HashMap<String, (DeviceKind, DeviceInfo)>>,
}

impl InMemoryDeviceStore {
    #[must_use]
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            devices: RwLock::default(),
        }
    }

    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }
}

#[async_trait]
impl DeviceStore for InMemoryDeviceStore {
    async fn tag_device(&self, device: &DeviceInfo, kind: DeviceKind) -> Result<(), TagDeviceError> {
        let mut devices = self.devices.write().await;
        let known = devices.contains_key(&device.device_id);
        if !known && self.limit.is_some_and(|limit| devices.len() >= limit) {
            return Err(DeviceLimitReached::new().into());
        }
        devices.insert(device.device_id.clone(), (kind, device.clone()));
        Ok(())
    }
}

/// Token verifier backed by a fixed token to claims table.
#[derive(Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Claims>,
}

impl StaticTokenVerifier {
    #[must_use]
    pub fn new(tokens: HashMap<String, Claims>) -> Self {
        Self { tokens }
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, claims: Claims) -> Self {
        self.tokens.insert(token.into(), claims);
        self
    }
}

impl Debug for StaticTokenVerifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenVerifier")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Result<Claims, TokenVerificationError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or(TokenVerificationError::UnknownToken)
    }
}

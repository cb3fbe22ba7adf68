use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;

use crate::{
    AuthnConfig,
    service::{
        Identity, MembershipService, Namespace, Org, OrgDirectory, PermissionStore, Request,
        UserDirectory, UserId,
        authn::{PostAuthHook, PostLoginHook},
        error::{AddMembershipError, AuthnError, RemoveMembershipError, SyncError},
    },
};

pub const HOOK_SYNC_ORG_ROLES: &str = "org.sync.roles";
pub const HOOK_SET_DEFAULT_ORG: &str = "org.sync.default_org";

/// Reconciles externally asserted organization roles with persisted memberships.
#[derive(Debug)]
pub struct OrgSync {
    config: Arc<AuthnConfig>,
    memberships: Arc<dyn MembershipService>,
    orgs: Arc<dyn OrgDirectory>,
    users: Arc<dyn UserDirectory>,
    permissions: Arc<dyn PermissionStore>,
}

/// User id of a persisted user identity, `None` (logged) for any other identity.
fn persisted_user_id(identity: &Identity, hook: &'static str) -> Option<UserId> {
    let Some(id) = identity
        .id
        .as_ref()
        .filter(|id| id.is_namespace(Namespace::User))
    else {
        tracing::debug!(
            hook,
            namespace = identity.namespace().map(tracing::field::display),
            "Identity is not a persisted user"
        );
        return None;
    };

    match id.user_id() {
        Ok(user_id) => Some(user_id),
        Err(e) => {
            tracing::warn!(hook, %id, error = %e, "Invalid ID for identity");
            None
        }
    }
}

impl OrgSync {
    #[must_use]
    pub fn new(
        config: Arc<AuthnConfig>,
        memberships: Arc<dyn MembershipService>,
        orgs: Arc<dyn OrgDirectory>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionStore>,
    ) -> Self {
        Self {
            config,
            memberships,
            orgs,
            users,
            permissions,
        }
    }

    /// Make the persisted memberships of the user match `identity.org_roles`.
    ///
    /// An empty `org_roles` never changes any membership. Membership changes that
    /// were committed before a failure or a cancellation are kept.
    #[tracing::instrument(
        name = "org_sync_roles",
        skip_all,
        fields(login = %identity.login, request_id = %request.request_id())
    )]
    pub async fn sync_org_roles(
        &self,
        identity: &mut Identity,
        request: &Request,
    ) -> Result<(), SyncError> {
        if !identity.client_params.sync_org_roles {
            return Ok(());
        }

        let Some(user_id) = persisted_user_id(identity, HOOK_SYNC_ORG_ROLES) else {
            tracing::warn!("Failed to sync org roles, identity is not a persisted user");
            return Ok(());
        };

        tracing::debug!(ext_org_roles = ?identity.org_roles, "Syncing organization roles");
        if identity.org_roles.is_empty() {
            tracing::debug!("Not syncing organization roles since external user doesn't have any");
            return Ok(());
        }

        let memberships = match or_cancelled!(
            request,
            self.memberships.list_user_memberships(user_id),
            Ok(())
        ) {
            Ok(memberships) => memberships,
            Err(e) => {
                tracing::error!(error = %e, "Failed to get user's organizations");
                return Ok(());
            }
        };

        let mut handled_org_ids = HashSet::with_capacity(memberships.len());
        let mut remove_org_ids = Vec::new();

        for membership in &memberships {
            handled_org_ids.insert(membership.org_id);

            let org = match or_cancelled!(request, self.orgs.get_by_id(membership.org_id), Ok(())) {
                Ok(org) => org,
                Err(e) => {
                    tracing::warn!(
                        org_id = %membership.org_id,
                        error = %e,
                        "Cannot resolve organization of membership, leaving it unchanged"
                    );
                    continue;
                }
            };

            match identity.org_roles.get(&org.name) {
                None => remove_org_ids.push(membership.org_id),
                Some(role) if *role != membership.role => {
                    if let Err(e) = or_cancelled!(
                        request,
                        self.memberships
                            .update_membership(user_id, membership.org_id, *role),
                        Ok(())
                    ) {
                        tracing::error!(org_id = %membership.org_id, error = %e, "Failed to update organization role");
                        return Err(e.into());
                    }
                }
                Some(_) => {}
            }
        }

        let mut resolved_orgs: Vec<Org> = Vec::with_capacity(identity.org_roles.len());
        for (org_name, role) in &identity.org_roles {
            let org = match or_cancelled!(request, self.orgs.get_by_name(org_name), Ok(())) {
                Ok(org) => org,
                Err(e) => {
                    tracing::debug!(%org_name, error = %e, "Skipping unknown asserted organization");
                    continue;
                }
            };
            let org_id = org.id;
            resolved_orgs.push(org);

            if handled_org_ids.contains(&org_id) {
                continue;
            }

            match or_cancelled!(
                request,
                self.memberships.add_membership(user_id, org_id, *role),
                Ok(())
            ) {
                Ok(()) | Err(AddMembershipError::OrganizationNotFound(_)) => {}
                Err(e) => {
                    tracing::error!(%org_id, error = %e, "Failed to add user to organization");
                    return Err(e.into());
                }
            }
        }

        for org_id in remove_org_ids {
            tracing::debug!(%org_id, "Removing user's organization membership as part of syncing with external roles");
            match or_cancelled!(
                request,
                self.memberships.remove_membership(user_id, org_id),
                Ok(())
            ) {
                Ok(()) => {}
                Err(RemoveMembershipError::LastOrgAdmin(e)) => {
                    tracing::warn!(%org_id, error = %e, "Keeping membership of last organization admin");
                    continue;
                }
                Err(RemoveMembershipError::BackendError(e)) => {
                    tracing::error!(%org_id, error = %e, "Failed to remove user from organization");
                    return Err(e.into());
                }
            }

            if let Err(e) = or_cancelled!(
                request,
                self.permissions.delete_user_permissions(org_id, user_id),
                Ok(())
            ) {
                tracing::error!(%org_id, error = %e, "Failed to delete permissions for user");
            }
        }

        if !identity.org_roles.contains_key(&identity.org_name)
            && let Some(org) = resolved_orgs.into_iter().min_by_key(|org| org.id)
        {
            tracing::debug!(org_id = %org.id, "Switching active organization to an asserted organization");
            identity.org_id = org.id;
            identity.org_name = org.name;
            or_cancelled!(
                request,
                self.users.set_active_org(user_id, identity.org_id),
                Ok(())
            )
            .inspect_err(|e| tracing::error!(error = %e, "Failed to set active organization"))?;
        }

        Ok(())
    }

    /// Switch a persisted user to the configured default organization
    /// after a successful login, if they are a member of it. Never fails.
    #[tracing::instrument(name = "org_sync_default_org", skip_all, fields(request_id = %request.request_id()))]
    pub async fn set_default_org(
        &self,
        identity: Option<&Identity>,
        request: &Request,
        error: Option<&AuthnError>,
    ) {
        let Some(default_org_id) = self.config.default_org_id() else {
            return;
        };
        let Some(identity) = identity else {
            return;
        };
        if error.is_some() {
            return;
        }
        let Some(user_id) = persisted_user_id(identity, HOOK_SET_DEFAULT_ORG) else {
            tracing::debug!("Skipping default org sync, not a user");
            return;
        };

        let memberships =
            match or_cancelled!(request, self.memberships.list_user_memberships(user_id), ()) {
                Ok(memberships) => memberships,
                Err(e) => {
                    tracing::error!(%user_id, error = %e, "Skipping default org sync, failed to validate user's organizations");
                    return;
                }
            };

        if !memberships.iter().any(|m| m.org_id == default_org_id) {
            tracing::debug!(%user_id, org_id = %default_org_id, "Skipping default org sync, user is not assigned to org");
            return;
        }

        if let Err(e) = or_cancelled!(
            request,
            self.users.set_active_org(user_id, default_org_id),
            ()
        ) {
            tracing::error!(%user_id, error = %e, "Failed to set default org");
        }
    }
}

/// Post-authentication hook running [`OrgSync::sync_org_roles`].
#[derive(Debug, Clone)]
pub struct SyncOrgRolesHook(Arc<OrgSync>);

impl SyncOrgRolesHook {
    #[must_use]
    pub fn new(org_sync: Arc<OrgSync>) -> Self {
        Self(org_sync)
    }
}

#[async_trait]
impl PostAuthHook for SyncOrgRolesHook {
    fn name(&self) -> &'static str {
        HOOK_SYNC_ORG_ROLES
    }

    fn priority(&self) -> u32 {
        30
    }

    async fn run(&self, identity: &mut Identity, request: &Request) -> Result<(), SyncError> {
        self.0.sync_org_roles(identity, request).await
    }
}

/// Post-login hook running [`OrgSync::set_default_org`].
#[derive(Debug, Clone)]
pub struct SetDefaultOrgHook(Arc<OrgSync>);

impl SetDefaultOrgHook {
    #[must_use]
    pub fn new(org_sync: Arc<OrgSync>) -> Self {
        Self(org_sync)
    }
}

#[async_trait]
impl PostLoginHook for SetDefaultOrgHook {
    fn name(&self) -> &'static str {
        HOOK_SET_DEFAULT_ORG
    }

    fn priority(&self) -> u32 {
        50
    }

    async fn run(&self, identity: Option<&Identity>, request: &Request, error: Option<&AuthnError>) {
        self.0.set_default_org(identity, request, error).await;
    }
}

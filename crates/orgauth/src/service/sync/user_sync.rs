use std::sync::Arc;

use async_trait::async_trait;

use crate::service::{
    Identity, NamespacedId, NewUser, OrgDirectory, Request, User, UserDirectory,
    authn::PostAuthHook,
    error::{BackendError, SyncError, UserNotFound},
};

pub const HOOK_FETCH_SYNCED_USER: &str = "user.sync.fetch";

fn cancelled() -> SyncError {
    BackendError::message("Request cancelled before the persisted user was resolved").into()
}

/// Gives identities from external mechanisms the id of their persisted user,
/// creating the user on first sign in when the client allows it.
#[derive(Debug, Clone)]
pub struct FetchSyncedUserHook {
    users: Arc<dyn UserDirectory>,
    orgs: Arc<dyn OrgDirectory>,
}

impl FetchSyncedUserHook {
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>, orgs: Arc<dyn OrgDirectory>) -> Self {
        Self { users, orgs }
    }

    async fn find_or_create(
        &self,
        identity: &Identity,
        request: &Request,
    ) -> Result<User, SyncError> {
        let params = &identity.client_params;
        let found = or_cancelled!(
            request,
            self.users.find_user(&params.lookup_params),
            Err(cancelled())
        )?;
        if let Some(user) = found {
            return Ok(user);
        }

        if !(params.sync_user && params.allow_sign_up) {
            return Err(UserNotFound::new(&identity.auth_id).into());
        }

        let new_user = NewUser {
            login: identity.login.clone(),
            email: identity.email.clone(),
            name: identity.name.clone(),
        };
        tracing::info!(hook = HOOK_FETCH_SYNCED_USER, login = %new_user.login, "Signing up new user");
        let created = or_cancelled!(
            request,
            self.users.create_user(&new_user),
            Err(cancelled())
        )?;
        Ok(created)
    }
}

#[async_trait]
impl PostAuthHook for FetchSyncedUserHook {
    fn name(&self) -> &'static str {
        HOOK_FETCH_SYNCED_USER
    }

    fn priority(&self) -> u32 {
        10
    }

    async fn run(&self, identity: &mut Identity, request: &Request) -> Result<(), SyncError> {
        if !identity.client_params.fetch_synced_user || identity.id.is_some() {
            return Ok(());
        }

        let user = self.find_or_create(identity, request).await?;
        tracing::debug!(hook = HOOK_FETCH_SYNCED_USER, user_id = %user.id, "Matched persisted user");
        identity.id = Some(NamespacedId::user(user.id));

        let Some(org_id) = user.active_org_id else {
            return Ok(());
        };
        match or_cancelled!(request, self.orgs.get_by_id(org_id), Ok(())) {
            Ok(org) => {
                identity.org_id = org.id;
                identity.org_name = org.name;
            }
            Err(e) => {
                tracing::warn!(
                    hook = HOOK_FETCH_SYNCED_USER,
                    %org_id,
                    error = %e,
                    "Active organization of user not found"
                );
            }
        }
        Ok(())
    }
}

use std::sync::Arc;

use typed_builder::TypedBuilder;

use super::{
    AuthnChain, AuthnClient, IdentityResolverClient, PostAuthHook, PostLoginHook,
    clients::{AnonymousClient, JwtClient},
};
use crate::{
    AuthnConfig,
    service::{
        DeviceStore, Identity, MembershipService, NamespacedId, OrgDirectory, OrgId,
        PermissionStore, Request, TokenVerifier, UserDirectory,
        error::{AuthnError, InvalidConfiguration, ResolveIdentityError},
        sync::{FetchSyncedUserHook, OrgSync, SetDefaultOrgHook, SyncOrgRolesHook},
    },
};

/// Services consumed by the clients and hooks of a fully wired [`AuthnService`].
#[derive(Debug, Clone, TypedBuilder)]
pub struct AuthnServices {
    pub memberships: Arc<dyn MembershipService>,
    pub orgs: Arc<dyn OrgDirectory>,
    pub users: Arc<dyn UserDirectory>,
    pub permissions: Arc<dyn PermissionStore>,
    pub verifier: Arc<dyn TokenVerifier>,
    pub devices: Arc<dyn DeviceStore>,
}

/// Authentication chain followed by post-authentication and post-login hooks.
#[derive(Debug, Clone, Default)]
pub struct AuthnService {
    chain: AuthnChain,
    post_auth_hooks: Vec<Arc<dyn PostAuthHook>>,
    post_login_hooks: Vec<Arc<dyn PostLoginHook>>,
}

impl AuthnService {
    #[must_use]
    pub fn new(chain: AuthnChain) -> Self {
        Self {
            chain,
            post_auth_hooks: Vec::new(),
            post_login_hooks: Vec::new(),
        }
    }

    /// Wire the anonymous and claims-token clients together with the
    /// user lookup, organization role and default organization hooks.
    pub fn from_config(
        config: Arc<AuthnConfig>,
        services: AuthnServices,
    ) -> Result<Self, InvalidConfiguration> {
        let mut chain = AuthnChain::new();
        chain.register_identity_resolver(Arc::new(AnonymousClient::new(
            config.clone(),
            services.orgs.clone(),
            services.devices.clone(),
        )));
        chain.register_client(Arc::new(JwtClient::try_new(
            config.clone(),
            services.verifier.clone(),
        )?));

        let org_sync = Arc::new(OrgSync::new(
            config,
            services.memberships.clone(),
            services.orgs.clone(),
            services.users.clone(),
            services.permissions.clone(),
        ));

        let mut service = Self::new(chain);
        service.register_post_auth_hook(Arc::new(FetchSyncedUserHook::new(
            services.users.clone(),
            services.orgs.clone(),
        )));
        service.register_post_auth_hook(Arc::new(SyncOrgRolesHook::new(org_sync.clone())));
        service.register_post_login_hook(Arc::new(SetDefaultOrgHook::new(org_sync)));
        Ok(service)
    }

    pub fn register_client(&mut self, client: Arc<dyn AuthnClient>) {
        self.chain.register_client(client);
    }

    pub fn register_identity_resolver<C>(&mut self, client: Arc<C>)
    where
        C: IdentityResolverClient + 'static,
    {
        self.chain.register_identity_resolver(client);
    }

    pub fn register_post_auth_hook(&mut self, hook: Arc<dyn PostAuthHook>) {
        self.post_auth_hooks.push(hook);
        self.post_auth_hooks.sort_by_key(|h| h.priority());
    }

    pub fn register_post_login_hook(&mut self, hook: Arc<dyn PostLoginHook>) {
        self.post_login_hooks.push(hook);
        self.post_login_hooks.sort_by_key(|h| h.priority());
    }

    #[must_use]
    pub fn chain(&self) -> &AuthnChain {
        &self.chain
    }

    /// Authenticate the request, run the post-authentication hooks in order,
    /// then hand the outcome to every post-login hook.
    pub async fn authenticate(&self, request: &mut Request) -> Result<Identity, AuthnError> {
        let result = self.authenticate_and_sync(request).await;

        let (identity, error) = match &result {
            Ok(identity) => (Some(identity), None),
            Err(e) => (None, Some(e)),
        };
        for hook in &self.post_login_hooks {
            hook.run(identity, request, error).await;
        }

        result
    }

    async fn authenticate_and_sync(&self, request: &mut Request) -> Result<Identity, AuthnError> {
        let mut identity = self.chain.authenticate(request).await?;

        for hook in &self.post_auth_hooks {
            if let Err(e) = hook.run(&mut identity, request).await {
                tracing::warn!(hook = hook.name(), kind = %e.kind(), "Post-authentication hook failed");
                return Err(e
                    .append_detail(format!("Post-authentication hook `{}` failed", hook.name()))
                    .into());
            }
        }

        Ok(identity)
    }

    pub async fn resolve_identity(
        &self,
        org_id: OrgId,
        id: &NamespacedId,
    ) -> Result<Identity, ResolveIdentityError> {
        self.chain.resolve_identity(org_id, id).await
    }
}

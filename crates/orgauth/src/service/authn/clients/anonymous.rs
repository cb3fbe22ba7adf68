use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    AuthnConfig,
    service::{
        ClientParams, DeviceInfo, DeviceKind, DeviceStore, Identity, Namespace, NamespacedId, Org,
        OrgDirectory, OrgId, Request,
        authn::{AuthnClient, CLIENT_ANONYMOUS, IdentityResolverClient},
        error::{
            AuthenticateError, InvalidIdentifier, InvalidOrganization, OrgLookupError,
            ResolveIdentityError, TagDeviceError,
        },
    },
};

pub const STAT_CUSTOMIZED_ROLE_COUNT: &str = "stats.anonymous.customized_role.count";

/// Authenticates every request as the shared anonymous identity of one organization.
#[derive(Debug)]
pub struct AnonymousClient {
    config: Arc<AuthnConfig>,
    orgs: Arc<dyn OrgDirectory>,
    devices: Arc<dyn DeviceStore>,
}

impl AnonymousClient {
    #[must_use]
    pub fn new(
        config: Arc<AuthnConfig>,
        orgs: Arc<dyn OrgDirectory>,
        devices: Arc<dyn DeviceStore>,
    ) -> Self {
        Self {
            config,
            orgs,
            devices,
        }
    }

    async fn anonymous_org(&self) -> Result<Org, OrgLookupError> {
        let name = &self.config.anonymous.org_name;
        self.orgs.get_by_name(name).await.inspect_err(|e| {
            tracing::error!(
                client = CLIENT_ANONYMOUS,
                org_name = %name,
                error = %e,
                "Failed to find organization"
            );
        })
    }

    /// Best-effort. Only a reached device limit is fatal.
    async fn tag_device(&self, request: &Request) -> Result<(), AuthenticateError> {
        let Some(device) = DeviceInfo::from_request(request) else {
            tracing::trace!(client = CLIENT_ANONYMOUS, "No device id on request, not tagging");
            return Ok(());
        };

        match self.devices.tag_device(&device, DeviceKind::Ui).await {
            Ok(()) => Ok(()),
            Err(TagDeviceError::DeviceLimitReached(e)) => Err(e.into()),
            Err(e) => {
                tracing::warn!(client = CLIENT_ANONYMOUS, error = %e, "Failed to tag anonymous session");
                Ok(())
            }
        }
    }

    fn new_anonymous_identity(&self, org: Org) -> Identity {
        let org_roles = BTreeMap::from([(org.name.clone(), self.config.anonymous.org_role)]);
        Identity::builder()
            .id(NamespacedId::anonymous())
            .org_id(org.id)
            .org_name(org.name)
            .org_roles(org_roles)
            .client_params(ClientParams {
                sync_permissions: true,
                ..Default::default()
            })
            .build()
    }

    /// Usage statistics reported for anonymous access.
    #[must_use]
    pub fn usage_stats(&self) -> BTreeMap<String, serde_json::Value> {
        let customized = !self
            .config
            .anonymous
            .org_role
            .to_string()
            .eq_ignore_ascii_case("Viewer");
        BTreeMap::from([(
            STAT_CUSTOMIZED_ROLE_COUNT.to_string(),
            serde_json::Value::from(u8::from(customized)),
        )])
    }
}

#[async_trait]
impl AuthnClient for AnonymousClient {
    fn name(&self) -> &'static str {
        CLIENT_ANONYMOUS
    }

    fn is_enabled(&self) -> bool {
        self.config.anonymous.enabled
    }

    fn priority(&self) -> u32 {
        100
    }

    fn test(&self, _request: &Request) -> bool {
        true
    }

    async fn authenticate(&self, request: &mut Request) -> Result<Identity, AuthenticateError> {
        let org = self.anonymous_org().await?;
        self.tag_device(request).await?;
        Ok(self.new_anonymous_identity(org))
    }
}

#[async_trait]
impl IdentityResolverClient for AnonymousClient {
    fn namespace(&self) -> Namespace {
        Namespace::Anonymous
    }

    async fn resolve_identity(
        &self,
        org_id: OrgId,
        id: &NamespacedId,
    ) -> Result<Identity, ResolveIdentityError> {
        let org = self.anonymous_org().await?;

        if org.id != org_id {
            return Err(InvalidOrganization::new(org_id, org.id).into());
        }
        if *id != NamespacedId::anonymous() {
            return Err(InvalidIdentifier::unexpected(id).into());
        }

        Ok(self.new_anonymous_identity(org))
    }
}

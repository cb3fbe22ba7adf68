use std::{collections::HashMap, sync::Arc};

use super::{AuthnClient, IdentityResolverClient};
use crate::service::{
    Identity, Namespace, NamespacedId, OrgId, Request,
    error::{AuthenticateError, InvalidIdentifier, NoApplicableClient, ResolveIdentityError},
};

/// Ordered set of authentication clients.
///
/// Clients run in ascending priority; clients with equal priority keep their
/// registration order.
#[derive(Debug, Clone, Default)]
pub struct AuthnChain {
    clients: Vec<Arc<dyn AuthnClient>>,
    resolvers: HashMap<Namespace, Arc<dyn IdentityResolverClient>>,
}

impl AuthnChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_client(&mut self, client: Arc<dyn AuthnClient>) {
        tracing::debug!(
            client = client.name(),
            priority = client.priority(),
            "Registering authentication client"
        );
        self.clients.push(client);
        // `sort_by_key` is stable
        self.clients.sort_by_key(|c| c.priority());
    }

    /// Register a client that can also resolve identities of its namespace.
    /// A later registration for the same namespace replaces the resolver.
    pub fn register_identity_resolver<C>(&mut self, client: Arc<C>)
    where
        C: IdentityResolverClient + 'static,
    {
        self.resolvers.insert(client.namespace(), client.clone());
        self.register_client(client);
    }

    pub fn clients(&self) -> impl Iterator<Item = &dyn AuthnClient> {
        self.clients.iter().map(|c| &**c)
    }

    /// Authenticate with the first enabled client whose `test` accepts the request.
    ///
    /// The selected client's failure is final; later clients are not tried.
    pub async fn authenticate(&self, request: &mut Request) -> Result<Identity, AuthenticateError> {
        for client in &self.clients {
            if !client.is_enabled() {
                continue;
            }
            if !client.test(request) {
                tracing::trace!(client = client.name(), "Client does not apply to request");
                continue;
            }

            tracing::debug!(
                client = client.name(),
                request_id = %request.request_id(),
                "Authenticating request"
            );
            return match client.authenticate(request).await {
                Ok(identity) => {
                    tracing::debug!(
                        client = client.name(),
                        id = identity.id.as_ref().map(tracing::field::display),
                        org_id = %identity.org_id,
                        "Request authenticated"
                    );
                    Ok(identity)
                }
                Err(e) => {
                    tracing::debug!(client = client.name(), kind = %e.kind(), "Authentication failed");
                    Err(e.append_detail(format!("Client `{}` failed", client.name())))
                }
            };
        }

        Err(NoApplicableClient::new().into())
    }

    /// Rebuild an identity through the resolver registered for the id's namespace.
    /// Resolvers of disabled clients reject every id.
    pub async fn resolve_identity(
        &self,
        org_id: OrgId,
        id: &NamespacedId,
    ) -> Result<Identity, ResolveIdentityError> {
        let Some(resolver) = self.resolvers.get(&id.namespace()) else {
            return Err(InvalidIdentifier::new(
                id.to_string(),
                format!("no identity resolver for namespace `{}`", id.namespace()),
            )
            .into());
        };
        if !resolver.is_enabled() {
            return Err(InvalidIdentifier::new(
                id.to_string(),
                format!("client `{}` is disabled", resolver.name()),
            )
            .into());
        }
        resolver.resolve_identity(org_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::service::error::{ErrorKind, MissingClaim};

    #[derive(Debug)]
    struct FakeClient {
        name: &'static str,
        enabled: bool,
        priority: u32,
        applies: bool,
        fail: bool,
        calls: AtomicUsize,
    }

    impl FakeClient {
        fn new(name: &'static str, priority: u32) -> Self {
            Self {
                name,
                enabled: true,
                priority,
                applies: true,
                fail: false,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AuthnClient for FakeClient {
        fn name(&self) -> &'static str {
            self.name
        }

        fn is_enabled(&self) -> bool {
            self.enabled
        }

        fn priority(&self) -> u32 {
            self.priority
        }

        fn test(&self, _request: &Request) -> bool {
            self.applies
        }

        async fn authenticate(&self, _request: &mut Request) -> Result<Identity, AuthenticateError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(MissingClaim::new("sub").into());
            }
            Ok(Identity::builder().authenticated_by(self.name).build())
        }
    }

    fn chain_of(clients: &[Arc<FakeClient>]) -> AuthnChain {
        let mut chain = AuthnChain::new();
        for c in clients {
            chain.register_client(c.clone());
        }
        chain
    }

    #[tokio::test]
    async fn test_lowest_priority_applicable_client_wins() {
        let late = Arc::new(FakeClient::new("late", 100));
        let early = Arc::new(FakeClient::new("early", 20));
        let chain = chain_of(&[late.clone(), early.clone()]);

        let identity = chain
            .authenticate(&mut Request::builder().build())
            .await
            .unwrap();
        assert_eq!(identity.authenticated_by, "early");
        assert_eq!(late.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_ties_keep_registration_order() {
        let first = Arc::new(FakeClient::new("first", 50));
        let second = Arc::new(FakeClient::new("second", 50));
        let chain = chain_of(&[first, second]);

        let names: Vec<_> = chain.clients().map(|c| c.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        let identity = chain
            .authenticate(&mut Request::builder().build())
            .await
            .unwrap();
        assert_eq!(identity.authenticated_by, "first");
    }

    #[tokio::test]
    async fn test_disabled_and_inapplicable_clients_are_skipped() {
        let mut disabled = FakeClient::new("disabled", 1);
        disabled.enabled = false;
        let mut inapplicable = FakeClient::new("inapplicable", 2);
        inapplicable.applies = false;
        let disabled = Arc::new(disabled);
        let inapplicable = Arc::new(inapplicable);
        let fallback = Arc::new(FakeClient::new("fallback", 3));
        let chain = chain_of(&[disabled.clone(), inapplicable.clone(), fallback]);

        let identity = chain
            .authenticate(&mut Request::builder().build())
            .await
            .unwrap();
        assert_eq!(identity.authenticated_by, "fallback");
        assert_eq!(disabled.calls.load(Ordering::SeqCst), 0);
        assert_eq!(inapplicable.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_fall_through() {
        let mut failing = FakeClient::new("failing", 10);
        failing.fail = true;
        let failing = Arc::new(failing);
        let next = Arc::new(FakeClient::new("next", 20));
        let chain = chain_of(&[failing.clone(), next.clone()]);

        let err = chain
            .authenticate(&mut Request::builder().build())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingClaim);
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
        assert_eq!(next.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_applicable_client() {
        let mut inapplicable = FakeClient::new("inapplicable", 2);
        inapplicable.applies = false;
        let chain = chain_of(&[Arc::new(inapplicable)]);
        let err = chain
            .authenticate(&mut Request::builder().build())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoApplicableClient);

        let err = AuthnChain::new()
            .authenticate(&mut Request::builder().build())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NoApplicableClient);
    }

    #[async_trait]
    impl IdentityResolverClient for FakeClient {
        fn namespace(&self) -> Namespace {
            Namespace::Anonymous
        }

        async fn resolve_identity(
            &self,
            org_id: OrgId,
            id: &NamespacedId,
        ) -> Result<Identity, ResolveIdentityError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Identity::builder()
                .id(id.clone())
                .org_id(org_id)
                .authenticated_by(self.name)
                .build())
        }
    }

    #[tokio::test]
    async fn test_disabled_resolver_rejects_ids() {
        let mut disabled = FakeClient::new("anonymous", 10);
        disabled.enabled = false;
        let disabled = Arc::new(disabled);
        let mut chain = AuthnChain::new();
        chain.register_identity_resolver(disabled.clone());

        let err = chain
            .resolve_identity(OrgId::new(1), &NamespacedId::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
        assert_eq!(disabled.calls.load(Ordering::SeqCst), 0);

        let enabled = Arc::new(FakeClient::new("anonymous", 10));
        chain.register_identity_resolver(enabled.clone());
        let identity = chain
            .resolve_identity(OrgId::new(1), &NamespacedId::anonymous())
            .await
            .unwrap();
        assert_eq!(identity.org_id, OrgId::new(1));
        assert_eq!(enabled.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolve_without_resolver_is_invalid_identifier() {
        let err = AuthnChain::new()
            .resolve_identity(OrgId::new(1), &NamespacedId::anonymous())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidIdentifier);
    }
}

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use super::claims::{OrgRoleMapper, has_sub_claim, search_string, search_string_list};
use crate::{
    AuthnConfig,
    service::{
        ClientParams, Claims, Identity, LookupParams, OrgRole, Request, TokenVerifier,
        authn::{AuthnClient, CLIENT_JWT},
        error::{AuthenticateError, InvalidConfiguration, InvalidRole, InvalidToken, MissingClaim},
    },
};

/// Query parameter carrying the token when URL login is enabled.
pub const AUTH_QUERY_PARAM_NAME: &str = "auth_token";
/// Value of `Identity::authenticated_by` for identities from this client.
pub const JWT_MODULE: &str = "jwt";
const SERVER_ADMIN_ROLE: &str = "ServerAdmin";
const BEARER_PREFIX: &str = "Bearer ";

/// Authenticates requests carrying a signed claims token (JWT).
#[derive(Debug)]
pub struct JwtClient {
    config: Arc<AuthnConfig>,
    verifier: Arc<dyn TokenVerifier>,
    role_mapper: OrgRoleMapper,
}

impl JwtClient {
    /// Fails if the regex organization role mapper does not compile.
    pub fn try_new(
        config: Arc<AuthnConfig>,
        verifier: Arc<dyn TokenVerifier>,
    ) -> Result<Self, InvalidConfiguration> {
        let role_mapper = OrgRoleMapper::from_config(&config.jwt.regex_org_role_mapper)?;
        Ok(Self {
            config,
            verifier,
            role_mapper,
        })
    }

    fn retrieve_token(&self, request: &Request) -> Option<String> {
        let jwt = &self.config.jwt;
        let mut token = request
            .header(jwt.header_name.as_str())
            .filter(|t| !t.is_empty());
        if token.is_none() && jwt.url_login {
            token = request.query_param(AUTH_QUERY_PARAM_NAME);
        }
        token
            .map(|t| t.strip_prefix(BEARER_PREFIX).unwrap_or(t).to_string())
            .filter(|t| !t.is_empty())
    }

    fn strip_sensitive_param(&self, request: &mut Request) {
        if self.config.jwt.url_login && request.remove_query_param(AUTH_QUERY_PARAM_NAME) {
            tracing::trace!(client = CLIENT_JWT, "Removed token query parameter from request");
        }
    }

    /// Mapped organization roles and, if the policy allows, the server admin flag.
    fn extract_roles_and_admin(&self, claims: &Claims) -> (BTreeMap<String, OrgRole>, Option<bool>) {
        let jwt = &self.config.jwt;
        if jwt.role_attribute_path.is_empty() {
            return (BTreeMap::new(), None);
        }

        let roles = match search_string_list(&jwt.role_attribute_path, claims) {
            Ok(roles) => roles,
            Err(e) => {
                tracing::debug!(client = CLIENT_JWT, error = %e, "Ignoring unreadable role attribute");
                Vec::new()
            }
        };

        let is_server_admin = jwt
            .allow_assign_server_admin
            .then(|| roles.iter().any(|r| r == SERVER_ADMIN_ROLE));
        (self.role_mapper.map_roles(&roles), is_server_admin)
    }

    fn extract_groups(&self, claims: &Claims) -> Result<Vec<String>, AuthenticateError> {
        let path = &self.config.jwt.groups_attribute_path;
        if path.is_empty() {
            return Ok(Vec::new());
        }
        Ok(search_string_list(path, claims)?)
    }
}

/// Direct claim if configured, otherwise a dotted path lookup.
/// `None` if neither is configured.
fn claim_or_path(
    claims: &Claims,
    claim: &str,
    path: &str,
) -> Result<Option<String>, AuthenticateError> {
    if !claim.is_empty() {
        return Ok(Some(
            claims
                .get(claim)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        ));
    }
    if !path.is_empty() {
        return Ok(Some(search_string(path, claims)?));
    }
    Ok(None)
}

#[async_trait]
impl AuthnClient for JwtClient {
    fn name(&self) -> &'static str {
        CLIENT_JWT
    }

    fn is_enabled(&self) -> bool {
        self.config.jwt.enabled
    }

    fn priority(&self) -> u32 {
        20
    }

    fn test(&self, request: &Request) -> bool {
        let jwt = &self.config.jwt;
        if !jwt.enabled || jwt.header_name.is_empty() {
            return false;
        }
        self.retrieve_token(request)
            .is_some_and(|token| has_sub_claim(&token))
    }

    async fn authenticate(&self, request: &mut Request) -> Result<Identity, AuthenticateError> {
        let jwt = &self.config.jwt;
        let token = self.retrieve_token(request).unwrap_or_default();
        self.strip_sensitive_param(request);

        let claims = self.verifier.verify(&token).await.map_err(|e| {
            tracing::debug!(client = CLIENT_JWT, error = %e, "Failed to verify JWT");
            InvalidToken::with_source(e)
        })?;

        let sub = claims
            .get("sub")
            .and_then(Value::as_str)
            .filter(|sub| !sub.is_empty())
            .ok_or_else(|| MissingClaim::new("sub"))?
            .to_string();

        let mut lookup_params = LookupParams::default();
        let login = claim_or_path(&claims, &jwt.username_claim, &jwt.username_attribute_path)?;
        if let Some(login) = &login {
            lookup_params.login = Some(login.clone());
        }
        let email = claim_or_path(&claims, &jwt.email_claim, &jwt.email_attribute_path)?;
        if let Some(email) = &email {
            lookup_params.email = Some(email.clone());
        }
        let login = login.unwrap_or_default();
        let email = email.unwrap_or_default();

        let name = claims
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let (org_roles, is_server_admin) = if jwt.skip_org_role_sync {
            (BTreeMap::new(), None)
        } else {
            let (org_roles, is_server_admin) = self.extract_roles_and_admin(&claims);
            if jwt.role_attribute_strict && org_roles.is_empty() {
                return Err(InvalidRole::new(&jwt.role_attribute_path).into());
            }
            (org_roles, is_server_admin)
        };

        let groups = self.extract_groups(&claims)?;

        if login.is_empty() && email.is_empty() {
            tracing::debug!(client = CLIENT_JWT, "Failed to get an authentication claim from JWT");
            return Err(MissingClaim::new("login or email").into());
        }

        let mut identity = Identity::builder()
            .org_roles(org_roles)
            .login(login)
            .name(name)
            .email(email)
            .authenticated_by(JWT_MODULE)
            .auth_id(sub)
            .groups(groups)
            .client_params(ClientParams {
                sync_user: true,
                fetch_synced_user: true,
                sync_permissions: true,
                sync_org_roles: !jwt.skip_org_role_sync,
                sync_teams: !jwt.groups_attribute_path.is_empty(),
                allow_sign_up: jwt.auto_sign_up,
                lookup_params,
            })
            .build();
        identity.is_server_admin = is_server_admin;
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use http::{HeaderMap, HeaderValue};
    use maplit::btreemap;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::{
        JwtConfig, OrgRoleMapping,
        service::{
            error::ErrorKind,
            store::{MockTokenVerifier, TokenVerificationError},
        },
    };

    const HEADER: &str = "x-jwt-assertion";

    fn unsigned_token(payload: &Value) -> String {
        format!(
            "e30.{}.signature",
            URL_SAFE_NO_PAD.encode(payload.to_string())
        )
    }

    fn jwt_config(f: impl FnOnce(&mut JwtConfig)) -> Arc<AuthnConfig> {
        let mut config = AuthnConfig::default();
        config.jwt.enabled = true;
        config.jwt.header_name = HEADER.to_string();
        config.jwt.username_claim = "login".to_string();
        config.jwt.email_claim = "email".to_string();
        f(&mut config.jwt);
        Arc::new(config)
    }

    fn verifier_returning(claims: Value) -> Arc<MockTokenVerifier> {
        let mut verifier = MockTokenVerifier::new();
        verifier.expect_verify().returning(move |_| match &claims {
            Value::Object(map) => Ok(map.clone()),
            _ => Err(TokenVerificationError::UnknownToken),
        });
        Arc::new(verifier)
    }

    fn request_with_header(token: &str) -> Request {
        let mut headers = HeaderMap::new();
        headers.insert(HEADER, HeaderValue::from_str(token).unwrap());
        Request::builder().headers(headers).build()
    }

    fn alice() -> Value {
        json!({
            "sub": "alice-sub",
            "login": "alice",
            "email": "alice@example.com",
            "name": "Alice",
            "roles": ["x:teamA:admin", "x:teamB:viewer", "bad"],
            "groups": ["g1", "g2"],
        })
    }

    #[test]
    fn test_applies_only_with_subject_in_configured_header() {
        let client = JwtClient::try_new(jwt_config(|_| {}), verifier_returning(alice())).unwrap();

        let token = unsigned_token(&alice());
        assert!(client.test(&request_with_header(&token)));
        assert!(client.test(&request_with_header(&format!("Bearer {token}"))));
        assert!(!client.test(&request_with_header(&unsigned_token(&json!({"login": "a"})))));
        assert!(!client.test(&Request::builder().build()));
    }

    #[test]
    fn test_does_not_apply_without_header_name_or_when_disabled() {
        let token = unsigned_token(&alice());
        let client = JwtClient::try_new(
            jwt_config(|jwt| jwt.header_name = String::new()),
            verifier_returning(alice()),
        )
        .unwrap();
        assert!(!client.test(&request_with_header(&token)));

        let client = JwtClient::try_new(
            jwt_config(|jwt| jwt.enabled = false),
            verifier_returning(alice()),
        )
        .unwrap();
        assert!(!client.test(&request_with_header(&token)));
        assert!(!client.is_enabled());
    }

    #[tokio::test]
    async fn test_authenticate_with_static_role_mapping() {
        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.role_attribute_path = "roles".to_string();
                jwt.groups_attribute_path = "groups".to_string();
            }),
            verifier_returning(alice()),
        )
        .unwrap();

        let mut request = request_with_header(&unsigned_token(&alice()));
        let identity = client.authenticate(&mut request).await.unwrap();

        assert_eq!(identity.id, None);
        assert_eq!(identity.auth_id, "alice-sub");
        assert_eq!(identity.authenticated_by, JWT_MODULE);
        assert_eq!(identity.login, "alice");
        assert_eq!(identity.email, "alice@example.com");
        assert_eq!(identity.name, "Alice");
        assert_eq!(
            identity.org_roles,
            btreemap! {
                "teamA".to_string() => OrgRole::Editor,
                "teamB".to_string() => OrgRole::Viewer,
            }
        );
        assert_eq!(identity.is_server_admin, None);
        assert_eq!(identity.groups, vec!["g1", "g2"]);
        assert_eq!(
            identity.client_params,
            ClientParams {
                sync_user: true,
                fetch_synced_user: true,
                sync_permissions: true,
                sync_org_roles: true,
                sync_teams: true,
                allow_sign_up: false,
                lookup_params: LookupParams {
                    login: Some("alice".to_string()),
                    email: Some("alice@example.com".to_string()),
                },
            }
        );
    }

    #[tokio::test]
    async fn test_authenticate_with_regex_role_mapping() {
        let claims = json!({"sub": "s", "login": "bob", "roles": ["eng:org-a:admin"]});
        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.role_attribute_path = "roles".to_string();
                jwt.regex_org_role_mapper = vec![OrgRoleMapping {
                    pattern: "eng:(?P<org>[^:]+):admin".to_string(),
                    role: OrgRole::Editor,
                }];
            }),
            verifier_returning(claims.clone()),
        )
        .unwrap();

        let identity = client
            .authenticate(&mut request_with_header(&unsigned_token(&claims)))
            .await
            .unwrap();
        assert_eq!(
            identity.org_roles,
            btreemap! {"org-a".to_string() => OrgRole::Editor}
        );
    }

    #[tokio::test]
    async fn test_server_admin_only_with_allow_flag() {
        let claims = json!({"sub": "s", "login": "root", "roles": ["ServerAdmin", "x:main:admin"]});
        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.role_attribute_path = "roles".to_string();
                jwt.allow_assign_server_admin = true;
            }),
            verifier_returning(claims.clone()),
        )
        .unwrap();
        let identity = client
            .authenticate(&mut request_with_header(&unsigned_token(&claims)))
            .await
            .unwrap();
        assert_eq!(identity.is_server_admin, Some(true));

        let client = JwtClient::try_new(
            jwt_config(|jwt| jwt.role_attribute_path = "roles".to_string()),
            verifier_returning(claims.clone()),
        )
        .unwrap();
        let identity = client
            .authenticate(&mut request_with_header(&unsigned_token(&claims)))
            .await
            .unwrap();
        assert_eq!(identity.is_server_admin, None);
    }

    #[tokio::test]
    async fn test_skip_org_role_sync() {
        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.role_attribute_path = "roles".to_string();
                jwt.skip_org_role_sync = true;
            }),
            verifier_returning(alice()),
        )
        .unwrap();
        let identity = client
            .authenticate(&mut request_with_header(&unsigned_token(&alice())))
            .await
            .unwrap();
        assert!(identity.org_roles.is_empty());
        assert!(!identity.client_params.sync_org_roles);
        assert_eq!(identity.is_server_admin, None);
    }

    #[tokio::test]
    async fn test_strict_role_attribute() {
        let claims = json!({"sub": "s", "login": "carol", "roles": ["bad"]});
        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.role_attribute_path = "roles".to_string();
                jwt.role_attribute_strict = true;
            }),
            verifier_returning(claims.clone()),
        )
        .unwrap();
        let err = client
            .authenticate(&mut request_with_header(&unsigned_token(&claims)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRole);
    }

    #[tokio::test]
    async fn test_verification_failure_is_invalid_token() {
        let mut verifier = MockTokenVerifier::new();
        verifier
            .expect_verify()
            .returning(|_| Err(TokenVerificationError::UnknownToken));
        let client = JwtClient::try_new(jwt_config(|_| {}), Arc::new(verifier)).unwrap();

        let err = client
            .authenticate(&mut request_with_header(&unsigned_token(&alice())))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidToken);
    }

    #[tokio::test]
    async fn test_missing_claims() {
        let no_sub = json!({"login": "alice"});
        let client = JwtClient::try_new(jwt_config(|_| {}), verifier_returning(no_sub)).unwrap();
        let err = client
            .authenticate(&mut request_with_header("token"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingClaim);

        let anonymous_subject = json!({"sub": "s"});
        let client =
            JwtClient::try_new(jwt_config(|_| {}), verifier_returning(anonymous_subject)).unwrap();
        let err = client
            .authenticate(&mut request_with_header("token"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingClaim);
    }

    #[tokio::test]
    async fn test_attribute_paths_for_login_and_email() {
        let claims = json!({"sub": "s", "profile": {"user": "dave", "mail": 5}});
        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.username_claim = String::new();
                jwt.email_claim = String::new();
                jwt.username_attribute_path = "profile.user".to_string();
            }),
            verifier_returning(claims.clone()),
        )
        .unwrap();
        let identity = client
            .authenticate(&mut request_with_header("token"))
            .await
            .unwrap();
        assert_eq!(identity.login, "dave");
        assert_eq!(identity.client_params.lookup_params.email, None);

        let client = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.username_claim = String::new();
                jwt.email_claim = String::new();
                jwt.email_attribute_path = "profile.mail".to_string();
            }),
            verifier_returning(claims),
        )
        .unwrap();
        let err = client
            .authenticate(&mut request_with_header("token"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidClaim);
    }

    #[tokio::test]
    async fn test_url_login_strips_token_parameter() {
        let token = unsigned_token(&alice());
        let mut verifier = MockTokenVerifier::new();
        let expected = token.clone();
        verifier
            .expect_verify()
            .withf(move |t| t == expected)
            .returning(|_| match alice() {
                Value::Object(map) => Ok(map),
                _ => Err(TokenVerificationError::UnknownToken),
            });
        let client = JwtClient::try_new(
            jwt_config(|jwt| jwt.url_login = true),
            Arc::new(verifier),
        )
        .unwrap();

        let mut request = Request::builder()
            .path("/d/home")
            .query(vec![
                (AUTH_QUERY_PARAM_NAME.to_string(), token),
                ("orgId".to_string(), "2".to_string()),
            ])
            .build();
        assert!(client.test(&request));
        client.authenticate(&mut request).await.unwrap();
        assert_eq!(request.query_param(AUTH_QUERY_PARAM_NAME), None);
        assert_eq!(request.path_and_query(), "/d/home?orgId=2");
    }

    #[test]
    fn test_invalid_regex_mapper_rejected_at_construction() {
        let result = JwtClient::try_new(
            jwt_config(|jwt| {
                jwt.regex_org_role_mapper = vec![OrgRoleMapping {
                    pattern: "(?P<org>".to_string(),
                    role: OrgRole::Viewer,
                }];
            }),
            verifier_returning(alice()),
        );
        assert!(result.is_err());
    }
}

use std::sync::Arc;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use http::{HeaderMap, HeaderValue, Method, Uri};
use serde_json::{Value, json};

use crate::{
    AuthnConfig, AuthnService, AuthnServices, Request,
    implementations::{
        DirectoryFixture, InMemoryDeviceStore, InMemoryDirectory, StaticTokenVerifier,
    },
    service::Claims,
};


pub(crate) const JWT_HEADER: &str = "X-JWT-Assertion";

/// Unsigned token carrying `claims`; only the static verifier accepts it.
pub(crate) fn token(claims: &Value) -> String {
    format!("e30.{}.sig", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

pub(crate) fn claims(value: &Value) -> Claims {
    value.as_object().cloned().unwrap_or_default()
}

/// Orgs `Main Org.` (1), `team-a` (2), `team-b` (3). Alice (1) is a Viewer of
/// `team-a` and an Admin of `team-b`, Bob (2) is an Admin of `team-b`.
pub(crate) fn fixture() -> DirectoryFixture {
    serde_json::from_value(json!({
        "orgs": [
            {"id": 1, "name": "Main Org."},
            {"id": 2, "name": "team-a"},
            {"id": 3, "name": "team-b"}
        ],
        "users": [
            {"id": 1, "login": "alice", "email": "alice@example.com", "active_org_id": 2},
            {"id": 2, "login": "bob", "email": "bob@example.com", "active_org_id": 3}
        ],
        "memberships": [
            {"org_id": 2, "user_id": 1, "role": "Viewer"},
            {"org_id": 3, "user_id": 1, "role": "Admin"},
            {"org_id": 3, "user_id": 2, "role": "Admin"}
        ]
    }))
    .unwrap()
}

pub(crate) fn base_config() -> AuthnConfig {
    let mut config = AuthnConfig::default();
    config.anonymous.enabled = true;
    config.jwt.enabled = true;
    config.jwt.header_name = JWT_HEADER.to_string();
    config.jwt.username_claim = "login".to_string();
    config.jwt.email_claim = "email".to_string();
    config.jwt.role_attribute_path = "roles".to_string();
    config
}

pub(crate) struct Setup {
    pub(crate) service: AuthnService,
    pub(crate) directory: Arc<InMemoryDirectory>,
    pub(crate) devices: Arc<InMemoryDeviceStore>,
}

pub(crate) fn setup(config: AuthnConfig, fixture: DirectoryFixture, tokens: &[&Value]) -> Setup {
    let directory = Arc::new(InMemoryDirectory::from_fixture(fixture));
    let devices = Arc::new(InMemoryDeviceStore::new(config.anonymous.device_limit));
    let verifier = tokens
        .iter()
        .fold(StaticTokenVerifier::default(), |verifier, value| {
            verifier.with_token(token(value), claims(value))
        });

    let services = AuthnServices::builder()
        .memberships(directory.clone())
        .orgs(directory.clone())
        .users(directory.clone())
        .permissions(directory.clone())
        .verifier(Arc::new(verifier))
        .devices(devices.clone())
        .build();
    let service = AuthnService::from_config(Arc::new(config), services).unwrap();

    Setup {
        service,
        directory,
        devices,
    }
}

pub(crate) fn request_with_headers(uri: &str, headers: &[(&'static str, String)]) -> Request {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        map.insert(*name, HeaderValue::from_str(value).unwrap());
    }
    Request::from_parts(Method::GET, &Uri::try_from(uri).unwrap(), map)
}

pub(crate) fn jwt_request(claims: &Value) -> Request {
    request_with_headers("/api/dashboards", &[(JWT_HEADER, token(claims))])
}

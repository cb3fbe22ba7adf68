//! Services the pipeline consumes. Implementations live outside the core;
//! [`crate::implementations`] carries in-memory and key-file variants.
use std::{fmt::Debug, net::IpAddr};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{
    LookupParams, OrgId, OrgRole, Request, UserId,
    error::{
        AddMembershipError, BackendError, OrgLookupError, RemoveMembershipError, TagDeviceError,
    },
};

/// Verified token claims.
pub type Claims = serde_json::Map<String, serde_json::Value>;

/// Header carrying the client-generated device identifier of anonymous sessions.
pub const DEVICE_ID_HEADER: &str = "x-device-id";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Org {
    pub id: OrgId,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrgMembership {
    pub org_id: OrgId,
    pub user_id: UserId,
    pub role: OrgRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub login: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub active_org_id: Option<OrgId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub login: String,
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Ui,
}

/// Snapshot of the request properties used to tag an anonymous device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub client_ip: Option<IpAddr>,
    pub user_agent: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeviceInfo {
    /// `None` if the request does not carry a device id.
    #[must_use]
    pub fn from_request(request: &Request) -> Option<Self> {
        let device_id = request
            .header(DEVICE_ID_HEADER)
            .filter(|id| !id.is_empty())?;
        let forwarded = request
            .header("x-forwarded-for")
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        Some(Self {
            device_id: device_id.to_string(),
            client_ip: forwarded.or_else(|| request.remote_addr().map(|a| a.ip())),
            user_agent: request.header(http::header::USER_AGENT).map(str::to_string),
            updated_at: Utc::now(),
        })
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MembershipService: Send + Sync + Debug + 'static {
    async fn list_user_memberships(
        &self,
        user_id: UserId,
    ) -> Result<Vec<OrgMembership>, BackendError>;

    async fn add_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
        role: OrgRole,
    ) -> Result<(), AddMembershipError>;

    async fn update_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
        role: OrgRole,
    ) -> Result<(), BackendError>;

    /// Fails with `LastOrgAdmin` if the user is the only admin of the organization.
    async fn remove_membership(
        &self,
        user_id: UserId,
        org_id: OrgId,
    ) -> Result<(), RemoveMembershipError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrgDirectory: Send + Sync + Debug + 'static {
    async fn get_by_name(&self, name: &str) -> Result<Org, OrgLookupError>;

    async fn get_by_id(&self, id: OrgId) -> Result<Org, OrgLookupError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UserDirectory: Send + Sync + Debug + 'static {
    async fn set_active_org(&self, user_id: UserId, org_id: OrgId) -> Result<(), BackendError>;

    /// Searches by login first, then by email.
    async fn find_user(&self, lookup: &LookupParams) -> Result<Option<User>, BackendError>;

    async fn create_user(&self, user: &NewUser) -> Result<User, BackendError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PermissionStore: Send + Sync + Debug + 'static {
    async fn delete_user_permissions(
        &self,
        org_id: OrgId,
        user_id: UserId,
    ) -> Result<(), BackendError>;
}

#[derive(thiserror::Error, Debug)]
pub enum TokenVerificationError {
    #[error("Token is not known to the verifier")]
    UnknownToken,
    #[error("Claim `{0}` does not have the expected value")]
    UnexpectedClaim(String),
    #[error(transparent)]
    Jwt(#[from] jsonwebtoken::errors::Error),
}

/// Verifies the signature of a token and returns its claims.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TokenVerifier: Send + Sync + Debug + 'static {
    async fn verify(&self, token: &str) -> Result<Claims, TokenVerificationError>;
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceStore: Send + Sync + Debug + 'static {
    async fn tag_device(&self, device: &DeviceInfo, kind: DeviceKind) -> Result<(), TagDeviceError>;
}

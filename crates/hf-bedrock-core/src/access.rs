//! Import role provisioning.
//!
//! The import service reads staged files through a role it assumes. The role
//! is looked up by name and created once, with a trust policy for the import
//! service and an inline policy granting read access to the staging bucket.
//!
//! Role creation and policy attachment are two calls. If the second one fails
//! the role is left without its bucket policy; later runs find the role and
//! reuse it as is. Reclaim deletes the policy before the role and stops when
//! that fails, so such a role has to be removed by hand.

use crate::config::AccessConfig;
use crate::error::Result;
use crate::remote::{DynIdentityService, RoleHandle};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// IAM policy document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<PolicyStatement>,
}

/// One statement of a [`PolicyDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource: Vec<String>,
}

/// Service principal allowed to assume a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: String,
}

impl PolicyDocument {
    /// Trust policy letting only the import service assume the role.
    pub fn import_service_trust() -> Self {
        Self {
            version: AccessConfig::POLICY_VERSION.to_string(),
            statement: vec![PolicyStatement {
                effect: "Allow".to_string(),
                principal: Some(Principal {
                    service: AccessConfig::TRUST_SERVICE.to_string(),
                }),
                action: vec!["sts:AssumeRole".to_string()],
                resource: Vec::new(),
            }],
        }
    }

    /// Read and list access on one bucket and all of its keys.
    pub fn bucket_read(bucket: &str) -> Self {
        Self {
            version: AccessConfig::POLICY_VERSION.to_string(),
            statement: vec![PolicyStatement {
                effect: "Allow".to_string(),
                principal: None,
                action: vec!["s3:GetObject".to_string(), "s3:ListBucket".to_string()],
                resource: vec![
                    format!("arn:aws:s3:::{bucket}"),
                    format!("arn:aws:s3:::{bucket}/*"),
                ],
            }],
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Name of the inline bucket policy attached to `role_name`.
pub fn bucket_policy_name(role_name: &str) -> String {
    format!("{}{}", role_name, AccessConfig::POLICY_SUFFIX)
}

/// Ensures the import role exists.
pub struct AccessProvisioner {
    identity: DynIdentityService,
    role_name: String,
}

impl AccessProvisioner {
    pub fn new(identity: DynIdentityService, role_name: impl Into<String>) -> Self {
        Self {
            identity,
            role_name: role_name.into(),
        }
    }

    pub fn role_name(&self) -> &str {
        &self.role_name
    }

    /// Return the import role, creating it with read access to `bucket` if
    /// it does not exist yet.
    ///
    /// An existing role is returned untouched, even if it grants access to a
    /// different bucket.
    pub async fn ensure_role(&self, bucket: &str) -> Result<RoleHandle> {
        if let Some(role) = self.identity.find_role(&self.role_name).await? {
            info!("Using existing import role {}", role.arn);
            return Ok(role);
        }

        info!("Creating import role {}", self.role_name);
        let trust = PolicyDocument::import_service_trust().to_json()?;
        let role = self.identity.create_role(&self.role_name, &trust).await?;

        let policy_name = bucket_policy_name(&role.name);
        let policy = PolicyDocument::bucket_read(bucket).to_json()?;
        if let Err(err) = self
            .identity
            .put_role_policy(&role.name, &policy_name, &policy)
            .await
        {
            warn!(
                "Role {} was created but policy {} could not be attached; the role has no bucket access",
                role.name, policy_name
            );
            return Err(err);
        }

        Ok(role)
    }
}

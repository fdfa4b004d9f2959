//! Teardown of everything a migration created.
//!
//! Remote reclaim runs three independent actions and reports each outcome.
//! A failing action is logged and does not stop the others; nothing is
//! retried. Local reclaim removes the model from the hub download cache.

use crate::access::bucket_policy_name;
use crate::error::Result;
use crate::hub::HubCache;
use crate::location::StagedLocation;
use crate::naming::{canonical_name, format_size};
use crate::remote::RemoteServices;
use std::fmt;
use tracing::{info, warn};

/// One teardown action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimAction {
    /// Inline bucket policy and import role.
    Role,
    /// Imported model registration.
    Model,
    /// Staged objects under the working root.
    Objects,
}

impl fmt::Display for ReclaimAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReclaimAction::Role => f.write_str("role"),
            ReclaimAction::Model => f.write_str("model"),
            ReclaimAction::Objects => f.write_str("objects"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimOutcome {
    pub action: ReclaimAction,
    /// What was removed, or why the action failed.
    pub result: std::result::Result<String, String>,
}

/// Per-action results of a remote reclaim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimReport {
    pub outcomes: Vec<ReclaimOutcome>,
}

impl ReclaimReport {
    /// True when every action succeeded.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    pub fn outcome(&self, action: ReclaimAction) -> Option<&ReclaimOutcome> {
        self.outcomes.iter().find(|o| o.action == action)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ReclaimOutcome> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    fn record(&mut self, action: ReclaimAction, result: Result<String>) {
        let result = match result {
            Ok(detail) => {
                info!("Reclaimed {}: {}", action, detail);
                Ok(detail)
            }
            Err(err) => {
                warn!("Failed to reclaim {}: {}", action, err);
                Err(err.to_string())
            }
        };
        self.outcomes.push(ReclaimOutcome { action, result });
    }
}

/// Result of a local cache reclaim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalReclaim {
    NotFound,
    Deleted { repo_id: String, freed_bytes: u64 },
}

/// Removes the role, model and staged objects of a migration.
pub struct Reclaimer {
    services: RemoteServices,
    role_name: String,
}

impl Reclaimer {
    pub fn new(services: RemoteServices, role_name: impl Into<String>) -> Self {
        Self {
            services,
            role_name: role_name.into(),
        }
    }

    /// Tear down what migrating `artifact_id` to `destination` created.
    ///
    /// Model and object names are derived from the identifier as given, so
    /// this reverses a migration started with the same identifier.
    pub async fn reclaim(&self, destination: &StagedLocation, artifact_id: &str) -> ReclaimReport {
        let canonical = canonical_name(artifact_id);
        let mut report = ReclaimReport::default();

        report.record(ReclaimAction::Role, self.delete_role().await);
        report.record(ReclaimAction::Model, self.delete_model(&canonical).await);
        report.record(
            ReclaimAction::Objects,
            self.delete_objects(&destination.working_root(&canonical))
                .await,
        );

        report
    }

    async fn delete_role(&self) -> Result<String> {
        let policy_name = bucket_policy_name(&self.role_name);
        self.services
            .identity
            .delete_role_policy(&self.role_name, &policy_name)
            .await?;
        self.services.identity.delete_role(&self.role_name).await?;
        Ok(format!("deleted role {} and policy {}", self.role_name, policy_name))
    }

    async fn delete_model(&self, canonical: &str) -> Result<String> {
        self.services.models.delete_imported_model(canonical).await?;
        Ok(format!("deleted imported model {canonical}"))
    }

    async fn delete_objects(&self, working_root: &StagedLocation) -> Result<String> {
        let deleted = self
            .services
            .store
            .delete_prefix(working_root.bucket(), &format!("{}/", working_root.prefix()))
            .await?;
        Ok(format!("deleted {} objects under {}", deleted, working_root))
    }
}

/// Remove `artifact_id` from the local hub cache if it is there.
pub fn reclaim_local(cache: &dyn HubCache, artifact_id: &str) -> Result<LocalReclaim> {
    let Some(repo) = cache.find_repo(artifact_id)? else {
        info!("Model {} not found in local cache", artifact_id);
        return Ok(LocalReclaim::NotFound);
    };

    info!(
        "Deleting {} from local cache, freeing {}",
        repo.repo_id,
        format_size(repo.size_on_disk)
    );
    cache.delete_repo(&repo)?;
    Ok(LocalReclaim::Deleted {
        repo_id: repo.repo_id,
        freed_bytes: repo.size_on_disk,
    })
}

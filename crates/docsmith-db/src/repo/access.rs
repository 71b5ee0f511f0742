//! Entitlement and repo-branch repositories.

use async_trait::async_trait;
use docsmith_core::access::{
    BranchPublishConfig, EntitlementLookup, PublishConfigLookup, RepoPublishConfig,
};
use sqlx::PgPool;
use sqlx::types::Json;

use crate::DbError;

/// PostgreSQL implementation of EntitlementLookup.
pub struct PgEntitlementRepo {
    pool: PgPool,
}

impl PgEntitlementRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementLookup for PgEntitlementRepo {
    async fn entitled_repos(&self, user: &str) -> docsmith_core::Result<Option<Vec<String>>> {
        let repos: Option<Vec<String>> =
            sqlx::query_scalar("SELECT repos FROM entitlements WHERE github_username = $1")
                .bind(user)
                .fetch_optional(&self.pool)
                .await
                .map_err(DbError::from)?;
        Ok(repos)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct RepoBranchesRow {
    repo_name: String,
    project: String,
    prefix: String,
    branches: Json<Vec<BranchPublishConfig>>,
}

/// PostgreSQL implementation of PublishConfigLookup.
pub struct PgRepoBranchesRepo {
    pool: PgPool,
}

impl PgRepoBranchesRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PublishConfigLookup for PgRepoBranchesRepo {
    async fn repo_publish_config(
        &self,
        repo_name: &str,
    ) -> docsmith_core::Result<Option<RepoPublishConfig>> {
        let row = sqlx::query_as::<_, RepoBranchesRow>(
            r#"
            SELECT repo_name, project, prefix, branches
            FROM repo_branches
            WHERE repo_name = $1
            "#,
        )
        .bind(repo_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(DbError::from)?;

        Ok(row.map(|row| RepoPublishConfig {
            repo_name: row.repo_name,
            project: row.project,
            prefix: row.prefix,
            branches: row.branches.0,
        }))
    }
}

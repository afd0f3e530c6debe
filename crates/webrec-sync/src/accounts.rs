//! Owner to platform-account resolution.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use webrec_storage::{PgOccurrenceStore, PlatformConnection};

use crate::SyncError;

/// Credentials and identity needed to sync one owner's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountContext {
    pub owner_id: String,
    pub account_id: String,
    pub platform_user_id: String,
    pub access_token: String,
}

#[async_trait]
pub trait AccountResolver: Send + Sync {
    async fn resolve(&self, owner_id: &str) -> Result<AccountContext, SyncError>;
}

fn context_from_connection(
    connection: PlatformConnection,
    now: DateTime<Utc>,
) -> Result<AccountContext, SyncError> {
    let token = connection
        .access_token
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| SyncError::MissingToken(connection.owner_id.clone()))?;
    if let Some(expired_at) = connection.token_expires_at.filter(|at| *at <= now) {
        return Err(SyncError::TokenExpired {
            owner_id: connection.owner_id,
            expired_at,
        });
    }
    Ok(AccountContext {
        owner_id: connection.owner_id,
        account_id: connection.account_id,
        platform_user_id: connection.platform_user_id,
        access_token: token,
    })
}

/// Reads connections from the `platform_connections` table.
#[derive(Debug, Clone)]
pub struct PgAccountResolver {
    store: PgOccurrenceStore,
}

impl PgAccountResolver {
    pub fn new(store: PgOccurrenceStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccountResolver for PgAccountResolver {
    async fn resolve(&self, owner_id: &str) -> Result<AccountContext, SyncError> {
        let connection = self
            .store
            .find_connection(owner_id)
            .await?
            .ok_or_else(|| SyncError::UnknownOwner(owner_id.to_string()))?;
        context_from_connection(connection, Utc::now())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountRegistry {
    pub accounts: Vec<AccountEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountEntry {
    pub owner_id: String,
    pub account_id: String,
    #[serde(default = "default_platform_user")]
    pub platform_user_id: String,
    /// Name of the environment variable holding the access token.
    #[serde(default)]
    pub access_token_env: Option<String>,
    #[serde(default)]
    pub token_expires_at: Option<DateTime<Utc>>,
}

fn default_platform_user() -> String {
    "me".to_string()
}

pub fn load_account_registry(path: &Path) -> Result<AccountRegistry> {
    let text =
        std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// YAML-backed resolver for deployments without a connections table.
#[derive(Debug, Clone)]
pub struct RegistryAccountResolver {
    registry: AccountRegistry,
}

impl RegistryAccountResolver {
    pub fn new(registry: AccountRegistry) -> Self {
        Self { registry }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        Ok(Self::new(load_account_registry(path)?))
    }

    pub fn owner_ids(&self) -> Vec<String> {
        self.registry.accounts.iter().map(|a| a.owner_id.clone()).collect()
    }
}

#[async_trait]
impl AccountResolver for RegistryAccountResolver {
    async fn resolve(&self, owner_id: &str) -> Result<AccountContext, SyncError> {
        let entry = self
            .registry
            .accounts
            .iter()
            .find(|a| a.owner_id == owner_id)
            .ok_or_else(|| SyncError::UnknownOwner(owner_id.to_string()))?;
        let access_token = entry
            .access_token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok());
        context_from_connection(
            PlatformConnection {
                owner_id: entry.owner_id.clone(),
                account_id: entry.account_id.clone(),
                platform_user_id: entry.platform_user_id.clone(),
                access_token,
                token_expires_at: entry.token_expires_at,
            },
            Utc::now(),
        )
    }
}

/// Resolves exactly one known owner; used for fixture runs and tests.
#[derive(Debug, Clone)]
pub struct StaticAccountResolver {
    account: AccountContext,
}

impl StaticAccountResolver {
    pub fn new(account: AccountContext) -> Self {
        Self { account }
    }
}

#[async_trait]
impl AccountResolver for StaticAccountResolver {
    async fn resolve(&self, owner_id: &str) -> Result<AccountContext, SyncError> {
        if owner_id == self.account.owner_id {
            Ok(self.account.clone())
        } else {
            Err(SyncError::UnknownOwner(owner_id.to_string()))
        }
    }
}

//! # API Keys & Audit
//!
//! Every request runs as the [`Actor`] its bearer key was issued to. Keys
//! are stored by the SHA-256 of their value; the raw value is returned once,
//! at creation.
//!
//! Key management and bulk issue mutations are written to a bounded audit
//! log, oldest entries dropped first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

use tq_core::model::{Actor, UserId};
use tq_core::{SearchError, SearchResult};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Search and read issues.
    Read,
    /// Bulk update and delete issues.
    Write,
    /// Manage keys and read the audit log. Implies every other scope.
    Admin,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKey {
    pub id: String,
    pub label: String,
    /// Raw value, only present in the creation response.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(skip)]
    key_hash: String,
    pub scopes: Vec<Scope>,
    pub actor: Actor,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked: bool,
}

impl ApiKey {
    pub fn allows(&self, required: Scope) -> bool {
        self.scopes.contains(&Scope::Admin) || self.scopes.contains(&required)
    }

    fn redacted(&self) -> Self {
        Self {
            key: None,
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    CreateKey,
    RevokeKey,
    UpdateIssues,
    DeleteIssues,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::CreateKey => "create_key",
            Self::RevokeKey => "revoke_key",
            Self::UpdateIssues => "update_issues",
            Self::DeleteIssues => "delete_issues",
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    /// `user:<id>`, or `system` for startup work.
    pub actor: String,
    pub action: AuditAction,
    pub resource: String,
    pub detail: String,
}

/// Body of `POST /api/auth/keys`. The key acts as `user_id`, who must be
/// a member of the caller's organization.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
    pub label: String,
    pub scopes: Vec<Scope>,
    pub user_id: UserId,
}

pub fn actor_ref(actor: &Actor) -> String {
    format!("user:{}", actor.user_id)
}

pub struct AuthLayer {
    /// Keyed by key hash.
    keys: RwLock<HashMap<String, ApiKey>>,
    audit_log: RwLock<VecDeque<AuditEntry>>,
    audit_capacity: usize,
}

impl AuthLayer {
    pub fn new(audit_capacity: usize) -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            audit_log: RwLock::new(VecDeque::with_capacity(audit_capacity)),
            audit_capacity,
        }
    }

    /// Issue a key acting as `actor`. `issuer` is recorded in the audit log.
    pub async fn create_key(
        &self,
        issuer: &str,
        label: String,
        scopes: Vec<Scope>,
        actor: Actor,
    ) -> ApiKey {
        let raw = format!("tq_{}", Uuid::new_v4().as_simple());
        let key = ApiKey {
            id: format!("key-{}", Uuid::new_v4().as_simple()),
            label,
            key: Some(raw.clone()),
            key_hash: sha256_hex(&raw),
            scopes,
            actor,
            created_at: Utc::now(),
            last_used_at: None,
            revoked: false,
        };
        self.keys
            .write()
            .await
            .insert(key.key_hash.clone(), key.redacted());

        self.record(
            issuer,
            AuditAction::CreateKey,
            format!("api_key:{}", key.id),
            format!("'{}' acting as user {}", key.label, key.actor.user_id),
        )
        .await;
        key
    }

    pub async fn revoke_key(&self, issuer: &str, key_id: &str) -> SearchResult<()> {
        {
            let mut keys = self.keys.write().await;
            let key = keys
                .values_mut()
                .find(|k| k.id == key_id)
                .ok_or_else(|| SearchError::not_found(format!("Key '{}' not found", key_id)))?;
            key.revoked = true;
        }
        self.record(issuer, AuditAction::RevokeKey, format!("api_key:{}", key_id), String::new())
            .await;
        Ok(())
    }

    /// Every key, oldest first, without raw values.
    pub async fn list_keys(&self) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self.keys.read().await.values().cloned().collect();
        keys.sort_by_key(|k| k.created_at);
        keys
    }

    /// Key for a bearer token, unless unknown or revoked. Marks it used.
    pub async fn validate_token(&self, token: &str) -> Option<ApiKey> {
        let mut keys = self.keys.write().await;
        let key = keys.get_mut(&sha256_hex(token)).filter(|k| !k.revoked)?;
        key.last_used_at = Some(Utc::now());
        Some(key.clone())
    }

    pub async fn record(&self, actor: &str, action: AuditAction, resource: String, detail: String) {
        tracing::info!(actor, %action, %resource, "audit");
        let entry = AuditEntry {
            id: format!("audit-{}", Uuid::new_v4().as_simple()),
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action,
            resource,
            detail,
        };
        let mut log = self.audit_log.write().await;
        if log.len() >= self.audit_capacity {
            log.pop_front();
        }
        log.push_back(entry);
    }

    /// Newest first.
    pub async fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.audit_log.read().await.iter().rev().take(limit).cloned().collect()
    }
}

fn sha256_hex(input: &str) -> String {
    format!("{:x}", Sha256::digest(input.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::actor;

    #[tokio::test]
    async fn test_key_lifecycle() {
        let auth = AuthLayer::new(10);
        let key = auth.create_key("system", "ci".into(), vec![Scope::Read], actor()).await;
        let raw = key.key.clone().unwrap();
        assert!(raw.starts_with("tq_"));

        let validated = auth.validate_token(&raw).await.unwrap();
        assert_eq!(validated.actor, actor());
        assert!(validated.key.is_none());
        assert!(validated.last_used_at.is_some());
        assert!(validated.allows(Scope::Read));
        assert!(!validated.allows(Scope::Write));
        assert!(auth.validate_token("tq_bogus").await.is_none());

        auth.revoke_key("user:1", &key.id).await.unwrap();
        assert!(auth.validate_token(&raw).await.is_none());
        assert!(auth.revoke_key("user:1", "key-missing").await.is_err());

        let keys = auth.list_keys().await;
        assert_eq!(keys.len(), 1);
        assert!(keys[0].revoked);
        let json = serde_json::to_value(&keys[0]).unwrap();
        assert!(json.get("key").is_none());
        assert!(json.get("key_hash").is_none());

        let log = auth.audit_log(10).await;
        assert_eq!(log[0].action, AuditAction::RevokeKey);
        assert_eq!(log[1].action, AuditAction::CreateKey);
    }

    #[test]
    fn test_admin_implies_everything() {
        let key = ApiKey {
            id: "key-1".into(),
            label: "root".into(),
            key: None,
            key_hash: String::new(),
            scopes: vec![Scope::Admin],
            actor: actor(),
            created_at: Utc::now(),
            last_used_at: None,
            revoked: false,
        };
        assert!(key.allows(Scope::Read));
        assert!(key.allows(Scope::Write));
    }

    #[tokio::test]
    async fn test_audit_log_is_bounded() {
        let auth = AuthLayer::new(2);
        for i in 0..3 {
            auth.record("user:1", AuditAction::UpdateIssues, format!("organization:{}", i), String::new())
                .await;
        }
        let log = auth.audit_log(10).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].resource, "organization:2");
        assert_eq!(log[1].resource, "organization:1");
    }
}

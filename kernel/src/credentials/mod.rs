// Credential Vendor
//
// Mints short-lived storage credentials restricted to one table
// location. Every load mints a fresh credential; nothing is cached or
// renewed behind the caller's back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::CredentialsConfig;
use crate::storage::{ObjectPath, StorageError};

pub mod policy;

pub use policy::{AccessPolicy, WriteScope};

pub const CONFIG_ACCESS_KEY_ID: &str = "s3.access-key-id";
pub const CONFIG_SECRET_ACCESS_KEY: &str = "s3.secret-access-key";
pub const CONFIG_SESSION_TOKEN: &str = "s3.session-token";
pub const CONFIG_SESSION_TOKEN_EXPIRES_AT_MS: &str = "s3.session-token-expires-at-ms";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    Read,
    Write,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("cannot scope credentials to location: {0}")]
    Location(#[from] StorageError),

    #[error("credential issuance timed out after {0:?}")]
    Timeout(Duration),

    #[error("credential issuer failed: {0}")]
    Issuer(String),
}

/// Temporary credential bound to one table location.
#[derive(Clone, PartialEq, Eq)]
pub struct ScopedCredential {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub mode: AccessMode,
    /// Part of the location writes may touch. Ignored for reads.
    pub write_scope: WriteScope,
    /// Table location the session policy was generated for.
    pub location: String,
}

impl std::fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"xxxx")
            .field("session_token", &"xxxx")
            .field("expires_at", &self.expires_at)
            .field("mode", &self.mode)
            .field("write_scope", &self.write_scope)
            .field("location", &self.location)
            .finish()
    }
}

impl ScopedCredential {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the credential may put manifests and manifest lists next
    /// to the table metadata.
    pub fn can_write_metadata(&self) -> bool {
        self.mode == AccessMode::Write && self.write_scope == WriteScope::TableLocation
    }

    /// Render as the `config` map of a load-table response.
    pub fn to_config(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (CONFIG_ACCESS_KEY_ID.to_string(), self.access_key_id.clone()),
            (
                CONFIG_SECRET_ACCESS_KEY.to_string(),
                self.secret_access_key.clone(),
            ),
            (CONFIG_SESSION_TOKEN.to_string(), self.session_token.clone()),
            (
                CONFIG_SESSION_TOKEN_EXPIRES_AT_MS.to_string(),
                self.expires_at.timestamp_millis().to_string(),
            ),
        ])
    }
}

/// Request handed to the session issuer.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_name: String,
    pub policy: AccessPolicy,
    pub mode: AccessMode,
    pub write_scope: WriteScope,
    pub location: String,
    pub duration: Duration,
}

/// Token service that turns a session policy into a temporary credential.
#[async_trait]
pub trait SessionIssuer: Send + Sync {
    async fn assume_role(&self, request: SessionRequest) -> Result<ScopedCredential, CredentialError>;
}

pub struct CredentialVendor {
    issuer: Arc<dyn SessionIssuer>,
    config: CredentialsConfig,
}

impl CredentialVendor {
    pub fn new(issuer: Arc<dyn SessionIssuer>, config: CredentialsConfig) -> Self {
        Self { issuer, config }
    }

    /// Vend a credential for `location` using the configured write scope.
    pub async fn vend(
        &self,
        session_name: &str,
        location: &str,
        mode: AccessMode,
    ) -> Result<ScopedCredential, CredentialError> {
        self.vend_scoped(session_name, location, mode, self.config.write_scope)
            .await
    }

    /// Write credential covering the whole table location, used by purge.
    pub async fn vend_for_purge(
        &self,
        session_name: &str,
        location: &str,
    ) -> Result<ScopedCredential, CredentialError> {
        self.vend_scoped(
            session_name,
            location,
            AccessMode::Write,
            WriteScope::TableLocation,
        )
        .await
    }

    async fn vend_scoped(
        &self,
        session_name: &str,
        location: &str,
        mode: AccessMode,
        write_scope: WriteScope,
    ) -> Result<ScopedCredential, CredentialError> {
        let path = ObjectPath::parse(location)?;
        let policy = AccessPolicy::for_table(&path, mode, write_scope);
        let request = SessionRequest {
            session_name: session_name.to_string(),
            policy,
            mode,
            write_scope,
            location: location.trim_end_matches('/').to_string(),
            duration: self.config.ttl(),
        };

        let timeout = self.config.issuance_timeout();
        let credential = tokio::time::timeout(timeout, self.issuer.assume_role(request))
            .await
            .map_err(|_| CredentialError::Timeout(timeout))??;

        tracing::debug!(
            session = session_name,
            location,
            ?mode,
            expires_at = %credential.expires_at,
            "vended scoped credential"
        );
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SlowIssuer;

    #[async_trait]
    impl SessionIssuer for SlowIssuer {
        async fn assume_role(
            &self,
            _request: SessionRequest,
        ) -> Result<ScopedCredential, CredentialError> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Err(CredentialError::Issuer("unreachable".into()))
        }
    }

    fn credential() -> ScopedCredential {
        ScopedCredential {
            access_key_id: "ASIAEXAMPLE".into(),
            secret_access_key: "very-secret".into(),
            session_token: "token-value".into(),
            expires_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            mode: AccessMode::Read,
            write_scope: WriteScope::TableLocation,
            location: "s3://bucket/wh/t".into(),
        }
    }

    #[test]
    fn metadata_writes_need_table_location_scope() {
        let read = credential();
        assert!(!read.can_write_metadata());

        let write = ScopedCredential {
            mode: AccessMode::Write,
            ..credential()
        };
        assert!(write.can_write_metadata());

        let data_only = ScopedCredential {
            write_scope: WriteScope::DataOnly,
            ..write
        };
        assert!(!data_only.can_write_metadata());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let rendered = format!("{:?}", credential());
        assert!(rendered.contains("ASIAEXAMPLE"));
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("token-value"));
    }

    #[test]
    fn config_map_uses_s3_keys() {
        let config = credential().to_config();
        assert_eq!(config[CONFIG_ACCESS_KEY_ID], "ASIAEXAMPLE");
        assert_eq!(config[CONFIG_SESSION_TOKEN], "token-value");
        assert_eq!(config[CONFIG_SESSION_TOKEN_EXPIRES_AT_MS], "1700000000000");
    }

    #[tokio::test]
    async fn slow_issuer_times_out() {
        let config = CredentialsConfig {
            issuance_timeout_ms: 10,
            ..CredentialsConfig::default()
        };
        let vendor = CredentialVendor::new(Arc::new(SlowIssuer), config);
        let err = vendor
            .vend("test", "s3://bucket/wh/t", AccessMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Timeout(_)));
    }

    #[tokio::test]
    async fn non_s3_location_is_rejected() {
        let vendor = CredentialVendor::new(Arc::new(SlowIssuer), CredentialsConfig::default());
        let err = vendor
            .vend("test", "/tmp/table", AccessMode::Read)
            .await
            .unwrap_err();
        assert!(matches!(err, CredentialError::Location(_)));
    }
}

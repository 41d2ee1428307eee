// In-memory Object Store
//
// Object storage and token service in one process. Sessions minted by
// `assume_role` are remembered with their policy, and every scoped
// request is checked against it the way S3 checks an STS session.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::{ObjectMeta, ObjectPath, ObjectStore, StorageAuth, StorageError};
use crate::credentials::policy::{
    AccessPolicy, ACTION_DELETE_OBJECT, ACTION_GET_OBJECT, ACTION_PUT_OBJECT,
};
use crate::credentials::{CredentialError, ScopedCredential, SessionIssuer, SessionRequest};

#[derive(Debug)]
struct Session {
    secret_access_key: String,
    session_token: String,
    expires_at: chrono::DateTime<Utc>,
    policy: AccessPolicy,
}

#[derive(Debug, Default)]
pub struct InMemoryObjectStore {
    objects: RwLock<BTreeMap<String, Bytes>>,
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects under `prefix`, bypassing policies.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.objects
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }

    fn session_policy(&self, credential: &ScopedCredential) -> Result<AccessPolicy, StorageError> {
        let sessions = self.sessions.read();
        let session = sessions
            .get(&credential.access_key_id)
            .ok_or(StorageError::InvalidCredential)?;
        if session.secret_access_key != credential.secret_access_key
            || session.session_token != credential.session_token
        {
            return Err(StorageError::InvalidCredential);
        }
        if Utc::now() >= session.expires_at {
            return Err(StorageError::CredentialExpired);
        }
        Ok(session.policy.clone())
    }

    fn authorize_object(
        &self,
        auth: StorageAuth<'_>,
        action: &'static str,
        location: &str,
    ) -> Result<(), StorageError> {
        let path = ObjectPath::parse(location)?;
        let StorageAuth::Scoped(credential) = auth else {
            return Ok(());
        };
        if self.session_policy(credential)?.allows_object(action, &path) {
            Ok(())
        } else {
            Err(StorageError::AccessDenied {
                action,
                location: location.to_string(),
            })
        }
    }

    fn authorize_list(&self, auth: StorageAuth<'_>, prefix: &str) -> Result<(), StorageError> {
        let path = ObjectPath::parse(prefix)?;
        let StorageAuth::Scoped(credential) = auth else {
            return Ok(());
        };
        if self
            .session_policy(credential)?
            .allows_list(path.bucket(), path.key())
        {
            Ok(())
        } else {
            Err(StorageError::AccessDenied {
                action: crate::credentials::policy::ACTION_LIST_BUCKET,
                location: prefix.to_string(),
            })
        }
    }
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn put(
        &self,
        auth: StorageAuth<'_>,
        location: &str,
        body: Bytes,
    ) -> Result<(), StorageError> {
        self.authorize_object(auth, ACTION_PUT_OBJECT, location)?;
        self.objects.write().insert(location.to_string(), body);
        Ok(())
    }

    async fn get(&self, auth: StorageAuth<'_>, location: &str) -> Result<Bytes, StorageError> {
        self.authorize_object(auth, ACTION_GET_OBJECT, location)?;
        self.objects
            .read()
            .get(location)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(location.to_string()))
    }

    async fn list(
        &self,
        auth: StorageAuth<'_>,
        prefix: &str,
    ) -> Result<Vec<ObjectMeta>, StorageError> {
        self.authorize_list(auth, prefix)?;
        Ok(self
            .objects
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| ObjectMeta {
                location: k.clone(),
                size: v.len() as u64,
            })
            .collect())
    }

    async fn delete(&self, auth: StorageAuth<'_>, location: &str) -> Result<(), StorageError> {
        self.authorize_object(auth, ACTION_DELETE_OBJECT, location)?;
        self.objects.write().remove(location);
        Ok(())
    }
}

#[async_trait]
impl SessionIssuer for InMemoryObjectStore {
    async fn assume_role(
        &self,
        request: SessionRequest,
    ) -> Result<ScopedCredential, CredentialError> {
        let duration = chrono::Duration::from_std(request.duration)
            .map_err(|e| CredentialError::Issuer(format!("invalid session duration: {e}")))?;
        let expires_at = Utc::now() + duration;

        let key_suffix = Uuid::new_v4().simple().to_string().to_uppercase();
        let credential = ScopedCredential {
            access_key_id: format!("ASIA{}", &key_suffix[..16]),
            secret_access_key: Uuid::new_v4().simple().to_string(),
            session_token: Uuid::new_v4().to_string(),
            expires_at,
            mode: request.mode,
            write_scope: request.write_scope,
            location: request.location,
        };

        self.sessions.write().insert(
            credential.access_key_id.clone(),
            Session {
                secret_access_key: credential.secret_access_key.clone(),
                session_token: credential.session_token.clone(),
                expires_at,
                policy: request.policy,
            },
        );
        tracing::debug!(session = %request.session_name, "issued session credential");
        Ok(credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CredentialsConfig;
    use crate::credentials::{AccessMode, CredentialVendor};
    use std::sync::Arc;

    const T1: &str = "s3://bucket/wh/ns/t1";
    const T2: &str = "s3://bucket/wh/ns/t2";

    async fn seeded() -> Arc<InMemoryObjectStore> {
        let store = Arc::new(InMemoryObjectStore::new());
        for table in [T1, T2] {
            store
                .put(
                    StorageAuth::Service,
                    &format!("{table}/data/f.json"),
                    Bytes::from_static(b"[]"),
                )
                .await
                .unwrap();
        }
        store
    }

    fn vendor(store: &Arc<InMemoryObjectStore>, config: CredentialsConfig) -> CredentialVendor {
        CredentialVendor::new(store.clone(), config)
    }

    #[tokio::test]
    async fn read_credential_cannot_touch_other_table() {
        let store = seeded().await;
        let cred = vendor(&store, CredentialsConfig::default())
            .vend("reader", T1, AccessMode::Read)
            .await
            .unwrap();
        let auth = StorageAuth::Scoped(&cred);

        assert_eq!(store.list(auth, &format!("{T1}/data/")).await.unwrap().len(), 1);
        assert!(store.get(auth, &format!("{T1}/data/f.json")).await.is_ok());

        assert!(matches!(
            store.list(auth, &format!("{T2}/data/")).await,
            Err(StorageError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.get(auth, &format!("{T2}/data/f.json")).await,
            Err(StorageError::AccessDenied { .. })
        ));
        assert!(matches!(
            store
                .put(auth, &format!("{T1}/data/g.json"), Bytes::from_static(b"[]"))
                .await,
            Err(StorageError::AccessDenied { .. })
        ));
    }

    #[tokio::test]
    async fn write_credential_stays_in_its_table() {
        let store = seeded().await;
        let cred = vendor(&store, CredentialsConfig::default())
            .vend("writer", T1, AccessMode::Write)
            .await
            .unwrap();
        let auth = StorageAuth::Scoped(&cred);

        let file = format!("{T1}/data/new.json");
        store.put(auth, &file, Bytes::from_static(b"[1]")).await.unwrap();
        assert_eq!(store.get(auth, &file).await.unwrap(), Bytes::from_static(b"[1]"));
        assert_eq!(store.list(auth, &format!("{T1}/data/")).await.unwrap().len(), 2);

        let foreign = format!("{T2}/data/new.json");
        assert!(matches!(
            store.put(auth, &foreign, Bytes::from_static(b"[1]")).await,
            Err(StorageError::AccessDenied { .. })
        ));
        assert!(matches!(
            store.delete(auth, &format!("{T2}/data/f.json")).await,
            Err(StorageError::AccessDenied { .. })
        ));
        assert_eq!(store.count_prefix(&format!("{T2}/")), 1);
    }

    #[tokio::test]
    async fn expired_credential_is_refused() {
        let store = seeded().await;
        let config = CredentialsConfig {
            ttl_secs: 0,
            ..CredentialsConfig::default()
        };
        let cred = vendor(&store, config)
            .vend("reader", T1, AccessMode::Read)
            .await
            .unwrap();

        assert_eq!(
            store
                .get(StorageAuth::Scoped(&cred), &format!("{T1}/data/f.json"))
                .await
                .unwrap_err(),
            StorageError::CredentialExpired
        );
    }

    #[tokio::test]
    async fn forged_credential_is_refused() {
        let store = seeded().await;
        let mut cred = vendor(&store, CredentialsConfig::default())
            .vend("reader", T1, AccessMode::Read)
            .await
            .unwrap();
        cred.mode = AccessMode::Write;
        cred.session_token = "forged".into();

        assert_eq!(
            store
                .get(StorageAuth::Scoped(&cred), &format!("{T1}/data/f.json"))
                .await
                .unwrap_err(),
            StorageError::InvalidCredential
        );
    }
}

//! In-memory implementation of ProviderStore
//!
//! Backs the test suites and any embedder that runs without PostgreSQL.
//! Inspection and fault injection helpers need the `test-util` feature.
//!
//! Sessions follow the same scope rules as the PostgreSQL store: an open
//! transaction works on a private copy of the committed state and records
//! its writes in a journal; a savepoint remembers the copy and the journal
//! length. The outermost commit replays the journal against the committed
//! state, so a concurrent writer that got there first surfaces as a unique
//! violation.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use provider_registry_core::{
    GpgKey, NewProviderBinary, NewProviderVersion, Provider, ProviderBinary, ProviderId,
    ProviderVersion, ProviderVersionId,
};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{DbError, DbResult};
use crate::store::{ProviderStore, StoreSession};
use crate::transaction::{TransactionCommand, TransactionStack};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    providers: BTreeMap<ProviderId, Provider>,
    versions: BTreeMap<ProviderVersionId, ProviderVersion>,
    binaries: BTreeMap<i64, ProviderBinary>,
    gpg_keys: Vec<GpgKey>,
}

#[derive(Debug, Clone)]
enum Write {
    Version(ProviderVersion),
    Binary(ProviderBinary),
    Latest(ProviderId, Option<ProviderVersionId>),
}

impl MemoryState {
    fn apply(&mut self, write: &Write) -> DbResult<()> {
        match write {
            Write::Version(version) => {
                if !self.providers.contains_key(&version.provider_id) {
                    return Err(DbError::ForeignKeyViolation(format!(
                        "provider {} does not exist",
                        version.provider_id
                    )));
                }
                let duplicate = self.versions.values().any(|existing| {
                    existing.provider_id == version.provider_id && existing.version == version.version
                });
                if duplicate {
                    return Err(DbError::UniqueViolation(format!(
                        "provider {} already has version {}",
                        version.provider_id, version.version
                    )));
                }
                self.versions.insert(version.id, version.clone());
            }
            Write::Binary(binary) => {
                if !self.versions.contains_key(&binary.provider_version_id) {
                    return Err(DbError::ForeignKeyViolation(format!(
                        "provider version {} does not exist",
                        binary.provider_version_id
                    )));
                }
                let duplicate = self.binaries.values().any(|existing| {
                    existing.provider_version_id == binary.provider_version_id
                        && existing.platform == binary.platform
                });
                if duplicate {
                    return Err(DbError::UniqueViolation(format!(
                        "provider version {} already has a {} binary",
                        binary.provider_version_id, binary.platform
                    )));
                }
                self.binaries.insert(binary.id, binary.clone());
            }
            Write::Latest(provider_id, version_id) => {
                if let Some(version_id) = version_id {
                    if !self.versions.contains_key(version_id) {
                        return Err(DbError::ForeignKeyViolation(format!(
                            "provider version {} does not exist",
                            version_id
                        )));
                    }
                }
                let provider = self
                    .providers
                    .get_mut(provider_id)
                    .ok_or_else(|| DbError::NotFound(format!("provider {}", provider_id)))?;
                provider.latest_version_id = *version_id;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Shared {
    committed: MemoryState,
    next_id: i64,
    fail_binary_inserts: bool,
}

impl Shared {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory provider store
///
/// Clones share the same committed state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryProviderStore {
    shared: Arc<Mutex<Shared>>,
}

impl InMemoryProviderStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, assigning its id
    pub fn add_provider(&self, mut provider: Provider) -> Provider {
        let mut shared = self.shared.lock();
        provider.id = ProviderId(shared.allocate_id());
        shared.committed.providers.insert(provider.id, provider.clone());
        provider
    }

    /// Register a namespace GPG key, assigning its id
    pub fn add_gpg_key(&self, mut key: GpgKey) -> GpgKey {
        let mut shared = self.shared.lock();
        key.id = Some(shared.allocate_id());
        shared.committed.gpg_keys.push(key.clone());
        key
    }

    /// Committed versions of a provider
    #[cfg(any(test, feature = "test-util"))]
    pub fn committed_versions(&self, provider_id: ProviderId) -> Vec<ProviderVersion> {
        self.shared
            .lock()
            .committed
            .versions
            .values()
            .filter(|version| version.provider_id == provider_id)
            .cloned()
            .collect()
    }

    /// Committed binaries of a version
    #[cfg(any(test, feature = "test-util"))]
    pub fn committed_binaries(&self, version_id: ProviderVersionId) -> Vec<ProviderBinary> {
        self.shared
            .lock()
            .committed
            .binaries
            .values()
            .filter(|binary| binary.provider_version_id == version_id)
            .cloned()
            .collect()
    }

    /// Total committed binary rows
    #[cfg(any(test, feature = "test-util"))]
    pub fn binary_count(&self) -> usize {
        self.shared.lock().committed.binaries.len()
    }

    /// Committed provider row
    #[cfg(any(test, feature = "test-util"))]
    pub fn provider(&self, provider_id: ProviderId) -> Option<Provider> {
        self.shared.lock().committed.providers.get(&provider_id).cloned()
    }

    /// Make every binary insert fail with a connection error
    #[cfg(any(test, feature = "test-util"))]
    pub fn fail_binary_inserts(&self, fail: bool) {
        self.shared.lock().fail_binary_inserts = fail;
    }
}

#[async_trait]
impl ProviderStore for InMemoryProviderStore {
    async fn session(&self) -> DbResult<Box<dyn StoreSession>> {
        Ok(Box::new(InMemorySession {
            shared: Arc::clone(&self.shared),
            stack: TransactionStack::new(),
            working: None,
            journal: Vec::new(),
            savepoints: Vec::new(),
        }))
    }

    async fn health_check(&self) -> DbResult<()> {
        Ok(())
    }
}

/// Session over an [`InMemoryProviderStore`]
pub struct InMemorySession {
    shared: Arc<Mutex<Shared>>,
    stack: TransactionStack,
    /// Private state while a transaction is open
    working: Option<MemoryState>,
    journal: Vec<Write>,
    /// Working state and journal length at each open savepoint
    savepoints: Vec<(MemoryState, usize)>,
}

impl InMemorySession {
    fn read<T>(&self, f: impl FnOnce(&MemoryState) -> T) -> T {
        match &self.working {
            Some(state) => f(state),
            None => f(&self.shared.lock().committed),
        }
    }

    fn write(&mut self, write: Write) -> DbResult<()> {
        match &mut self.working {
            Some(state) => {
                state.apply(&write)?;
                self.journal.push(write);
                Ok(())
            }
            None => self.shared.lock().committed.apply(&write),
        }
    }

    fn discard(&mut self) {
        self.working = None;
        self.journal.clear();
        self.savepoints.clear();
    }
}

#[async_trait]
impl StoreSession for InMemorySession {
    async fn begin(&mut self) -> DbResult<()> {
        match self.stack.begin() {
            TransactionCommand::Begin => {
                self.working = Some(self.shared.lock().committed.clone());
                self.journal.clear();
            }
            _ => {
                let state = self.working.clone().ok_or_else(|| {
                    DbError::Transaction("savepoint without a transaction".to_string())
                })?;
                self.savepoints.push((state, self.journal.len()));
            }
        }
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        match self.stack.commit()? {
            TransactionCommand::Commit => {
                let journal = std::mem::take(&mut self.journal);
                self.discard();

                let mut shared = self.shared.lock();
                let mut next = shared.committed.clone();
                for write in &journal {
                    next.apply(write)?;
                }
                shared.committed = next;
                Ok(())
            }
            _ => {
                self.savepoints.pop();
                Ok(())
            }
        }
    }

    async fn rollback(&mut self) -> DbResult<()> {
        match self.stack.rollback()? {
            TransactionCommand::Rollback => {
                self.discard();
                Ok(())
            }
            _ => {
                let (state, journal_len) = self.savepoints.pop().ok_or_else(|| {
                    DbError::Transaction("rollback to a savepoint that was never set".to_string())
                })?;
                self.working = Some(state);
                self.journal.truncate(journal_len);
                Ok(())
            }
        }
    }

    fn transaction_depth(&self) -> usize {
        self.stack.depth()
    }

    async fn find_provider(&mut self, namespace: &str, name: &str) -> DbResult<Option<Provider>> {
        Ok(self.read(|state| {
            state
                .providers
                .values()
                .find(|p| p.namespace.eq_ignore_ascii_case(namespace) && p.name == name)
                .cloned()
        }))
    }

    async fn get_provider(&mut self, id: ProviderId) -> DbResult<Option<Provider>> {
        Ok(self.read(|state| state.providers.get(&id).cloned()))
    }

    async fn list_versions(&mut self, provider_id: ProviderId) -> DbResult<Vec<ProviderVersion>> {
        Ok(self.read(|state| {
            state
                .versions
                .values()
                .filter(|v| v.provider_id == provider_id)
                .cloned()
                .collect()
        }))
    }

    async fn find_version(
        &mut self,
        provider_id: ProviderId,
        version: &str,
    ) -> DbResult<Option<ProviderVersion>> {
        Ok(self.read(|state| {
            state
                .versions
                .values()
                .find(|v| v.provider_id == provider_id && v.version == version)
                .cloned()
        }))
    }

    async fn get_version(&mut self, id: ProviderVersionId) -> DbResult<Option<ProviderVersion>> {
        Ok(self.read(|state| state.versions.get(&id).cloned()))
    }

    async fn list_binaries(&mut self, version_id: ProviderVersionId) -> DbResult<Vec<ProviderBinary>> {
        let mut binaries: Vec<ProviderBinary> = self.read(|state| {
            state
                .binaries
                .values()
                .filter(|b| b.provider_version_id == version_id)
                .cloned()
                .collect()
        });
        binaries.sort_by(|a, b| a.platform.cmp(&b.platform));
        Ok(binaries)
    }

    async fn list_gpg_keys(&mut self, namespace: &str) -> DbResult<Vec<GpgKey>> {
        Ok(self.read(|state| {
            state
                .gpg_keys
                .iter()
                .filter(|key| key.belongs_to(namespace))
                .cloned()
                .collect()
        }))
    }

    async fn insert_version(&mut self, version: NewProviderVersion) -> DbResult<ProviderVersion> {
        let id = ProviderVersionId(self.shared.lock().allocate_id());
        let version = version.into_version(id, Utc::now());
        self.write(Write::Version(version.clone()))?;
        Ok(version)
    }

    async fn insert_binary(
        &mut self,
        version_id: ProviderVersionId,
        binary: NewProviderBinary,
    ) -> DbResult<ProviderBinary> {
        let id = {
            let mut shared = self.shared.lock();
            if shared.fail_binary_inserts {
                return Err(DbError::Connection("connection reset by peer".to_string()));
            }
            shared.allocate_id()
        };
        let binary = ProviderBinary {
            id,
            provider_version_id: version_id,
            platform: binary.platform,
            filename: binary.filename,
            checksum: binary.checksum,
            location: binary.location,
        };
        self.write(Write::Binary(binary.clone()))?;
        Ok(binary)
    }

    async fn set_latest_version(
        &mut self,
        provider_id: ProviderId,
        version_id: Option<ProviderVersionId>,
    ) -> DbResult<()> {
        self.write(Write::Latest(provider_id, version_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provider_registry_core::{Checksum, Platform, ProviderTier};

    fn provider() -> Provider {
        Provider {
            id: ProviderId(0),
            namespace: "acme".to_string(),
            name: "widgets".to_string(),
            description: None,
            tier: ProviderTier::Community,
            category: None,
            repository_owner: "acme".to_string(),
            repository_name: "terraform-provider-widgets".to_string(),
            latest_version_id: None,
        }
    }

    fn new_version(provider_id: ProviderId, version: &str) -> NewProviderVersion {
        NewProviderVersion {
            provider_id,
            version: version.to_string(),
            git_tag: format!("v{}", version),
            beta: false,
            gpg_key_fingerprint: "34365D9472D7468F".to_string(),
            published_at: None,
            protocol_versions: vec!["5.0".to_string()],
            shasums_url: "https://example.com/SHA256SUMS".to_string(),
            shasums_signature_url: "https://example.com/SHA256SUMS.sig".to_string(),
        }
    }

    fn new_binary(os: &str) -> NewProviderBinary {
        NewProviderBinary {
            platform: Platform::new(os, "amd64"),
            filename: format!("terraform-provider-widgets_1.0.0_{}_amd64.zip", os),
            checksum: Checksum::of(os.as_bytes()),
            location: "https://example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());

        let mut session = store.session().await.unwrap();
        session.begin().await.unwrap();
        let version = session.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();
        session.insert_binary(version.id, new_binary("linux")).await.unwrap();

        // Invisible to other sessions until committed
        assert!(store.committed_versions(provider.id).is_empty());
        assert_eq!(session.list_versions(provider.id).await.unwrap().len(), 1);

        session.commit().await.unwrap();
        assert_eq!(store.committed_versions(provider.id).len(), 1);
        assert_eq!(store.committed_binaries(version.id).len(), 1);
    }

    #[tokio::test]
    async fn test_savepoint_rollback_keeps_outer_writes() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());

        let mut session = store.session().await.unwrap();
        session.begin().await.unwrap();
        session.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();

        session.begin().await.unwrap();
        assert_eq!(session.transaction_depth(), 2);
        let inner = session.insert_version(new_version(provider.id, "2.0.0")).await.unwrap();
        session.insert_binary(inner.id, new_binary("linux")).await.unwrap();
        session.rollback().await.unwrap();

        assert!(session.find_version(provider.id, "2.0.0").await.unwrap().is_none());
        session.commit().await.unwrap();

        let committed = store.committed_versions(provider.id);
        assert_eq!(committed.len(), 1);
        assert_eq!(committed[0].version, "1.0.0");
        assert_eq!(store.binary_count(), 0);
    }

    #[tokio::test]
    async fn test_outer_rollback_discards_released_savepoints() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());

        let mut session = store.session().await.unwrap();
        session.begin().await.unwrap();
        session.begin().await.unwrap();
        session.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();
        session.commit().await.unwrap();
        session.rollback().await.unwrap();

        assert!(store.committed_versions(provider.id).is_empty());
        assert_eq!(session.transaction_depth(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_version_is_unique_violation() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());

        let mut session = store.session().await.unwrap();
        session.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();
        let err = session
            .insert_version(new_version(provider.id, "1.0.0"))
            .await
            .unwrap_err();
        assert!(err.is_already_exists());
    }

    #[tokio::test]
    async fn test_concurrent_commit_conflict() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());

        let mut first = store.session().await.unwrap();
        let mut second = store.session().await.unwrap();
        first.begin().await.unwrap();
        second.begin().await.unwrap();

        first.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();
        second.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();

        first.commit().await.unwrap();
        let err = second.commit().await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(second.transaction_depth(), 0);
        assert_eq!(store.committed_versions(provider.id).len(), 1);
    }

    #[tokio::test]
    async fn test_set_latest_version() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());

        let mut session = store.session().await.unwrap();
        session.begin().await.unwrap();
        let version = session.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();
        session.set_latest_version(provider.id, Some(version.id)).await.unwrap();
        assert_eq!(store.provider(provider.id).unwrap().latest_version_id, None);
        session.commit().await.unwrap();

        assert_eq!(
            store.provider(provider.id).unwrap().latest_version_id,
            Some(version.id)
        );
        assert!(session
            .set_latest_version(ProviderId(999), None)
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_gpg_keys_by_namespace() {
        let store = InMemoryProviderStore::new();
        store.add_gpg_key(GpgKey::new(Some("Acme".to_string()), "AAAA", "armor"));
        store.add_gpg_key(GpgKey::new(Some("other".to_string()), "BBBB", "armor"));

        let mut session = store.session().await.unwrap();
        let keys = session.list_gpg_keys("acme").await.unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id, "AAAA");
        assert!(keys[0].id.is_some());
    }

    #[tokio::test]
    async fn test_injected_binary_failure() {
        let store = InMemoryProviderStore::new();
        let provider = store.add_provider(provider());
        store.fail_binary_inserts(true);

        let mut session = store.session().await.unwrap();
        let version = session.insert_version(new_version(provider.id, "1.0.0")).await.unwrap();
        let err = session.insert_binary(version.id, new_binary("linux")).await.unwrap_err();
        assert!(matches!(err, DbError::Connection(_)));
    }

    #[tokio::test]
    async fn test_close_without_scope() {
        let store = InMemoryProviderStore::new();
        let mut session = store.session().await.unwrap();
        assert!(session.commit().await.is_err());
        assert!(session.rollback().await.is_err());
    }
}

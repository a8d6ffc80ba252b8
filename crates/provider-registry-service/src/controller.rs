//! Transactional ingestion of a single release
//!
//! The controller runs extraction outside any transaction, then persists the
//! verified rows and the recalculated latest-version pointer inside one
//! scope. The [`ReleaseOutcome`] tells the caller whether to keep going.

use provider_registry_core::{GpgKey, ProviderVersion, ReleaseMetadata};
use provider_registry_db::StoreSession;
use tracing::{error, info, instrument, warn};

use crate::error::{IngestionError, IngestionResult};
use crate::extractor::{ExtractionFailure, ExtractionStep, PreparedRelease, ProviderVersionExtractor};
use crate::latest::latest_version;
use crate::snapshot::ProviderSnapshot;

/// How failures of recognized kinds are treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionMode {
    /// One requested version; every failure propagates
    Single,
    /// Best-effort refresh; discovery, trust and duplicate failures skip the release
    Batch,
}

/// Why a release was left out of a batch
#[derive(Debug)]
pub struct SkipReason {
    pub release: String,
    pub tag: String,
    pub step: ExtractionStep,
    pub error: IngestionError,
}

/// Result of ingesting one release
#[derive(Debug)]
pub enum ReleaseOutcome {
    Committed(ProviderVersion),
    Skipped(SkipReason),
    Fatal(IngestionError),
}

impl ReleaseOutcome {
    /// Convert to a result the way single-version indexing needs it
    pub fn into_result(self) -> IngestionResult<ProviderVersion> {
        match self {
            Self::Committed(version) => Ok(version),
            Self::Skipped(reason) => Err(reason.error),
            Self::Fatal(error) => Err(error),
        }
    }
}

/// Wraps release persistence in a transaction scope
pub struct IngestionTransactionController {
    extractor: ProviderVersionExtractor,
}

impl IngestionTransactionController {
    pub fn new(extractor: ProviderVersionExtractor) -> Self {
        Self { extractor }
    }

    pub fn extractor(&self) -> &ProviderVersionExtractor {
        &self.extractor
    }

    /// Ingest one release
    ///
    /// Opens a scope on `session` (a savepoint when the caller already holds
    /// a transaction), persists the release and the provider's latest
    /// pointer, and commits. Any failure inside the scope rolls it back.
    #[instrument(
        skip_all,
        fields(provider = %snapshot.provider.full_id(), version = %release.version, mode = ?mode)
    )]
    pub async fn ingest(
        &self,
        session: &mut dyn StoreSession,
        snapshot: &ProviderSnapshot,
        release: &ReleaseMetadata,
        namespace_keys: &[GpgKey],
        mode: IngestionMode,
    ) -> ReleaseOutcome {
        if snapshot.is_indexed(&release.version) {
            let failure = ExtractionFailure::new(ExtractionStep::CheckIndexed, already_indexed(snapshot, release));
            return settle(release, failure, mode);
        }

        let prepared = match self.extractor.extract(snapshot, release, namespace_keys).await {
            Ok(verified) => self.extractor.prepare(snapshot, verified).await,
            Err(failure) => Err(failure),
        };
        let prepared = match prepared {
            Ok(prepared) => prepared,
            Err(failure) => return settle(release, failure, mode),
        };

        if let Err(e) = session.begin().await {
            return ReleaseOutcome::Fatal(e.into());
        }

        match self.persist(session, snapshot, prepared).await {
            Ok(version) => match session.commit().await {
                Ok(()) => {
                    info!(
                        release = %release.name,
                        tag = %release.tag,
                        version_id = %version.id,
                        "Provider version committed"
                    );
                    ReleaseOutcome::Committed(version)
                }
                // A failed commit has already ended the scope
                Err(e) => settle(release, persist_failure(snapshot, release, e.into()), mode),
            },
            Err(e) => {
                if let Err(rollback_error) = session.rollback().await {
                    error!(error = %rollback_error, cause = %e, "Rollback failed");
                    return ReleaseOutcome::Fatal(rollback_error.into());
                }
                settle(release, persist_failure(snapshot, release, e), mode)
            }
        }
    }

    async fn persist(
        &self,
        session: &mut dyn StoreSession,
        snapshot: &ProviderSnapshot,
        prepared: PreparedRelease,
    ) -> IngestionResult<ProviderVersion> {
        let provider_id = snapshot.provider.id;
        let version = self.extractor.persist(session, prepared).await?;

        let versions = session.list_versions(provider_id).await?;
        let latest = latest_version(&versions).map(|v| v.id);
        session.set_latest_version(provider_id, latest).await?;
        Ok(version)
    }
}

fn already_indexed(snapshot: &ProviderSnapshot, release: &ReleaseMetadata) -> IngestionError {
    IngestionError::ProviderVersionAlreadyIndexed {
        provider: snapshot.provider.full_id(),
        version: release.version.clone(),
    }
}

/// Unique violations at persist time mean another writer indexed the version
fn persist_failure(
    snapshot: &ProviderSnapshot,
    release: &ReleaseMetadata,
    error: IngestionError,
) -> ExtractionFailure {
    if error.is_duplicate() {
        ExtractionFailure::new(ExtractionStep::Persist, already_indexed(snapshot, release))
    } else {
        ExtractionFailure::new(ExtractionStep::Persist, error)
    }
}

fn settle(release: &ReleaseMetadata, failure: ExtractionFailure, mode: IngestionMode) -> ReleaseOutcome {
    let ExtractionFailure { step, error } = failure;

    if mode == IngestionMode::Batch && error.is_recoverable() {
        warn!(
            release = %release.name,
            tag = %release.tag,
            step = %step,
            error = %error,
            "Skipping release"
        );
        return ReleaseOutcome::Skipped(SkipReason {
            release: release.name.clone(),
            tag: release.tag.clone(),
            step,
            error,
        });
    }

    if error.is_recoverable() {
        warn!(release = %release.name, tag = %release.tag, step = %step, error = %error, "Release rejected");
    } else {
        error!(release = %release.name, tag = %release.tag, step = %step, error = %error, "Release ingestion failed");
    }
    ReleaseOutcome::Fatal(error)
}

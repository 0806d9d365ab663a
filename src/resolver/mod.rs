//! Identity resolution.
//!
//! [`IdentityResolver::identify`] decides whether a submitted
//! `(email, phoneNumber)` pair denotes an existing identity, a new secondary
//! record of one, or a brand-new primary, merging clusters the submission
//! bridges. The algorithm:
//!
//! 1. Exact-duplicate check (unlocked, read only): an exactly represented
//!    pair returns its cluster's view and writes nothing.
//! 2. Under the neighborhood lock: find every record sharing either
//!    identifier and the distinct primaries they belong to.
//! 3. No match creates a primary. Otherwise the lowest-id primary survives
//!    and every other primary is demoted under it.
//! 4. The demotions and the new secondary are committed as one atomic unit.
//! 5. The view is assembled from the survivor's cluster (unlocked).

mod config;
mod lock;

pub use config::{ResolverConfig, ENV_COMMIT_ATTEMPTS, ENV_LOCK_STRIPES, ENV_LOCK_TIMEOUT_MS};
pub use lock::{NeighborhoodGuard, NeighborhoodLocks};

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::contact::{Contact, ContactId, Identifiers, NewContact};
use crate::error::{ContactError, ContactResult, ExecutionError};
use crate::storage::{ContactStore, ResolutionCommit, StorageError};
use crate::view::IdentityView;

/// Upper bound on `linked_id` hops followed when a read raced a merge.
///
/// Stored links are always one hop; a second hop only appears when a record
/// read a moment ago has since been demoted.
const MAX_LINK_HOPS: usize = 4;

/// Resolves contact submissions into identity clusters.
pub struct IdentityResolver {
    store: Arc<dyn ContactStore>,
    locks: NeighborhoodLocks,
    config: ResolverConfig,
}

impl std::fmt::Debug for IdentityResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityResolver")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IdentityResolver {
    /// Create a resolver with the default configuration.
    #[must_use]
    pub fn new(store: Arc<dyn ContactStore>) -> Self {
        let config = ResolverConfig::default();
        Self {
            store,
            locks: NeighborhoodLocks::new(config.lock_stripes),
            config,
        }
    }

    /// Create a resolver with a custom configuration.
    ///
    /// # Errors
    /// Returns a validation error if `config` is invalid.
    pub fn with_config(store: Arc<dyn ContactStore>, config: ResolverConfig) -> ContactResult<Self> {
        let config = config.validate()?;
        Ok(Self {
            store,
            locks: NeighborhoodLocks::new(config.lock_stripes),
            config,
        })
    }

    /// The active configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn ContactStore> {
        &self.store
    }

    /// Resolve a raw submission. At least one field must be non-blank.
    ///
    /// # Errors
    /// - `Validation` before any storage access if the submission is empty
    /// - `Execution(LockTimeout | ContactNotFound | CommitConflict)`: retryable
    /// - `Storage`: backend failures, unchanged
    pub fn identify(
        &self,
        email: Option<&str>,
        phone_number: Option<&str>,
    ) -> ContactResult<IdentityView> {
        let ids = Identifiers::new(email, phone_number)?;
        self.identify_ids(&ids)
    }

    /// Resolve an already validated submission.
    ///
    /// # Errors
    /// See [`IdentityResolver::identify`].
    pub fn identify_ids(&self, ids: &Identifiers) -> ContactResult<IdentityView> {
        if let Some(existing) = self.store.find_exact(ids)? {
            let primary = self.owning_primary(&existing)?;
            debug!(%ids, primary = %primary, "exact match; nothing to record");
            return self.view(primary);
        }

        let survivor = {
            let _guard = self
                .locks
                .acquire(ids.lock_keys().as_slice(), self.config.lock_timeout)?;
            self.resolve_locked(ids)?
        };

        self.view(survivor)
    }

    /// Every stored record, ascending id.
    ///
    /// # Errors
    /// Propagates storage errors.
    pub fn list_all(&self) -> ContactResult<Vec<Contact>> {
        Ok(self.store.find_all()?)
    }

    /// Delete every record; returns how many were removed.
    ///
    /// Not coordinated with in-flight `identify` calls.
    ///
    /// # Errors
    /// Propagates storage errors.
    pub fn clear_all(&self) -> ContactResult<usize> {
        let removed = self.store.delete_all()?;
        info!(removed, "cleared all contacts");
        Ok(removed)
    }

    /// Steps 2-4; the caller holds the neighborhood lock.
    fn resolve_locked(&self, ids: &Identifiers) -> ContactResult<ContactId> {
        for attempt in 1..=self.config.commit_attempts {
            // A concurrent caller may have recorded the same pair while we waited.
            if let Some(existing) = self.store.find_exact(ids)? {
                return self.owning_primary(&existing);
            }

            let matches = self.store.find_any_match(ids)?;
            if matches.is_empty() {
                let created = self.store.create(NewContact::primary(ids))?;
                debug!(%ids, id = %created.id, "new primary");
                return Ok(created.id);
            }

            let commit = self.plan(ids, &matches)?;
            let survivor = commit.survivor;
            let demoted = commit.demote.clone();

            match self.store.commit(commit) {
                Ok(created) => {
                    if !demoted.is_empty() {
                        info!(%ids, survivor = %survivor, demoted = ?demoted, "merged identity clusters");
                    }
                    if let Some(created) = created {
                        debug!(%ids, id = %created.id, primary = %survivor, "new secondary");
                    }
                    return Ok(survivor);
                }
                Err(StorageError::PrecedenceChanged(id)) => {
                    warn!(%ids, attempt, contact = %id, "cluster changed during resolution; re-planning");
                }
                Err(StorageError::ContactNotFound(id)) => {
                    return Err(ExecutionError::ContactNotFound { id }.into());
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(ExecutionError::CommitConflict {
            attempts: self.config.commit_attempts,
        }
        .into())
    }

    /// Picks the surviving primary among the matches and builds the commit.
    fn plan(&self, ids: &Identifiers, matches: &[Contact]) -> ContactResult<ResolutionCommit> {
        let mut primaries = BTreeSet::new();
        for contact in matches {
            primaries.insert(self.owning_primary(contact)?);
        }

        let mut primaries = primaries.into_iter();
        let survivor = primaries
            .next()
            .ok_or_else(|| ContactError::internal("matching records without a primary"))?;

        Ok(ResolutionCommit {
            survivor,
            demote: primaries.collect(),
            create: Some(NewContact::secondary(ids, survivor)),
        })
    }

    /// Follows `linked_id` to the record that currently owns `contact`.
    fn owning_primary(&self, contact: &Contact) -> ContactResult<ContactId> {
        if contact.is_primary() {
            return Ok(contact.id);
        }

        let mut next = contact.primary_id();
        for _ in 0..MAX_LINK_HOPS {
            let owner = self
                .store
                .get(next)?
                .ok_or(ExecutionError::ContactNotFound { id: next })?;
            if owner.is_primary() {
                return Ok(owner.id);
            }
            next = owner.primary_id();
        }

        Err(ContactError::internal(format!(
            "link chain from contact {} exceeds {MAX_LINK_HOPS} hops",
            contact.id
        )))
    }

    /// Step 5: consolidated view of the cluster owned by `primary_id`.
    fn view(&self, primary_id: ContactId) -> ContactResult<IdentityView> {
        let mut primary_id = primary_id;
        for _ in 0..MAX_LINK_HOPS {
            let cluster = self.store.find_by_cluster(primary_id)?;
            let head = cluster
                .iter()
                .find(|c| c.id == primary_id)
                .ok_or(ExecutionError::ContactNotFound { id: primary_id })?;

            // Demoted by a concurrent merge since we decided; follow it.
            if !head.is_primary() {
                primary_id = head.primary_id();
                continue;
            }

            return IdentityView::assemble(primary_id, &cluster)
                .ok_or_else(|| ExecutionError::ContactNotFound { id: primary_id }.into());
        }

        Err(ContactError::internal(format!(
            "primary {primary_id} kept moving while assembling its view"
        )))
    }
}

//! Store-held pessimistic lock serializing migration runs across processes.
//!
//! The lock is a single document at [`LOCK_KEY`]. Acquisition is a
//! read-then-CAS write, so of several racing processes exactly one wins and
//! the others see `false` immediately. There is no waiting or retry here;
//! callers decide whether to try again later.
//!
//! A process holds the lock only while the stored `uuid` equals the token it
//! generated on acquisition. Anyone else trying to release gets
//! [`DocmoveError::LockReleaseError`] and must use [`LockCoordinator::force_release_lock`].

use crate::core::error::DocmoveError;
use crate::core::identity::IdentityProvider;
use crate::core::model::{LOCK_KEY, LockRecord};
use crate::core::store::{DocumentStore, Repository};
use crate::core::time;
use tracing::{error, info, warn};

pub struct LockCoordinator<'a> {
    repository: Repository<'a, LockRecord>,
    identity: &'a dyn IdentityProvider,
    uuid: Option<String>,
}

impl<'a> LockCoordinator<'a> {
    pub fn new(store: &'a dyn DocumentStore, identity: &'a dyn IdentityProvider) -> Self {
        Self {
            repository: Repository::new(store),
            identity,
            uuid: None,
        }
    }

    /// Tries once to take the lock. `Ok(false)` means another process holds it
    /// or won the race.
    pub fn acquire_lock(&mut self) -> Result<bool, DocmoveError> {
        info!(store = %self.repository.store_name(), "Trying to acquire change log lock");

        let mut lock = match self.repository.find_one(LOCK_KEY)? {
            None => LockRecord::default(),
            Some(existing) if existing.locked => {
                warn!(
                    holder = existing.runner.as_deref().unwrap_or("unknown"),
                    "Change log lock is already held"
                );
                return Ok(false);
            }
            Some(existing) => existing,
        };

        let token = time::new_lock_token();
        lock.locked = true;
        lock.uuid = Some(token.clone());
        lock.runner = Some(self.identity.runner());
        lock.timestamp = Some(time::now_epoch_millis());

        match self.repository.check_and_save(LOCK_KEY, &mut lock) {
            Ok(()) => {}
            Err(DocmoveError::ConflictError { .. }) => {
                warn!(
                    holder = %self.holder()?,
                    "Another process acquired the change log lock first"
                );
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        self.uuid = Some(token);
        info!("Successfully acquired change log lock");
        Ok(true)
    }

    /// Whether the stored lock is held by this coordinator.
    pub fn is_lock_acquired(&self) -> Result<bool, DocmoveError> {
        let Some(lock) = self.repository.find_one(LOCK_KEY)? else {
            return Ok(false);
        };
        if !lock.locked {
            return Ok(false);
        }
        if lock.uuid.is_none() || lock.uuid != self.uuid {
            warn!("Change log lock is held by another process");
            return Ok(false);
        }
        Ok(true)
    }

    /// Releases a lock this coordinator holds.
    pub fn release_lock(&mut self) -> Result<(), DocmoveError> {
        if !self.is_lock_acquired()? {
            return Err(DocmoveError::LockReleaseError);
        }
        self.force_release_lock()
    }

    /// Deletes the lock whoever holds it. Operator recovery only.
    pub fn force_release_lock(&mut self) -> Result<(), DocmoveError> {
        self.repository.delete(LOCK_KEY)?;
        self.uuid = None;
        info!("Successfully released change log lock");
        Ok(())
    }

    /// Runner recorded on the current lock, or `unknown`.
    pub fn holder(&self) -> Result<String, DocmoveError> {
        Ok(self
            .repository
            .find_one(LOCK_KEY)?
            .and_then(|l| l.runner)
            .unwrap_or_else(|| "unknown".to_string()))
    }

    /// The stored lock record, if any.
    pub fn current(&self) -> Result<Option<LockRecord>, DocmoveError> {
        self.repository.find_one(LOCK_KEY)
    }

    /// Acquires the lock and returns a guard releasing it on every exit path.
    pub fn acquire_scoped(&mut self) -> Result<Option<LockGuard<'_, 'a>>, DocmoveError> {
        if self.acquire_lock()? {
            Ok(Some(self.guard()))
        } else {
            Ok(None)
        }
    }

    /// Guards a lock already taken with [`LockCoordinator::acquire_lock`].
    pub fn guard(&mut self) -> LockGuard<'_, 'a> {
        LockGuard {
            coordinator: self,
            released: false,
        }
    }
}

/// Holds the lock until [`LockGuard::release`] or drop.
///
/// Drop cannot report failures, so it only logs them; call `release` where the
/// error matters.
pub struct LockGuard<'c, 'a> {
    coordinator: &'c mut LockCoordinator<'a>,
    released: bool,
}

impl LockGuard<'_, '_> {
    pub fn release(mut self) -> Result<(), DocmoveError> {
        self.released = true;
        self.coordinator.release_lock()
    }
}

impl Drop for LockGuard<'_, '_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(e) = self.coordinator.release_lock() {
            error!(error = %e, "Failed to release change log lock");
        }
    }
}

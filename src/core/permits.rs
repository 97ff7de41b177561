use crate::core::error::ComputationError;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputationResourcesStatus {
    pub available_cores: usize,
    pub busy_cores: usize,
}

/// Admission control for command batches: at most `available_cores` batches
/// hold a slot at any time.
#[derive(Debug, Clone)]
pub struct PermitScheduler {
    permits: Arc<Semaphore>,
    busy: Arc<AtomicUsize>,
    available: usize,
}

impl PermitScheduler {
    pub fn new(available_cores: usize) -> Result<Self, ComputationError> {
        if available_cores == 0 {
            return Err(ComputationError::InvalidConfig(
                "available cores must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(available_cores)),
            busy: Arc::new(AtomicUsize::new(0)),
            available: available_cores,
        })
    }

    /// Waits for a free slot. Dropping the returned future before it resolves
    /// consumes nothing.
    pub async fn enter(&self) -> Result<SlotPermit, ComputationError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ComputationError::Closed)?;
        Ok(self.admit(permit))
    }

    /// Takes a slot only if one is free right now.
    pub fn try_enter(&self) -> Option<SlotPermit> {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => Some(self.admit(permit)),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => None,
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> SlotPermit {
        let busy = self.busy.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::trace!("Slot acquired ({busy}/{} busy)", self.available);
        SlotPermit {
            busy: Arc::clone(&self.busy),
            _permit: permit,
        }
    }

    pub fn status(&self) -> ComputationResourcesStatus {
        ComputationResourcesStatus {
            available_cores: self.available,
            busy_cores: self.busy.load(Ordering::Acquire),
        }
    }
}

/// A held slot. Dropping it (or calling [`SlotPermit::exit`]) frees the slot.
#[derive(Debug)]
pub struct SlotPermit {
    busy: Arc<AtomicUsize>,
    // dropped after `Drop::drop`, so the counter goes down before the slot is handed out
    _permit: OwnedSemaphorePermit,
}

impl SlotPermit {
    pub fn exit(self) {}
}

impl Drop for SlotPermit {
    fn drop(&mut self) {
        self.busy.fetch_sub(1, Ordering::AcqRel);
    }
}

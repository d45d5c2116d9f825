use crate::dao::GiftStore;
use crate::error::{GiftError, GiftResult};
use crate::model::GiftLink;
use chrono::Utc;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::iter;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const ID_LENGTH: usize = 12;
pub const ESCALATED_ID_LENGTH: usize = ID_LENGTH + 2;
pub const RETRY_BUDGET: usize = 5;
const BACKOFF_STEP_MILLIS: u64 = 20;

/// Source of candidate gift ids.
pub trait IdGenerator: Send + Sync + 'static {
    fn generate(&self, length: usize) -> String;
}

/// Uniform draws from the 62 character alphanumeric alphabet.
#[derive(Clone, Copy, Default)]
pub struct RandomIds;

impl IdGenerator for RandomIds {
    fn generate(&self, length: usize) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(length)
            .map(char::from)
            .collect()
    }
}

pub fn canonical_url(origin: &str, unique_id: &str) -> String {
    format!("{}/gift/{}", origin.trim_end_matches('/'), unique_id)
}

pub fn is_valid_id(id: &str) -> bool {
    (ID_LENGTH..=ESCALATED_ID_LENGTH).contains(&id.len())
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub struct LinkAllocator<S, G = RandomIds> {
    store: S,
    ids: G,
}

impl<S: GiftStore> LinkAllocator<S> {
    pub fn new(store: S) -> Self {
        Self::with_generator(store, RandomIds)
    }
}

impl<S: GiftStore, G: IdGenerator> LinkAllocator<S, G> {
    pub fn with_generator(store: S, ids: G) -> Self {
        Self { store, ids }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Claims a fresh id in the store and returns the gift link built from it.
    ///
    /// Tries `RETRY_BUDGET` candidates of `ID_LENGTH`, then one of `ESCALATED_ID_LENGTH`.
    /// Store failures use up the same budget.
    pub async fn allocate(&self, origin: &str, cancel: &CancellationToken) -> GiftResult<GiftLink> {
        let lengths = iter::repeat(ID_LENGTH)
            .take(RETRY_BUDGET)
            .chain(iter::once(ESCALATED_ID_LENGTH));
        let mut collisions = 0;
        let mut store_failures = 0;

        for (attempt, length) in lengths.enumerate() {
            if cancel.is_cancelled() {
                return Err(GiftError::Cancelled);
            }
            let candidate = self.ids.generate(length);
            let created_at = Utc::now();
            let claimed = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GiftError::Cancelled),
                claimed = self.store.insert_if_absent(&candidate, created_at) => claimed,
            };
            match claimed {
                Ok(true) => {
                    if cancel.is_cancelled() {
                        return Err(GiftError::Cancelled);
                    }
                    tracing::debug!(attempt, unique_id = %candidate, "Gift id claimed");
                    return Ok(GiftLink {
                        canonical_url: canonical_url(origin, &candidate),
                        unique_id: candidate,
                        created_at,
                    });
                }
                Ok(false) => {
                    collisions += 1;
                    tracing::debug!(attempt, candidate = %candidate, "Gift id collision");
                }
                Err(err) => {
                    store_failures += 1;
                    tracing::warn!(attempt, "Claiming gift id failed: {}", err);
                    let backoff = Duration::from_millis(BACKOFF_STEP_MILLIS * (attempt as u64 + 1));
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(GiftError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        tracing::error!(
            collisions,
            store_failures,
            "Could not claim a gift id. Exhausted all retries of generating a unique id"
        );
        Err(GiftError::AllocationExhausted)
    }
}

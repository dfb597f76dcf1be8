//! Referrer chain walk
//!
//! The chain is an id-based child → parent lookup through the store. Walks
//! are read-only and need no coordination.

use rustc_hash::FxHashSet;

use super::error::ReferralError;
use super::store::ReferralStore;
use super::types::UserId;

/// Ancestors of `user_id`, nearest first, at most `max_depth` of them.
///
/// Stops early at a user without referrer. Fails with `UserNotFound` for an
/// unknown start user, and with `DataIntegrity` when the walk revisits a user
/// or reaches a referrer missing from the user table.
pub async fn referrer_chain(
    store: &dyn ReferralStore,
    user_id: UserId,
    max_depth: usize,
) -> Result<Vec<UserId>, ReferralError> {
    let start = store
        .get_user(user_id)
        .await?
        .ok_or(ReferralError::UserNotFound(user_id))?;

    let mut chain = Vec::with_capacity(max_depth);
    let mut visited = FxHashSet::default();
    visited.insert(user_id);

    let mut next = start.referred_by;
    while let Some(ancestor) = next {
        if chain.len() == max_depth {
            break;
        }
        if !visited.insert(ancestor) {
            tracing::error!(
                user_id,
                ancestor,
                depth = chain.len() + 1,
                "Referral cycle detected"
            );
            return Err(ReferralError::DataIntegrity(format!(
                "referral cycle: user {} reached again above user {}",
                ancestor, user_id
            )));
        }
        chain.push(ancestor);

        let record = store.get_user(ancestor).await?.ok_or_else(|| {
            ReferralError::DataIntegrity(format!(
                "user {} references missing referrer {}",
                user_id, ancestor
            ))
        })?;
        next = record.referred_by;
    }

    Ok(chain)
}

/// Whether linking `user_id` under `referrer` would close a loop.
///
/// Walks the referrer's full ancestry (not depth-capped): any path back to
/// `user_id`, or an already corrupted ancestry, counts as a cycle.
pub async fn would_create_cycle(
    store: &dyn ReferralStore,
    user_id: UserId,
    referrer: UserId,
) -> Result<bool, ReferralError> {
    if user_id == referrer {
        return Ok(true);
    }

    let mut visited = FxHashSet::default();
    let mut next = Some(referrer);
    while let Some(current) = next {
        if current == user_id || !visited.insert(current) {
            return Ok(true);
        }
        next = match store.get_user(current).await? {
            Some(record) => record.referred_by,
            None => None,
        };
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referral::store::MemoryReferralStore;

    #[tokio::test]
    async fn test_chain_stops_at_root() {
        // 1 <- 2 <- 3
        let store = MemoryReferralStore::new();
        store.seed_user(1, None);
        store.seed_user(2, Some(1));
        store.seed_user(3, Some(2));

        assert_eq!(referrer_chain(&store, 3, 3).await.unwrap(), vec![2, 1]);
        assert_eq!(referrer_chain(&store, 1, 3).await.unwrap(), Vec::<UserId>::new());
    }

    #[tokio::test]
    async fn test_chain_is_depth_capped() {
        // 1 <- 2 <- 3 <- 4 <- 5 <- 6
        let store = MemoryReferralStore::new();
        store.seed_user(1, None);
        for id in 2..=6 {
            store.seed_user(id, Some(id - 1));
        }
        assert_eq!(referrer_chain(&store, 6, 3).await.unwrap(), vec![5, 4, 3]);
        assert_eq!(referrer_chain(&store, 6, 1).await.unwrap(), vec![5]);
    }

    #[tokio::test]
    async fn test_cycle_fails_fast() {
        // 1 -> 2 -> 1 (corrupted data)
        let store = MemoryReferralStore::new();
        store.seed_user(1, Some(2));
        store.seed_user(2, Some(1));

        let err = referrer_chain(&store, 1, 3).await.unwrap_err();
        assert_eq!(err.code(), "DATA_INTEGRITY");
    }

    #[tokio::test]
    async fn test_self_loop_detected() {
        let store = MemoryReferralStore::new();
        store.seed_user(9, Some(9));
        assert!(matches!(
            referrer_chain(&store, 9, 3).await,
            Err(ReferralError::DataIntegrity(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_user() {
        let store = MemoryReferralStore::new();
        assert_eq!(
            referrer_chain(&store, 42, 3).await,
            Err(ReferralError::UserNotFound(42))
        );
    }

    #[tokio::test]
    async fn test_would_create_cycle() {
        let store = MemoryReferralStore::new();
        store.seed_user(1, None);
        store.seed_user(2, Some(1));
        store.seed_user(3, Some(2));

        assert!(would_create_cycle(&store, 5, 5).await.unwrap());
        assert!(would_create_cycle(&store, 1, 3).await.unwrap());
        assert!(!would_create_cycle(&store, 4, 3).await.unwrap());
    }
}

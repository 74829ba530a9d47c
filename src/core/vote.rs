//! Transactional vote application
//!
//! A vote locks its post row, appends the vote record and writes the new
//! score inside one transaction. Concurrent votes on the same post queue up
//! on the row lock, so each one starts from the score the previous one
//! committed.

use log::{debug, error};
use std::sync::Arc;

use crate::error::{MurmurError, Result};
use crate::storage::{PostId, PostStore, StoreTransaction, Vote, VoteValue};

/// Result of a committed vote
#[derive(Debug, Clone, PartialEq)]
pub struct VoteOutcome {
    pub post_id: PostId,
    pub new_score: i64,
    pub vote: Vote,
}

pub struct VoteCoordinator {
    store: Arc<dyn PostStore>,
}

impl VoteCoordinator {
    pub fn new(store: Arc<dyn PostStore>) -> Self {
        Self { store }
    }

    /// Apply a +1/-1 vote and return the committed score.
    ///
    /// Any value other than 1 or -1 fails with `InvalidVoteValue` before the
    /// store is touched. A missing or hidden post fails with `PostNotFound`.
    /// If any step fails the transaction is rolled back, so a vote record
    /// never exists without its score change.
    pub async fn apply_vote(&self, post_id: PostId, value: i64) -> Result<VoteOutcome> {
        let value = VoteValue::try_from(value)?;

        let mut tx = self.store.begin().await?;
        match Self::vote_in_transaction(tx.as_mut(), post_id, value).await {
            Ok((new_score, vote)) => {
                tx.commit().await?;
                debug!("Vote {} on post {} committed, score now {}", vote.id, post_id, new_score);
                Ok(VoteOutcome {
                    post_id,
                    new_score,
                    vote,
                })
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    error!(
                        "Rollback of vote on post {} failed: {}",
                        post_id, rollback_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn vote_in_transaction(
        tx: &mut dyn StoreTransaction,
        post_id: PostId,
        value: VoteValue,
    ) -> Result<(i64, Vote)> {
        let post = match tx.lock_post(post_id).await? {
            Some(post) if !post.hidden => post,
            _ => return Err(MurmurError::PostNotFound(post_id)),
        };

        let vote = tx.insert_vote(post_id, value).await?;
        let new_score = post.score + value.delta();
        tx.update_score(post_id, new_score).await?;

        Ok((new_score, vote))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryPostStore, Post};
    use async_trait::async_trait;

    async fn setup(initial_score: i64) -> (Arc<MemoryPostStore>, VoteCoordinator, Post) {
        let store = Arc::new(MemoryPostStore::new());
        let post = store
            .create_post("a post".to_string(), initial_score)
            .await
            .unwrap();
        let coordinator = VoteCoordinator::new(store.clone());
        (store, coordinator, post)
    }

    async fn race_votes(n: usize) {
        let (store, coordinator, post) = setup(1).await;
        let coordinator = Arc::new(coordinator);
        let post_id = post.id;

        let tasks: Vec<_> = (0..n)
            .map(|i| {
                let coordinator = coordinator.clone();
                let value = if i % 3 == 0 { -1 } else { 1 };
                tokio::spawn(async move {
                    coordinator.apply_vote(post_id, value).await.map(|_| value)
                })
            })
            .collect();

        let mut applied_sum = 0;
        for task in tasks {
            applied_sum += task.await.unwrap().unwrap();
        }

        let stored = store.get_post(post.id).await.unwrap().unwrap();
        assert_eq!(stored.score, 1 + applied_sum);

        let votes = store.votes_for_post(post.id).await.unwrap();
        assert_eq!(votes.len(), n);
        let vote_sum: i64 = votes.iter().map(|v| v.value.delta()).sum();
        assert_eq!(stored.score, 1 + vote_sum);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_lost_updates_two_voters() {
        race_votes(2).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_lost_updates_ten_voters() {
        race_votes(10).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_lost_updates_hundred_voters() {
        race_votes(100).await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_three_concurrent_votes_scenario() {
        let (store, coordinator, post) = setup(1).await;
        let coordinator = Arc::new(coordinator);
        let post_id = post.id;

        let tasks: Vec<_> = [1, 1, -1]
            .into_iter()
            .map(|value| {
                let coordinator = coordinator.clone();
                tokio::spawn(async move { coordinator.apply_vote(post_id, value).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().score, 2);
        assert_eq!(store.votes_for_post(post.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_values_have_no_side_effect() {
        let (store, coordinator, post) = setup(1).await;

        for value in [0, 2, -2, 100] {
            let err = coordinator.apply_vote(post.id, value).await.unwrap_err();
            assert!(matches!(err, MurmurError::InvalidVoteValue(v) if v == value));
        }

        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().score, 1);
        assert!(store.votes_for_post(post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_and_hidden_posts_not_found() {
        let (store, coordinator, post) = setup(1).await;

        assert!(matches!(
            coordinator.apply_vote(404, 1).await,
            Err(MurmurError::PostNotFound(404))
        ));

        let mut tx = store.begin().await.unwrap();
        tx.lock_post(post.id).await.unwrap();
        tx.set_hidden(post.id, true).await.unwrap();
        tx.commit().await.unwrap();

        assert!(matches!(
            coordinator.apply_vote(post.id, 1).await,
            Err(MurmurError::PostNotFound(_))
        ));
        assert!(store.votes_for_post(post.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_returns_new_score_and_vote() {
        let (_store, coordinator, post) = setup(1).await;

        let outcome = coordinator.apply_vote(post.id, -1).await.unwrap();
        assert_eq!(outcome.new_score, 0);
        assert_eq!(outcome.vote.post_id, post.id);
        assert_eq!(outcome.vote.value, VoteValue::Down);

        let outcome = coordinator.apply_vote(post.id, -1).await.unwrap();
        assert_eq!(outcome.new_score, -1);
    }

    /// Store whose transactions fail when writing the score
    struct FailingScoreStore {
        inner: MemoryPostStore,
    }

    struct FailingScoreTransaction {
        inner: Box<dyn StoreTransaction>,
    }

    #[async_trait]
    impl PostStore for FailingScoreStore {
        async fn create_post(&self, content: String, initial_score: i64) -> Result<Post> {
            self.inner.create_post(content, initial_score).await
        }
        async fn list_posts(&self) -> Result<Vec<Post>> {
            self.inner.list_posts().await
        }
        async fn trending_posts(&self, limit: usize) -> Result<Vec<Post>> {
            self.inner.trending_posts(limit).await
        }
        async fn get_post(&self, post_id: PostId) -> Result<Option<Post>> {
            self.inner.get_post(post_id).await
        }
        async fn votes_for_post(&self, post_id: PostId) -> Result<Vec<Vote>> {
            self.inner.votes_for_post(post_id).await
        }
        async fn health_check(&self) -> Result<()> {
            Ok(())
        }
        async fn begin(&self) -> Result<Box<dyn StoreTransaction>> {
            Ok(Box::new(FailingScoreTransaction {
                inner: self.inner.begin().await?,
            }))
        }
    }

    #[async_trait]
    impl StoreTransaction for FailingScoreTransaction {
        async fn lock_post(&mut self, post_id: PostId) -> Result<Option<Post>> {
            self.inner.lock_post(post_id).await
        }
        async fn insert_vote(&mut self, post_id: PostId, value: VoteValue) -> Result<Vote> {
            self.inner.insert_vote(post_id, value).await
        }
        async fn update_score(&mut self, _post_id: PostId, _score: i64) -> Result<()> {
            Err(MurmurError::StoreUnavailable("disk full".to_string()))
        }
        async fn set_hidden(&mut self, post_id: PostId, hidden: bool) -> Result<()> {
            self.inner.set_hidden(post_id, hidden).await
        }
        async fn commit(self: Box<Self>) -> Result<()> {
            self.inner.commit().await
        }
        async fn rollback(self: Box<Self>) -> Result<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn test_failed_step_rolls_back_vote_record() {
        let store = Arc::new(FailingScoreStore {
            inner: MemoryPostStore::new(),
        });
        let post = store.create_post("fragile".to_string(), 1).await.unwrap();
        let coordinator = VoteCoordinator::new(store.clone());

        let err = coordinator.apply_vote(post.id, 1).await.unwrap_err();
        assert!(matches!(err, MurmurError::StoreUnavailable(_)));

        assert!(store.votes_for_post(post.id).await.unwrap().is_empty());
        assert_eq!(store.get_post(post.id).await.unwrap().unwrap().score, 1);

        // Row lock was released by the rollback
        let mut tx = store.inner.begin().await.unwrap();
        assert!(tx.lock_post(post.id).await.unwrap().is_some());
    }
}

//! Integrated board service that coordinates the store, votes and the hub

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::core::envelope::NotificationEnvelope;
use crate::core::hub::{Hub, HubStats};
use crate::core::rate_limiter::RateLimiter;
use crate::core::vote::{VoteCoordinator, VoteOutcome};
use crate::error::{MurmurError, Result};
use crate::storage::{Post, PostId, PostStore};

/// Snapshot served by the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct BoardHealth {
    pub status: &'static str,
    pub store: String,
    pub hub: Option<HubStats>,
}

impl BoardHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "ok"
    }
}

/// Board service shared by every request handler
pub struct BoardServer {
    store: Arc<dyn PostStore>,
    votes: VoteCoordinator,
    hub: Hub,
    post_limiter: Arc<RateLimiter>,
    vote_limiter: Arc<RateLimiter>,
    config: ServerConfig,
}

impl BoardServer {
    pub fn new(store: Arc<dyn PostStore>, hub: Hub, config: ServerConfig) -> Self {
        Self {
            votes: VoteCoordinator::new(store.clone()),
            post_limiter: Arc::new(RateLimiter::new(config.post_rate)),
            vote_limiter: Arc::new(RateLimiter::new(config.vote_rate)),
            store,
            hub,
            config,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn post_limiter(&self) -> &Arc<RateLimiter> {
        &self.post_limiter
    }

    pub fn vote_limiter(&self) -> &Arc<RateLimiter> {
        &self.vote_limiter
    }

    /// Store a new post and announce it to every live client
    pub async fn create_post(&self, content: String) -> Result<Post> {
        self.validate_content(&content)?;

        let post = self
            .store
            .create_post(content, self.config.initial_score)
            .await?;
        info!("Post {} created", post.id);

        self.announce(NotificationEnvelope::NewPost(post.clone()));
        Ok(post)
    }

    /// Apply a vote and broadcast the committed score
    pub async fn vote(&self, post_id: PostId, value: i64) -> Result<VoteOutcome> {
        let outcome = self.votes.apply_vote(post_id, value).await?;
        self.announce(NotificationEnvelope::vote_update(
            outcome.post_id,
            outcome.new_score,
        ));
        Ok(outcome)
    }

    /// Soft-delete a post. Hiding a post that is already hidden reports it
    /// as not found.
    pub async fn hide_post(&self, post_id: PostId) -> Result<()> {
        let mut tx = self.store.begin().await?;
        let hidden = async {
            match tx.lock_post(post_id).await? {
                Some(post) if !post.hidden => tx.set_hidden(post_id, true).await,
                _ => Err(MurmurError::PostNotFound(post_id)),
            }
        }
        .await;

        match hidden {
            Ok(()) => tx.commit().await?,
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!("Rollback of hide on post {} failed: {}", post_id, rollback_err);
                }
                return Err(e);
            }
        }

        info!("Post {} hidden", post_id);
        self.announce(NotificationEnvelope::delete_post(post_id));
        Ok(())
    }

    pub async fn list_posts(&self) -> Result<Vec<Post>> {
        self.store.list_posts().await
    }

    pub async fn trending_posts(&self) -> Result<Vec<Post>> {
        self.store.trending_posts(self.config.trending_limit).await
    }

    pub async fn health(&self) -> BoardHealth {
        let store = self.store.health_check().await;
        let hub = self.hub.stats().await.ok();

        BoardHealth {
            status: if store.is_ok() && hub.is_some() {
                "ok"
            } else {
                "degraded"
            },
            store: match store {
                Ok(()) => "ok".to_string(),
                Err(e) => e.to_string(),
            },
            hub,
        }
    }

    /// Start the periodic sweep of idle rate-limit buckets
    pub fn start_background_tasks(&self) -> Vec<JoinHandle<()>> {
        let every = self.config.rate_sweep_interval;
        vec![
            self.post_limiter.clone().start_sweeper(every),
            self.vote_limiter.clone().start_sweeper(every),
        ]
    }

    /// Close every connection, giving writers `drain_timeout` to flush
    pub async fn shutdown(&self, drain_timeout: Duration) -> Result<usize> {
        self.hub.shutdown(drain_timeout).await
    }

    fn validate_content(&self, content: &str) -> Result<()> {
        if content.trim().is_empty() {
            return Err(MurmurError::InvalidInput(
                "Post content must not be empty".to_string(),
            ));
        }
        let length = content.chars().count();
        if length > self.config.max_post_length {
            return Err(MurmurError::InvalidInput(format!(
                "Post content is {} characters, the limit is {}",
                length, self.config.max_post_length
            )));
        }
        Ok(())
    }

    /// The write has committed by now, a failed broadcast only costs the
    /// live update
    fn announce(&self, envelope: NotificationEnvelope) {
        match self.hub.broadcast(&envelope) {
            Ok(()) => debug!("Queued {} broadcast", envelope.kind()),
            Err(e) => warn!("Could not broadcast {}: {}", envelope.kind(), e),
        }
    }
}

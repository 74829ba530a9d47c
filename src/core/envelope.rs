use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::Result;
use crate::storage::{Post, PostId};

/// Score change for a post after a committed vote
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteUpdate {
    pub id: PostId,
    pub new_score: i64,
}

/// Reference to a post that has been hidden
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostRef {
    pub id: PostId,
}

/// Server-to-client notification, one JSON object per WebSocket message:
/// `{"type": "...", "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum NotificationEnvelope {
    NewPost(Post),
    VoteUpdate(VoteUpdate),
    DeletePost(PostRef),
}

impl NotificationEnvelope {
    pub fn vote_update(id: PostId, new_score: i64) -> Self {
        NotificationEnvelope::VoteUpdate(VoteUpdate { id, new_score })
    }

    pub fn delete_post(id: PostId) -> Self {
        NotificationEnvelope::DeletePost(PostRef { id })
    }

    /// Wire name of the notification type
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationEnvelope::NewPost(_) => "new_post",
            NotificationEnvelope::VoteUpdate(_) => "vote_update",
            NotificationEnvelope::DeletePost(_) => "delete_post",
        }
    }

    /// Serialize once, shared by every connection queue
    pub fn to_payload(&self) -> Result<Arc<str>> {
        Ok(Arc::from(serde_json::to_string(self)?))
    }
}

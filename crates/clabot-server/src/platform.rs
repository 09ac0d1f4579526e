//! Seams between the acceptance flows and the platforms they act on.

use async_trait::async_trait;
use clabot_contracts::{ChannelMessage, PostedComment, Role};

use crate::error::ServiceError;

/// Outbound chat operations.
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn send_message(
        &self,
        channel_id: &str,
        content: &str,
    ) -> Result<ChannelMessage, ServiceError>;

    async fn add_role(&self, guild_id: &str, user_id: &str, role_id: &str)
        -> Result<(), ServiceError>;

    async fn guild_roles(&self, guild_id: &str) -> Result<Vec<Role>, ServiceError>;
}

/// Outbound code-host operations.
#[async_trait]
pub trait CodeHostApi: Send + Sync {
    /// Comments on an issue or pull request thread.
    async fn create_comment(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        body: &str,
    ) -> Result<PostedComment, ServiceError>;
}

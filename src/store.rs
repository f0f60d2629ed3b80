// src/store.rs
//! Persistence seams. Postgres lives in `db`, the in-memory tables in `memory`.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    Comment, GuestIdentity, MediaAsset, NewComment, NewMediaAsset, NewPoll, NewVote, Poll,
    PollBundle, PollOption, Profile, Session, Tag, Vote,
};

/// Postgres `unique_violation`.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("corrupt row: {0}")]
    CorruptRow(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(error: sqlx::Error) -> Self {
        match &error {
            sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
                StoreError::Conflict(db.message().to_string())
            }
            _ => StoreError::Database(error),
        }
    }
}

#[async_trait]
pub trait PollStore: Send + Sync {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError>;

    /// Labels are stored in the given order; `display_order` is the index.
    async fn insert_options(
        &self,
        poll_id: Uuid,
        labels: &[String],
    ) -> Result<Vec<PollOption>, StoreError>;

    /// Looks tags up by label. Unknown labels are simply absent from the result.
    async fn find_tags(&self, labels: &[String]) -> Result<Vec<Tag>, StoreError>;

    async fn attach_tags(&self, poll_id: Uuid, tag_ids: &[Uuid]) -> Result<(), StoreError>;

    async fn insert_media(&self, asset: NewMediaAsset) -> Result<MediaAsset, StoreError>;

    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Option<PollBundle>, StoreError>;

    /// Public polls, newest first.
    async fn list_public_polls(&self, limit: i64) -> Result<Vec<PollBundle>, StoreError>;

    /// Public polls written by `author_id`, newest first.
    async fn list_polls_by_author(&self, author_id: Uuid) -> Result<Vec<PollBundle>, StoreError>;

    /// Every poll the user voted on, once each, newest first.
    async fn list_polls_voted_by(&self, user_id: Uuid) -> Result<Vec<PollBundle>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the voter already voted on the poll.
    async fn insert_vote(&self, vote: NewVote) -> Result<Vote, StoreError>;

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError>;

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn update_username(&self, user_id: Uuid, username: &str) -> Result<(), StoreError>;

    async fn count_followers(&self, user_id: Uuid) -> Result<i64, StoreError>;

    async fn count_following(&self, user_id: Uuid) -> Result<i64, StoreError>;

    async fn is_following(&self, follower_id: Uuid, following_id: Uuid)
        -> Result<bool, StoreError>;

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError>;

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError>;
}

#[async_trait]
pub trait GuestStore: Send + Sync {
    async fn guest_exists(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn find_guest_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<GuestIdentity>, StoreError>;

    async fn create_guest(&self, fingerprint: &str) -> Result<GuestIdentity, StoreError>;
}

/// Session lookups. Expired sessions are reported as absent.
#[async_trait]
pub trait AuthService: Send + Sync {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError>;

    async fn get_user(&self, token: &str) -> Result<Option<Profile>, StoreError>;

    async fn sign_out(&self, token: &str) -> Result<(), StoreError>;
}

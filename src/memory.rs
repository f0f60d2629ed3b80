// src/memory.rs
//! In-process tables with the same uniqueness rules as the Postgres schema.
//! Backs the test suite and `STORE=memory` runs.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{
    Comment, GuestIdentity, MediaAsset, NewComment, NewMediaAsset, NewPoll, NewVote, Poll,
    PollBundle, PollOption, Profile, Session, Tag, Vote,
};
use crate::store::{AuthService, GuestStore, PollStore, StoreError};

/// Tag vocabulary seeded into a fresh store, same as the initial migration.
pub const DEFAULT_TAGS: [&str; 8] = [
    "Tech", "Fashion", "Food", "College", "Music", "Sports", "Gaming", "Movies",
];

#[derive(Default)]
struct Tables {
    profiles: Vec<Profile>,
    sessions: HashMap<String, Session>,
    guests: Vec<GuestIdentity>,
    polls: Vec<Poll>,
    options: Vec<PollOption>,
    tags: Vec<Tag>,
    poll_tags: Vec<(Uuid, Uuid)>,
    votes: Vec<Vote>,
    comments: Vec<Comment>,
    media: Vec<MediaAsset>,
    follows: Vec<(Uuid, Uuid)>,
    fail_guest_writes: bool,
}

impl Tables {
    fn bundle(&self, poll: &Poll) -> PollBundle {
        let mut options: Vec<PollOption> = self
            .options
            .iter()
            .filter(|o| o.poll_id == poll.id)
            .cloned()
            .collect();
        options.sort_by_key(|o| o.display_order);

        let tags = self
            .poll_tags
            .iter()
            .filter(|(poll_id, _)| *poll_id == poll.id)
            .filter_map(|(_, tag_id)| self.tags.iter().find(|t| t.id == *tag_id))
            .map(|t| t.label.clone())
            .collect();

        let comments = self
            .comments
            .iter()
            .filter(|c| c.poll_id == poll.id)
            .map(|c| Comment {
                author_username: c
                    .author
                    .user_id()
                    .and_then(|id| self.profile(id))
                    .map(|p| p.username.clone()),
                ..c.clone()
            })
            .collect();

        PollBundle {
            poll: poll.clone(),
            author: poll.author_id.and_then(|id| self.profile(id)).cloned(),
            options,
            tags,
            votes: self
                .votes
                .iter()
                .filter(|v| v.poll_id == poll.id)
                .cloned()
                .collect(),
            comments,
            media: self
                .media
                .iter()
                .filter(|m| m.poll_id == poll.id)
                .cloned()
                .collect(),
        }
    }

    fn profile(&self, id: Uuid) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    /// Newest first; polls created in the same instant keep the later insert first.
    fn bundles_where(&self, keep: impl Fn(&Poll) -> bool) -> Vec<PollBundle> {
        let mut polls: Vec<&Poll> = self.polls.iter().rev().filter(|p| keep(p)).collect();
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        polls.into_iter().map(|p| self.bundle(p)).collect()
    }
}

pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let tables = Tables {
            tags: DEFAULT_TAGS
                .iter()
                .map(|label| Tag {
                    id: Uuid::new_v4(),
                    label: label.to_string(),
                })
                .collect(),
            ..Tables::default()
        };
        Self {
            tables: RwLock::new(tables),
        }
    }

    pub async fn add_profile(&self, username: &str) -> Profile {
        let profile = Profile {
            id: Uuid::new_v4(),
            username: username.to_string(),
            avatar_url: None,
            created_at: Utc::now(),
        };
        self.tables.write().await.profiles.push(profile.clone());
        profile
    }

    /// Opens a session for `user_id`, valid for `ttl`.
    pub async fn add_session(&self, user_id: Uuid, ttl: Duration) -> Session {
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            user_id,
            expires_at: Utc::now() + ttl,
        };
        self.tables
            .write()
            .await
            .sessions
            .insert(session.token.clone(), session.clone());
        session
    }

    pub async fn guest_count(&self) -> usize {
        self.tables.read().await.guests.len()
    }

    pub async fn vote_count(&self) -> usize {
        self.tables.read().await.votes.len()
    }

    /// Makes every guest insert fail, to exercise the resolver's failure path.
    pub async fn fail_guest_writes(&self, fail: bool) {
        self.tables.write().await.fail_guest_writes = fail;
    }
}

#[async_trait]
impl PollStore for MemoryStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let poll = Poll {
            id: Uuid::new_v4(),
            title: poll.title,
            body: poll.body,
            author_id: Some(poll.author_id),
            is_anonymous: poll.is_anonymous,
            allow_comments: poll.allow_comments,
            is_public: poll.is_public,
            created_at: Utc::now(),
        };
        self.tables.write().await.polls.push(poll.clone());
        Ok(poll)
    }

    async fn insert_options(
        &self,
        poll_id: Uuid,
        labels: &[String],
    ) -> Result<Vec<PollOption>, StoreError> {
        let options: Vec<PollOption> = labels
            .iter()
            .enumerate()
            .map(|(index, label)| PollOption {
                id: Uuid::new_v4(),
                poll_id,
                label: label.clone(),
                display_order: index as i32,
            })
            .collect();
        self.tables.write().await.options.extend(options.iter().cloned());
        Ok(options)
    }

    async fn find_tags(&self, labels: &[String]) -> Result<Vec<Tag>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .tags
            .iter()
            .filter(|t| labels.contains(&t.label))
            .cloned()
            .collect())
    }

    async fn attach_tags(&self, poll_id: Uuid, tag_ids: &[Uuid]) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        for tag_id in tag_ids {
            if tables.poll_tags.contains(&(poll_id, *tag_id)) {
                return Err(StoreError::Conflict("poll_tags_pkey".into()));
            }
            tables.poll_tags.push((poll_id, *tag_id));
        }
        Ok(())
    }

    async fn insert_media(&self, asset: NewMediaAsset) -> Result<MediaAsset, StoreError> {
        let asset = MediaAsset {
            id: Uuid::new_v4(),
            poll_id: asset.poll_id,
            storage_path: asset.storage_path,
            url: asset.url,
            kind: asset.kind,
        };
        self.tables.write().await.media.push(asset.clone());
        Ok(asset)
    }

    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Option<PollBundle>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .polls
            .iter()
            .find(|p| p.id == poll_id)
            .map(|p| tables.bundle(p)))
    }

    async fn list_public_polls(&self, limit: i64) -> Result<Vec<PollBundle>, StoreError> {
        let tables = self.tables.read().await;
        let mut bundles = tables.bundles_where(|p| p.is_public);
        bundles.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(bundles)
    }

    async fn list_polls_by_author(&self, author_id: Uuid) -> Result<Vec<PollBundle>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.bundles_where(|p| p.is_public && p.author_id == Some(author_id)))
    }

    async fn list_polls_voted_by(&self, user_id: Uuid) -> Result<Vec<PollBundle>, StoreError> {
        let tables = self.tables.read().await;
        let voted: Vec<Uuid> = tables
            .votes
            .iter()
            .filter(|v| v.voter.user_id() == Some(user_id))
            .map(|v| v.poll_id)
            .collect();
        Ok(tables.bundles_where(|p| voted.contains(&p.id)))
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote, StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .votes
            .iter()
            .any(|v| v.poll_id == vote.poll_id && v.voter == vote.voter)
        {
            return Err(StoreError::Conflict("votes_one_per_voter".into()));
        }
        let vote = Vote {
            id: Uuid::new_v4(),
            poll_id: vote.poll_id,
            option_id: vote.option_id,
            voter: vote.voter,
            created_at: Utc::now(),
        };
        tables.votes.push(vote.clone());
        Ok(vote)
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let mut tables = self.tables.write().await;
        let comment = Comment {
            id: Uuid::new_v4(),
            poll_id: comment.poll_id,
            body: comment.body,
            author: comment.author,
            author_username: comment
                .author
                .user_id()
                .and_then(|id| tables.profile(id))
                .map(|p| p.username.clone()),
            parent_id: comment.parent_id,
            created_at: Utc::now(),
        };
        tables.comments.push(comment.clone());
        Ok(comment)
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        Ok(self.tables.read().await.profile(user_id).cloned())
    }

    async fn update_username(&self, user_id: Uuid, username: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables
            .profiles
            .iter()
            .any(|p| p.username == username && p.id != user_id)
        {
            return Err(StoreError::Conflict("profiles_username_key".into()));
        }
        if let Some(profile) = tables.profiles.iter_mut().find(|p| p.id == user_id) {
            profile.username = username.to_string();
        }
        Ok(())
    }

    async fn count_followers(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.follows.iter().filter(|(_, to)| *to == user_id).count() as i64)
    }

    async fn count_following(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.follows.iter().filter(|(from, _)| *from == user_id).count() as i64)
    }

    async fn is_following(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> Result<bool, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables.follows.contains(&(follower_id, following_id)))
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if tables.follows.contains(&(follower_id, following_id)) {
            return Err(StoreError::Conflict("follows_pkey".into()));
        }
        tables.follows.push((follower_id, following_id));
        Ok(())
    }

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError> {
        self.tables
            .write()
            .await
            .follows
            .retain(|pair| *pair != (follower_id, following_id));
        Ok(())
    }
}

#[async_trait]
impl GuestStore for MemoryStore {
    async fn guest_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.guests.iter().any(|g| g.id == id))
    }

    async fn find_guest_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<GuestIdentity>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .guests
            .iter()
            .find(|g| g.fingerprint_hash == fingerprint)
            .cloned())
    }

    async fn create_guest(&self, fingerprint: &str) -> Result<GuestIdentity, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.fail_guest_writes {
            return Err(StoreError::CorruptRow("guest writes disabled".into()));
        }
        let guest = GuestIdentity {
            id: Uuid::new_v4(),
            fingerprint_hash: fingerprint.to_string(),
        };
        tables.guests.push(guest.clone());
        Ok(guest)
    }
}

#[async_trait]
impl AuthService for MemoryStore {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .sessions
            .get(token)
            .filter(|s| s.expires_at > Utc::now())
            .cloned())
    }

    async fn get_user(&self, token: &str) -> Result<Option<Profile>, StoreError> {
        let Some(session) = self.get_session(token).await? else {
            return Ok(None);
        };
        self.fetch_profile(session.user_id).await
    }

    async fn sign_out(&self, token: &str) -> Result<(), StoreError> {
        self.tables.write().await.sessions.remove(token);
        Ok(())
    }
}

// src/db.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Pool, Postgres};
use tracing::info;
use uuid::Uuid;

use crate::models::{
    Comment, GuestIdentity, MediaAsset, NewComment, NewMediaAsset, NewPoll, NewVote, Poll,
    PollBundle, PollOption, Profile, Session, Tag, Vote, VoterIdentity,
};
use crate::store::{AuthService, GuestStore, PollStore, StoreError};

pub async fn create_pool(database_url: &str, max_connections: u32) -> Result<Pool<Postgres>, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Database migrations applied");
    Ok(())
}

const POLL_COLUMNS: &str =
    "id, title, body, author_id, is_anonymous, allow_comments, is_public, created_at";

#[derive(sqlx::FromRow)]
struct VoteRow {
    id: Uuid,
    poll_id: Uuid,
    option_id: Uuid,
    voter_user_id: Option<Uuid>,
    voter_guest_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<VoteRow> for Vote {
    type Error = StoreError;

    fn try_from(row: VoteRow) -> Result<Self, Self::Error> {
        let voter = VoterIdentity::from_columns(row.voter_user_id, row.voter_guest_id)
            .ok_or_else(|| StoreError::CorruptRow(format!("vote {} has no single voter", row.id)))?;
        Ok(Vote {
            id: row.id,
            poll_id: row.poll_id,
            option_id: row.option_id,
            voter,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CommentRow {
    id: Uuid,
    poll_id: Uuid,
    body: String,
    author_user_id: Option<Uuid>,
    author_guest_id: Option<Uuid>,
    author_username: Option<String>,
    parent_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<CommentRow> for Comment {
    type Error = StoreError;

    fn try_from(row: CommentRow) -> Result<Self, Self::Error> {
        let author = VoterIdentity::from_columns(row.author_user_id, row.author_guest_id)
            .ok_or_else(|| {
                StoreError::CorruptRow(format!("comment {} has no single author", row.id))
            })?;
        Ok(Comment {
            id: row.id,
            poll_id: row.poll_id,
            body: row.body,
            author,
            author_username: row.author_username,
            parent_id: row.parent_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PollTagRow {
    poll_id: Uuid,
    label: String,
}

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.poll_id, c.body, c.author_user_id, c.author_guest_id,
           p.username AS author_username, c.parent_id, c.created_at
    FROM comments c
    LEFT JOIN profiles p ON p.id = c.author_user_id
"#;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Expands poll rows with their children, one query per child table.
    async fn bundles(&self, polls: Vec<Poll>) -> Result<Vec<PollBundle>, StoreError> {
        if polls.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = polls.iter().map(|p| p.id).collect();
        let author_ids: Vec<Uuid> = polls.iter().filter_map(|p| p.author_id).collect();

        let options = sqlx::query_as::<_, PollOption>(
            "SELECT id, poll_id, label, display_order FROM poll_options
             WHERE poll_id = ANY($1) ORDER BY display_order",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let tags = sqlx::query_as::<_, PollTagRow>(
            "SELECT pt.poll_id, t.label FROM poll_tags pt
             JOIN tags t ON t.id = pt.tag_id
             WHERE pt.poll_id = ANY($1) ORDER BY t.label",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let votes = sqlx::query_as::<_, VoteRow>(
            "SELECT id, poll_id, option_id, voter_user_id, voter_guest_id, created_at
             FROM votes WHERE poll_id = ANY($1)",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let comments = sqlx::query_as::<_, CommentRow>(&format!(
            "{COMMENT_SELECT} WHERE c.poll_id = ANY($1)"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let media = sqlx::query_as::<_, MediaAsset>(
            "SELECT id, poll_id, storage_path, url, kind FROM media_assets
             WHERE poll_id = ANY($1) ORDER BY created_at",
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await?;

        let authors = sqlx::query_as::<_, Profile>(
            "SELECT id, username, avatar_url, created_at FROM profiles WHERE id = ANY($1)",
        )
        .bind(&author_ids)
        .fetch_all(&self.pool)
        .await?;

        let mut bundles: Vec<PollBundle> = polls
            .into_iter()
            .map(|poll| PollBundle {
                author: poll
                    .author_id
                    .and_then(|id| authors.iter().find(|a| a.id == id).cloned()),
                poll,
                options: Vec::new(),
                tags: Vec::new(),
                votes: Vec::new(),
                comments: Vec::new(),
                media: Vec::new(),
            })
            .collect();
        let index: HashMap<Uuid, usize> = bundles
            .iter()
            .enumerate()
            .map(|(i, b)| (b.poll.id, i))
            .collect();

        for option in options {
            if let Some(&i) = index.get(&option.poll_id) {
                bundles[i].options.push(option);
            }
        }
        for tag in tags {
            if let Some(&i) = index.get(&tag.poll_id) {
                bundles[i].tags.push(tag.label);
            }
        }
        for row in votes {
            let vote = Vote::try_from(row)?;
            if let Some(&i) = index.get(&vote.poll_id) {
                bundles[i].votes.push(vote);
            }
        }
        for row in comments {
            let comment = Comment::try_from(row)?;
            if let Some(&i) = index.get(&comment.poll_id) {
                bundles[i].comments.push(comment);
            }
        }
        for asset in media {
            if let Some(&i) = index.get(&asset.poll_id) {
                bundles[i].media.push(asset);
            }
        }

        Ok(bundles)
    }
}

#[async_trait]
impl PollStore for PgStore {
    async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
        let row = sqlx::query_as::<_, Poll>(&format!(
            "INSERT INTO polls (title, body, author_id, is_anonymous, allow_comments, is_public)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {POLL_COLUMNS}"
        ))
        .bind(&poll.title)
        .bind(&poll.body)
        .bind(poll.author_id)
        .bind(poll.is_anonymous)
        .bind(poll.allow_comments)
        .bind(poll.is_public)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_options(
        &self,
        poll_id: Uuid,
        labels: &[String],
    ) -> Result<Vec<PollOption>, StoreError> {
        let orders: Vec<i32> = (0..labels.len() as i32).collect();
        let options = sqlx::query_as::<_, PollOption>(
            "INSERT INTO poll_options (poll_id, label, display_order)
             SELECT $1, label, display_order FROM UNNEST($2::text[], $3::int4[]) AS o(label, display_order)
             RETURNING id, poll_id, label, display_order",
        )
        .bind(poll_id)
        .bind(labels)
        .bind(&orders)
        .fetch_all(&self.pool)
        .await?;
        Ok(options)
    }

    async fn find_tags(&self, labels: &[String]) -> Result<Vec<Tag>, StoreError> {
        let tags = sqlx::query_as::<_, Tag>("SELECT id, label FROM tags WHERE label = ANY($1)")
            .bind(labels)
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }

    async fn attach_tags(&self, poll_id: Uuid, tag_ids: &[Uuid]) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO poll_tags (poll_id, tag_id) SELECT $1, UNNEST($2::uuid[])",
        )
        .bind(poll_id)
        .bind(tag_ids)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_media(&self, asset: NewMediaAsset) -> Result<MediaAsset, StoreError> {
        let row = sqlx::query_as::<_, MediaAsset>(
            "INSERT INTO media_assets (poll_id, storage_path, url, kind)
             VALUES ($1, $2, $3, $4)
             RETURNING id, poll_id, storage_path, url, kind",
        )
        .bind(asset.poll_id)
        .bind(&asset.storage_path)
        .bind(&asset.url)
        .bind(asset.kind)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn fetch_poll(&self, poll_id: Uuid) -> Result<Option<PollBundle>, StoreError> {
        let poll = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"
        ))
        .bind(poll_id)
        .fetch_optional(&self.pool)
        .await?;

        match poll {
            Some(poll) => Ok(self.bundles(vec![poll]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_public_polls(&self, limit: i64) -> Result<Vec<PollBundle>, StoreError> {
        let polls = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE is_public
             ORDER BY created_at DESC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        self.bundles(polls).await
    }

    async fn list_polls_by_author(&self, author_id: Uuid) -> Result<Vec<PollBundle>, StoreError> {
        let polls = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls WHERE author_id = $1 AND is_public
             ORDER BY created_at DESC"
        ))
        .bind(author_id)
        .fetch_all(&self.pool)
        .await?;
        self.bundles(polls).await
    }

    async fn list_polls_voted_by(&self, user_id: Uuid) -> Result<Vec<PollBundle>, StoreError> {
        let polls = sqlx::query_as::<_, Poll>(&format!(
            "SELECT {POLL_COLUMNS} FROM polls
             WHERE id IN (SELECT poll_id FROM votes WHERE voter_user_id = $1)
             ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        self.bundles(polls).await
    }

    async fn insert_vote(&self, vote: NewVote) -> Result<Vote, StoreError> {
        let (user_id, guest_id) = vote.voter.into_columns();
        let row = sqlx::query_as::<_, VoteRow>(
            "INSERT INTO votes (poll_id, option_id, voter_user_id, voter_guest_id)
             VALUES ($1, $2, $3, $4)
             RETURNING id, poll_id, option_id, voter_user_id, voter_guest_id, created_at",
        )
        .bind(vote.poll_id)
        .bind(vote.option_id)
        .bind(user_id)
        .bind(guest_id)
        .fetch_one(&self.pool)
        .await?;
        Vote::try_from(row)
    }

    async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
        let (user_id, guest_id) = comment.author.into_columns();
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO comments (poll_id, body, author_user_id, author_guest_id, parent_id)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id",
        )
        .bind(comment.poll_id)
        .bind(&comment.body)
        .bind(user_id)
        .bind(guest_id)
        .bind(comment.parent_id)
        .fetch_one(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, CommentRow>(&format!("{COMMENT_SELECT} WHERE c.id = $1"))
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Comment::try_from(row)
    }

    async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
        let profile = sqlx::query_as::<_, Profile>(
            "SELECT id, username, avatar_url, created_at FROM profiles WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn update_username(&self, user_id: Uuid, username: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE profiles SET username = $1 WHERE id = $2")
            .bind(username)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn count_followers(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE following_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn count_following(&self, user_id: Uuid) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM follows WHERE follower_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    async fn is_following(
        &self,
        follower_id: Uuid,
        following_id: Uuid,
    ) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
        )
        .bind(follower_id)
        .bind(following_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(found)
    }

    async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO follows (follower_id, following_id) VALUES ($1, $2)")
            .bind(follower_id)
            .bind(following_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
            .bind(follower_id)
            .bind(following_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl GuestStore for PgStore {
    async fn guest_exists(&self, id: Uuid) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM guest_identities WHERE id = $1)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }

    async fn find_guest_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<GuestIdentity>, StoreError> {
        let guest = sqlx::query_as::<_, GuestIdentity>(
            "SELECT id, fingerprint_hash FROM guest_identities
             WHERE fingerprint_hash = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(guest)
    }

    async fn create_guest(&self, fingerprint: &str) -> Result<GuestIdentity, StoreError> {
        let guest = sqlx::query_as::<_, GuestIdentity>(
            "INSERT INTO guest_identities (fingerprint_hash) VALUES ($1)
             RETURNING id, fingerprint_hash",
        )
        .bind(fingerprint)
        .fetch_one(&self.pool)
        .await?;
        Ok(guest)
    }
}

#[async_trait]
impl AuthService for PgStore {
    async fn get_session(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let session = sqlx::query_as::<_, Session>(
            "SELECT token, user_id, expires_at FROM sessions
             WHERE token = $1 AND expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    async fn get_user(&self, token: &str) -> Result<Option<Profile>, StoreError> {
        let profile = sqlx::query_as::<_, Profile>(
            "SELECT p.id, p.username, p.avatar_url, p.created_at
             FROM sessions s JOIN profiles p ON p.id = s.user_id
             WHERE s.token = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(profile)
    }

    async fn sign_out(&self, token: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// models.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The actor a vote or comment is attributed to.
///
/// Rows store this as two nullable columns; the enum guarantees exactly one of
/// them is ever set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum VoterIdentity {
    User(Uuid),
    Guest(Uuid),
}

impl VoterIdentity {
    /// Rebuilds an identity from the `(user, guest)` column pair.
    /// Returns `None` unless exactly one side is set.
    pub fn from_columns(user_id: Option<Uuid>, guest_id: Option<Uuid>) -> Option<Self> {
        match (user_id, guest_id) {
            (Some(id), None) => Some(VoterIdentity::User(id)),
            (None, Some(id)) => Some(VoterIdentity::Guest(id)),
            _ => None,
        }
    }

    pub fn into_columns(self) -> (Option<Uuid>, Option<Uuid>) {
        match self {
            VoterIdentity::User(id) => (Some(id), None),
            VoterIdentity::Guest(id) => (None, Some(id)),
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match self {
            VoterIdentity::User(id) => Some(*id),
            VoterIdentity::Guest(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub body: Option<String>,
    pub author_id: Option<Uuid>,
    pub is_anonymous: bool,
    pub allow_comments: bool,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct PollOption {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub label: String,
    pub display_order: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Vote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub voter: VoterIdentity,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub body: String,
    pub author: VoterIdentity,
    pub author_username: Option<String>,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "media_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    /// Classifies a MIME type, `None` for anything that is neither image nor video.
    pub fn from_mime(content_type: &str) -> Option<Self> {
        if content_type.starts_with("image/") {
            Some(MediaKind::Image)
        } else if content_type.starts_with("video/") {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MediaAsset {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub storage_path: String,
    pub url: String,
    pub kind: MediaKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct GuestIdentity {
    pub id: Uuid,
    pub fingerprint_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Tag {
    pub id: Uuid,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Profile {
    pub id: Uuid,
    pub username: String,
    pub avatar_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Session {
    pub token: String,
    pub user_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

/// A poll together with everything the feed and detail views expand.
#[derive(Debug, Clone, PartialEq)]
pub struct PollBundle {
    pub poll: Poll,
    pub author: Option<Profile>,
    pub options: Vec<PollOption>,
    pub tags: Vec<String>,
    pub votes: Vec<Vote>,
    pub comments: Vec<Comment>,
    pub media: Vec<MediaAsset>,
}

// Insert payloads handed to the store.

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub title: String,
    pub body: Option<String>,
    pub author_id: Uuid,
    pub is_anonymous: bool,
    pub allow_comments: bool,
    pub is_public: bool,
}

#[derive(Debug, Clone)]
pub struct NewVote {
    pub poll_id: Uuid,
    pub option_id: Uuid,
    pub voter: VoterIdentity,
}

#[derive(Debug, Clone)]
pub struct NewComment {
    pub poll_id: Uuid,
    pub body: String,
    pub author: VoterIdentity,
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Clone)]
pub struct NewMediaAsset {
    pub poll_id: Uuid,
    pub storage_path: String,
    pub url: String,
    pub kind: MediaKind,
}

// Request bodies.

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    pub options: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    #[serde(default = "default_true")]
    pub allow_comments: bool,
    #[serde(default = "default_true")]
    pub is_public: bool,
    #[serde(default)]
    pub media: Vec<MediaUpload>,
}

/// A media file inlined into the create-poll request, base64 encoded.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub option_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CommentRequest {
    pub body: String,
    #[serde(default)]
    pub parent_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UsernameRequest {
    pub username: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedSort {
    #[default]
    New,
    Top,
}

#[derive(Debug, Default, Deserialize)]
pub struct FeedQuery {
    #[serde(default)]
    pub sort: FeedSort,
}

// Response bodies.

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorView {
    pub id: Uuid,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OptionView {
    pub id: Uuid,
    pub label: String,
    pub display_order: i32,
    pub votes: u64,
    pub percentage: u8,
}

/// Guest ids double as credentials, so comments only reveal that the author was a guest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CommentAuthor {
    User { id: Uuid, username: Option<String> },
    Guest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentView {
    pub id: Uuid,
    pub body: String,
    pub author: CommentAuthor,
    pub parent_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl From<&Comment> for CommentView {
    fn from(comment: &Comment) -> Self {
        let author = match comment.author {
            VoterIdentity::User(id) => CommentAuthor::User {
                id,
                username: comment.author_username.clone(),
            },
            VoterIdentity::Guest(_) => CommentAuthor::Guest,
        };
        CommentView {
            id: comment.id,
            body: comment.body.clone(),
            author,
            parent_id: comment.parent_id,
            created_at: comment.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollView {
    pub id: Uuid,
    pub title: String,
    pub body: Option<String>,
    pub author: Option<AuthorView>,
    pub created_at: DateTime<Utc>,
    pub is_anonymous: bool,
    pub allow_comments: bool,
    pub tags: Vec<String>,
    pub options: Vec<OptionView>,
    pub total_votes: u64,
    pub viewer_vote_option_id: Option<Uuid>,
    pub can_vote: bool,
    pub comment_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comments: Option<Vec<CommentView>>,
    pub media: Vec<MediaAsset>,
}

#[derive(Debug, Serialize)]
pub struct ProfileView {
    pub profile: Profile,
    pub follower_count: i64,
    pub following_count: i64,
    /// Only present when a signed-in viewer looks at someone else's profile.
    pub is_following: Option<bool>,
    pub polls: Vec<PollView>,
    /// Voting history, only shown to the profile owner.
    pub voted_polls: Option<Vec<PollView>>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct FollowState {
    pub following: bool,
    pub follower_count: i64,
}

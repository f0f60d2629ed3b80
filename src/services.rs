// services.rs
//! Multi-step workflows behind the HTTP handlers.
//!
//! Each step is awaited before the next one starts; the poll row has to exist
//! before options, tags and media can point at it. Nothing is retried.

use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::identity::ResolvedVoter;
use crate::media::{storage_path, MediaStorage};
use crate::models::{
    AuthorView, CommentView, CreatePollRequest, FeedSort, FollowState, NewComment,
    NewMediaAsset, NewPoll, NewVote, OptionView, PollBundle, PollView, ProfileView,
};
use crate::poll::aggregate;
use crate::store::PollStore;
use crate::validate::{
    validate_comment, validate_submission, validate_username, MediaFile, PollSubmission,
    ValidationError,
};

pub const FEED_LIMIT: i64 = 20;

/// Builds the client view of a poll, tallied from the viewer's perspective.
pub fn poll_view(bundle: &PollBundle, viewer: &ResolvedVoter, with_comments: bool) -> PollView {
    let tally = aggregate(&bundle.options, &bundle.votes, viewer);

    let author = if bundle.poll.is_anonymous {
        None
    } else {
        bundle.author.as_ref().map(|profile| AuthorView {
            id: profile.id,
            username: profile.username.clone(),
        })
    };

    let comments = with_comments.then(|| {
        let mut comments: Vec<CommentView> = bundle.comments.iter().map(CommentView::from).collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        comments
    });

    let mut options = bundle.options.clone();
    options.sort_by_key(|option| option.display_order);

    PollView {
        id: bundle.poll.id,
        title: bundle.poll.title.clone(),
        body: bundle.poll.body.clone(),
        author,
        created_at: bundle.poll.created_at,
        is_anonymous: bundle.poll.is_anonymous,
        allow_comments: bundle.poll.allow_comments,
        tags: bundle.tags.clone(),
        options: options
            .into_iter()
            .map(|option| OptionView {
                votes: tally.count(&option.id),
                percentage: tally.percentage_of(&option.id),
                id: option.id,
                label: option.label,
                display_order: option.display_order,
            })
            .collect(),
        total_votes: tally.total_votes,
        viewer_vote_option_id: tally.viewer_vote_option_id,
        can_vote: tally.can_vote(viewer),
        comment_count: bundle.comments.len(),
        comments,
        media: bundle.media.clone(),
    }
}

/// Public polls for the feed. `Top` reorders the newest polls by vote count,
/// keeping creation order among ties.
pub async fn feed(
    store: &dyn PollStore,
    sort: FeedSort,
    viewer: &ResolvedVoter,
) -> Result<Vec<PollView>, AppError> {
    let mut bundles = store
        .list_public_polls(FEED_LIMIT)
        .await
        .inspect_err(|e| error!("Error loading polls: {e}"))?;

    if sort == FeedSort::Top {
        bundles.sort_by(|a, b| b.votes.len().cmp(&a.votes.len()));
    }

    Ok(bundles
        .iter()
        .map(|bundle| poll_view(bundle, viewer, false))
        .collect())
}

pub async fn poll_detail(
    store: &dyn PollStore,
    poll_id: Uuid,
    viewer: &ResolvedVoter,
) -> Result<PollView, AppError> {
    let bundle = load_poll(store, poll_id).await?;
    Ok(poll_view(&bundle, viewer, true))
}

async fn load_poll(store: &dyn PollStore, poll_id: Uuid) -> Result<PollBundle, AppError> {
    store
        .fetch_poll(poll_id)
        .await
        .inspect_err(|e| error!(%poll_id, "Error loading poll: {e}"))?
        .ok_or(AppError::NotFound("Poll"))
}

/// Creates a poll with its options, tags and media.
///
/// Media files are uploaded one after the other. A file that fails to upload or
/// register is logged and skipped, so the poll can end up with fewer media
/// assets than were submitted.
pub async fn create_poll(
    store: &dyn PollStore,
    storage: &dyn MediaStorage,
    author_id: Uuid,
    request: CreatePollRequest,
    media: Vec<MediaFile>,
) -> Result<PollView, AppError> {
    let submission = validate_submission(PollSubmission {
        title: request.title,
        body: request.body,
        options: request.options,
        media,
    })?;

    let poll = store
        .insert_poll(NewPoll {
            title: submission.title,
            body: submission.body,
            author_id,
            is_anonymous: request.is_anonymous,
            allow_comments: request.allow_comments,
            is_public: request.is_public,
        })
        .await
        .inspect_err(|e| error!(%author_id, "Error creating poll: {e}"))?;
    let poll_id = poll.id;

    store
        .insert_options(poll_id, &submission.options)
        .await
        .inspect_err(|e| error!(%poll_id, "Error creating poll options: {e}"))?;

    if !request.tags.is_empty() {
        let tags = store
            .find_tags(&request.tags)
            .await
            .inspect_err(|e| error!(%poll_id, "Error looking up tags: {e}"))?;
        if !tags.is_empty() {
            let tag_ids: Vec<Uuid> = tags.iter().map(|tag| tag.id).collect();
            store
                .attach_tags(poll_id, &tag_ids)
                .await
                .inspect_err(|e| error!(%poll_id, "Error attaching tags: {e}"))?;
        }
    }

    let mut stored = 0;
    for (kind, file) in &submission.media {
        let path = storage_path(poll_id, &file.file_name);
        let path = match storage.upload(&path, &file.bytes).await {
            Ok(path) => path,
            Err(e) => {
                warn!(%poll_id, file = %file.file_name, "Error uploading file: {e}");
                continue;
            }
        };
        let asset = NewMediaAsset {
            poll_id,
            url: storage.public_url(&path),
            storage_path: path,
            kind: *kind,
        };
        match store.insert_media(asset).await {
            Ok(_) => stored += 1,
            Err(e) => warn!(%poll_id, file = %file.file_name, "Error recording media asset: {e}"),
        }
    }

    info!(
        %poll_id,
        %author_id,
        media = stored,
        media_submitted = submission.media.len(),
        "Poll created"
    );

    poll_detail(store, poll_id, &ResolvedVoter::User { id: author_id }).await
}

/// Records a vote and returns the refreshed poll.
///
/// A voter who already voted gets [`AppError::AlreadyVoted`], whether that is
/// seen up front or only when the store's uniqueness constraint fires.
pub async fn cast_vote(
    store: &dyn PollStore,
    poll_id: Uuid,
    option_id: Uuid,
    viewer: &ResolvedVoter,
) -> Result<PollView, AppError> {
    let voter = viewer.identity().ok_or(AppError::AuthRequired)?;
    let bundle = load_poll(store, poll_id).await?;

    if !bundle.options.iter().any(|option| option.id == option_id) {
        return Err(AppError::NotFound("Option"));
    }
    if !aggregate(&bundle.options, &bundle.votes, viewer).can_vote(viewer) {
        return Err(AppError::AlreadyVoted);
    }

    match store
        .insert_vote(NewVote {
            poll_id,
            option_id,
            voter,
        })
        .await
    {
        Ok(_) => {}
        Err(e) if e.is_conflict() => {
            warn!(%poll_id, ?voter, "Duplicate vote rejected by store");
            return Err(AppError::AlreadyVoted);
        }
        Err(e) => {
            error!(%poll_id, %option_id, ?voter, "Error inserting vote: {e}");
            return Err(e.into());
        }
    }

    poll_detail(store, poll_id, viewer).await
}

pub async fn add_comment(
    store: &dyn PollStore,
    poll_id: Uuid,
    body: &str,
    parent_id: Option<Uuid>,
    viewer: &ResolvedVoter,
) -> Result<CommentView, AppError> {
    let author = viewer.identity().ok_or(AppError::AuthRequired)?;
    let body = validate_comment(body)?;
    let bundle = load_poll(store, poll_id).await?;

    if !bundle.poll.allow_comments {
        return Err(AppError::Forbidden("Comments are disabled for this poll"));
    }

    if let Some(parent_id) = parent_id {
        let parent = bundle
            .comments
            .iter()
            .find(|comment| comment.id == parent_id)
            .ok_or(AppError::NotFound("Comment"))?;
        if parent.parent_id.is_some() {
            return Err(ValidationError::ReplyTooDeep.into());
        }
    }

    let comment = store
        .insert_comment(NewComment {
            poll_id,
            body,
            author,
            parent_id,
        })
        .await
        .inspect_err(|e| error!(%poll_id, ?author, "Error adding comment: {e}"))?;

    Ok(CommentView::from(&comment))
}

/// Profile page data. Voting history is only returned to the owner.
pub async fn profile(
    store: &dyn PollStore,
    user_id: Uuid,
    viewer: &ResolvedVoter,
) -> Result<ProfileView, AppError> {
    let profile = store
        .fetch_profile(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error loading profile: {e}"))?
        .ok_or(AppError::NotFound("Profile"))?;

    let is_owner = viewer.user_id() == Some(user_id);

    let polls = store
        .list_polls_by_author(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error loading profile polls: {e}"))?;
    let polls = polls
        .iter()
        .filter(|bundle| is_owner || !bundle.poll.is_anonymous)
        .map(|bundle| poll_view(bundle, viewer, false))
        .collect();

    let voted_polls = if is_owner {
        let history = store
            .list_polls_voted_by(user_id)
            .await
            .inspect_err(|e| error!(%user_id, "Error loading voting history: {e}"))?;
        Some(
            history
                .iter()
                .map(|bundle| poll_view(bundle, viewer, false))
                .collect(),
        )
    } else {
        None
    };

    let follower_count = store
        .count_followers(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error counting followers: {e}"))?;
    let following_count = store
        .count_following(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error counting following: {e}"))?;

    let is_following = match viewer.user_id() {
        Some(viewer_id) if viewer_id != user_id => {
            let following = store
                .is_following(viewer_id, user_id)
                .await
                .inspect_err(|e| error!(%viewer_id, %user_id, "Error checking follow: {e}"))?;
            Some(following)
        }
        _ => None,
    };

    Ok(ProfileView {
        profile,
        follower_count,
        following_count,
        is_following,
        polls,
        voted_polls,
    })
}

/// Follows the profile, or unfollows it if the viewer already does.
pub async fn toggle_follow(
    store: &dyn PollStore,
    user_id: Uuid,
    viewer: &ResolvedVoter,
) -> Result<FollowState, AppError> {
    let follower_id = viewer.user_id().ok_or(AppError::AuthRequired)?;
    if follower_id == user_id {
        return Err(ValidationError::SelfFollow.into());
    }
    let profile = store
        .fetch_profile(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error loading profile: {e}"))?;
    if profile.is_none() {
        return Err(AppError::NotFound("Profile"));
    }

    let already_following = store
        .is_following(follower_id, user_id)
        .await
        .inspect_err(|e| error!(%follower_id, %user_id, "Error checking follow: {e}"))?;
    let following = if already_following {
        store
            .unfollow(follower_id, user_id)
            .await
            .inspect_err(|e| error!(%follower_id, %user_id, "Error unfollowing: {e}"))?;
        false
    } else {
        match store.follow(follower_id, user_id).await {
            Ok(()) => {}
            // Lost a race with another request doing the same follow.
            Err(e) if e.is_conflict() => {}
            Err(e) => {
                error!(%follower_id, %user_id, "Error following: {e}");
                return Err(e.into());
            }
        }
        true
    };

    let follower_count = store
        .count_followers(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error counting followers: {e}"))?;

    Ok(FollowState {
        following,
        follower_count,
    })
}

pub async fn update_username(
    store: &dyn PollStore,
    username: &str,
    viewer: &ResolvedVoter,
) -> Result<(), AppError> {
    let user_id = viewer.user_id().ok_or(AppError::AuthRequired)?;
    let username = validate_username(username)?;

    let current = store
        .fetch_profile(user_id)
        .await
        .inspect_err(|e| error!(%user_id, "Error loading profile: {e}"))?
        .ok_or(AppError::NotFound("Profile"))?;
    if current.username == username {
        return Ok(());
    }

    match store.update_username(user_id, &username).await {
        Ok(()) => Ok(()),
        Err(e) if e.is_conflict() => Err(AppError::UsernameTaken),
        Err(e) => {
            error!(%user_id, "Error updating username: {e}");
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::models::{Comment, MediaAsset, MediaKind, Poll, PollOption, Profile, Tag, Vote};
    use crate::store::StoreError;
    use async_trait::async_trait;
    use crate::media::MediaError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails every second upload.
    struct FlakyStorage {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl MediaStorage for FlakyStorage {
        async fn upload(&self, path: &str, _bytes: &[u8]) -> Result<String, MediaError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 1 {
                return Err(MediaError::InvalidPath(path.to_string()));
            }
            Ok(path.to_string())
        }

        fn public_url(&self, path: &str) -> String {
            format!("https://cdn.test/{path}")
        }
    }

    /// Delegates to a [`MemoryStore`], optionally serving polls without their
    /// votes (as a read racing another request would) or failing follow reads.
    struct LaggingStore {
        inner: MemoryStore,
        hide_votes: bool,
        fail_follows: bool,
    }

    impl LaggingStore {
        fn new(inner: MemoryStore) -> Self {
            Self {
                inner,
                hide_votes: false,
                fail_follows: false,
            }
        }

        fn follows(&self) -> Result<(), StoreError> {
            if self.fail_follows {
                return Err(StoreError::CorruptRow("follows unavailable".into()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PollStore for LaggingStore {
        async fn insert_poll(&self, poll: NewPoll) -> Result<Poll, StoreError> {
            self.inner.insert_poll(poll).await
        }

        async fn insert_options(
            &self,
            poll_id: Uuid,
            labels: &[String],
        ) -> Result<Vec<PollOption>, StoreError> {
            self.inner.insert_options(poll_id, labels).await
        }

        async fn find_tags(&self, labels: &[String]) -> Result<Vec<Tag>, StoreError> {
            self.inner.find_tags(labels).await
        }

        async fn attach_tags(&self, poll_id: Uuid, tag_ids: &[Uuid]) -> Result<(), StoreError> {
            self.inner.attach_tags(poll_id, tag_ids).await
        }

        async fn insert_media(&self, asset: NewMediaAsset) -> Result<MediaAsset, StoreError> {
            self.inner.insert_media(asset).await
        }

        async fn fetch_poll(&self, poll_id: Uuid) -> Result<Option<PollBundle>, StoreError> {
            let mut bundle = self.inner.fetch_poll(poll_id).await?;
            if self.hide_votes {
                if let Some(bundle) = bundle.as_mut() {
                    bundle.votes.clear();
                }
            }
            Ok(bundle)
        }

        async fn list_public_polls(&self, limit: i64) -> Result<Vec<PollBundle>, StoreError> {
            self.inner.list_public_polls(limit).await
        }

        async fn list_polls_by_author(&self, author_id: Uuid) -> Result<Vec<PollBundle>, StoreError> {
            self.inner.list_polls_by_author(author_id).await
        }

        async fn list_polls_voted_by(&self, user_id: Uuid) -> Result<Vec<PollBundle>, StoreError> {
            self.inner.list_polls_voted_by(user_id).await
        }

        async fn insert_vote(&self, vote: NewVote) -> Result<Vote, StoreError> {
            self.inner.insert_vote(vote).await
        }

        async fn insert_comment(&self, comment: NewComment) -> Result<Comment, StoreError> {
            self.inner.insert_comment(comment).await
        }

        async fn fetch_profile(&self, user_id: Uuid) -> Result<Option<Profile>, StoreError> {
            self.inner.fetch_profile(user_id).await
        }

        async fn update_username(&self, user_id: Uuid, username: &str) -> Result<(), StoreError> {
            self.inner.update_username(user_id, username).await
        }

        async fn count_followers(&self, user_id: Uuid) -> Result<i64, StoreError> {
            self.follows()?;
            self.inner.count_followers(user_id).await
        }

        async fn count_following(&self, user_id: Uuid) -> Result<i64, StoreError> {
            self.follows()?;
            self.inner.count_following(user_id).await
        }

        async fn is_following(
            &self,
            follower_id: Uuid,
            following_id: Uuid,
        ) -> Result<bool, StoreError> {
            self.follows()?;
            self.inner.is_following(follower_id, following_id).await
        }

        async fn follow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError> {
            self.inner.follow(follower_id, following_id).await
        }

        async fn unfollow(&self, follower_id: Uuid, following_id: Uuid) -> Result<(), StoreError> {
            self.inner.unfollow(follower_id, following_id).await
        }
    }

    fn storage() -> FlakyStorage {
        FlakyStorage {
            calls: AtomicUsize::new(0),
        }
    }

    fn request(title: &str, options: &[&str]) -> CreatePollRequest {
        CreatePollRequest {
            title: title.to_string(),
            body: None,
            options: options.iter().map(|o| o.to_string()).collect(),
            tags: Vec::new(),
            is_anonymous: false,
            allow_comments: true,
            is_public: true,
            media: Vec::new(),
        }
    }

    fn image(name: &str) -> MediaFile {
        MediaFile {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    async fn setup() -> (MemoryStore, Profile) {
        let store = MemoryStore::new();
        let author = store.add_profile("author").await;
        (store, author)
    }

    #[tokio::test]
    async fn test_create_poll_normalizes_and_tags() {
        let (store, author) = setup().await;
        let mut req = request("  Best pet?  ", &[" cat ", "", "dog"]);
        req.tags = vec!["Tech".into(), "Nonexistent".into()];

        let view = create_poll(&store, &storage(), author.id, req, Vec::new())
            .await
            .unwrap();

        assert_eq!(view.title, "Best pet?");
        let labels: Vec<_> = view.options.iter().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["cat", "dog"]);
        assert_eq!(view.options[1].display_order, 1);
        assert_eq!(view.tags, vec!["Tech".to_string()]);
        assert_eq!(view.author.unwrap().username, "author");
    }

    #[tokio::test]
    async fn test_create_poll_skips_failed_uploads() {
        let (store, author) = setup().await;
        let files = vec![image("a.png"), image("b.png"), image("c.png")];

        let view = create_poll(&store, &storage(), author.id, request("t", &["x", "y"]), files)
            .await
            .unwrap();

        assert_eq!(view.media.len(), 2);
        assert!(view.media.iter().all(|m| m.kind == MediaKind::Image));
        assert!(view.media[0].url.starts_with("https://cdn.test/"));
    }

    #[tokio::test]
    async fn test_create_poll_rejects_invalid_input_before_writing() {
        let (store, author) = setup().await;

        let err = create_poll(&store, &storage(), author.id, request(" ", &["x", "y"]), Vec::new())
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Validation(ValidationError::EmptyTitle)));
        assert!(feed(&store, FeedSort::New, &ResolvedVoter::None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_anonymous_poll_hides_author() {
        let (store, author) = setup().await;
        let mut req = request("secret", &["x", "y"]);
        req.is_anonymous = true;

        let view = create_poll(&store, &storage(), author.id, req, Vec::new())
            .await
            .unwrap();

        assert!(view.author.is_none());
        let stranger = profile(&store, author.id, &ResolvedVoter::None).await.unwrap();
        assert!(stranger.polls.is_empty());
        let owner = profile(&store, author.id, &ResolvedVoter::User { id: author.id })
            .await
            .unwrap();
        assert_eq!(owner.polls.len(), 1);
    }

    #[tokio::test]
    async fn test_vote_once_then_already_voted() {
        let (store, author) = setup().await;
        let poll = create_poll(&store, &storage(), author.id, request("t", &["x", "y"]), Vec::new())
            .await
            .unwrap();
        let viewer = ResolvedVoter::Guest { id: Uuid::new_v4() };

        let after = cast_vote(&store, poll.id, poll.options[1].id, &viewer)
            .await
            .unwrap();
        assert_eq!(after.viewer_vote_option_id, Some(poll.options[1].id));
        assert_eq!(after.total_votes, 1);
        assert!(!after.can_vote);

        let again = cast_vote(&store, poll.id, poll.options[0].id, &viewer).await;
        assert!(matches!(again, Err(AppError::AlreadyVoted)));
        assert_eq!(store.vote_count().await, 1);
    }

    #[tokio::test]
    async fn test_racing_duplicate_vote_is_already_voted() {
        let (inner, author) = setup().await;
        let mut store = LaggingStore::new(inner);
        store.hide_votes = true;
        let poll = create_poll(&store, &storage(), author.id, request("t", &["x", "y"]), Vec::new())
            .await
            .unwrap();
        let viewer = ResolvedVoter::Guest { id: Uuid::new_v4() };

        cast_vote(&store, poll.id, poll.options[0].id, &viewer)
            .await
            .unwrap();
        // The stale read lets the second cast past the pre-check; the store refuses it.
        let again = cast_vote(&store, poll.id, poll.options[1].id, &viewer).await;
        assert!(matches!(again, Err(AppError::AlreadyVoted)));
        assert_eq!(store.inner.vote_count().await, 1);
    }

    #[tokio::test]
    async fn test_follow_read_failures_surface_as_persistence() {
        let (inner, author) = setup().await;
        let fan = inner.add_profile("fan").await;
        let mut store = LaggingStore::new(inner);
        store.fail_follows = true;
        let viewer = ResolvedVoter::User { id: fan.id };

        let toggled = toggle_follow(&store, author.id, &viewer).await;
        assert!(matches!(toggled, Err(AppError::Persistence(_))));

        let page = profile(&store, author.id, &viewer).await;
        assert!(matches!(page, Err(AppError::Persistence(_))));
    }

    #[tokio::test]
    async fn test_vote_requires_identity_and_known_option() {
        let (store, author) = setup().await;
        let poll = create_poll(&store, &storage(), author.id, request("t", &["x", "y"]), Vec::new())
            .await
            .unwrap();

        let anonymous = cast_vote(&store, poll.id, poll.options[0].id, &ResolvedVoter::None).await;
        assert!(matches!(anonymous, Err(AppError::AuthRequired)));

        let viewer = ResolvedVoter::User { id: author.id };
        let unknown = cast_vote(&store, poll.id, Uuid::new_v4(), &viewer).await;
        assert!(matches!(unknown, Err(AppError::NotFound("Option"))));

        let missing = cast_vote(&store, Uuid::new_v4(), poll.options[0].id, &viewer).await;
        assert!(matches!(missing, Err(AppError::NotFound("Poll"))));
    }

    #[tokio::test]
    async fn test_top_feed_orders_by_votes() {
        let (store, author) = setup().await;
        let quiet = create_poll(&store, &storage(), author.id, request("quiet", &["x", "y"]), Vec::new())
            .await
            .unwrap();
        let busy = create_poll(&store, &storage(), author.id, request("busy", &["x", "y"]), Vec::new())
            .await
            .unwrap();
        let _newest = create_poll(&store, &storage(), author.id, request("newest", &["x", "y"]), Vec::new())
            .await
            .unwrap();

        for _ in 0..2 {
            let voter = ResolvedVoter::Guest { id: Uuid::new_v4() };
            cast_vote(&store, quiet.id, quiet.options[0].id, &voter).await.unwrap();
        }
        for _ in 0..3 {
            let voter = ResolvedVoter::Guest { id: Uuid::new_v4() };
            cast_vote(&store, busy.id, busy.options[0].id, &voter).await.unwrap();
        }

        let new: Vec<_> = feed(&store, FeedSort::New, &ResolvedVoter::None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(new, vec!["newest", "busy", "quiet"]);

        let top: Vec<_> = feed(&store, FeedSort::Top, &ResolvedVoter::None)
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.title)
            .collect();
        assert_eq!(top, vec!["busy", "quiet", "newest"]);
    }

    #[tokio::test]
    async fn test_comments_rules() {
        let (store, author) = setup().await;
        let open = create_poll(&store, &storage(), author.id, request("open", &["x", "y"]), Vec::new())
            .await
            .unwrap();
        let viewer = ResolvedVoter::Guest { id: Uuid::new_v4() };

        let top = add_comment(&store, open.id, " first! ", None, &viewer).await.unwrap();
        assert_eq!(top.body, "first!");

        let reply = add_comment(&store, open.id, "reply", Some(top.id), &viewer)
            .await
            .unwrap();
        let nested = add_comment(&store, open.id, "deeper", Some(reply.id), &viewer).await;
        assert!(matches!(
            nested,
            Err(AppError::Validation(ValidationError::ReplyTooDeep))
        ));

        let detail = poll_detail(&store, open.id, &viewer).await.unwrap();
        assert_eq!(detail.comment_count, 2);
        let comments = detail.comments.unwrap();
        assert!(comments.iter().any(|c| c.parent_id == Some(top.id)));

        let mut req = request("closed", &["x", "y"]);
        req.allow_comments = false;
        let closed = create_poll(&store, &storage(), author.id, req, Vec::new())
            .await
            .unwrap();
        let refused = add_comment(&store, closed.id, "hello", None, &viewer).await;
        assert!(matches!(refused, Err(AppError::Forbidden(_))));

        let nobody = add_comment(&store, open.id, "hello", None, &ResolvedVoter::None).await;
        assert!(matches!(nobody, Err(AppError::AuthRequired)));
    }

    #[tokio::test]
    async fn test_profile_history_only_for_owner() {
        let (store, author) = setup().await;
        let fan = store.add_profile("fan").await;
        let poll = create_poll(&store, &storage(), author.id, request("t", &["x", "y"]), Vec::new())
            .await
            .unwrap();
        let fan_viewer = ResolvedVoter::User { id: fan.id };
        cast_vote(&store, poll.id, poll.options[0].id, &fan_viewer)
            .await
            .unwrap();

        let own = profile(&store, fan.id, &fan_viewer).await.unwrap();
        assert_eq!(own.voted_polls.as_ref().map(Vec::len), Some(1));
        assert_eq!(own.is_following, None);

        let other = profile(&store, fan.id, &ResolvedVoter::User { id: author.id })
            .await
            .unwrap();
        assert!(other.voted_polls.is_none());
        assert_eq!(other.is_following, Some(false));
    }

    #[tokio::test]
    async fn test_follow_toggle() {
        let (store, author) = setup().await;
        let fan = store.add_profile("fan").await;
        let viewer = ResolvedVoter::User { id: fan.id };

        let followed = toggle_follow(&store, author.id, &viewer).await.unwrap();
        assert_eq!(
            followed,
            FollowState {
                following: true,
                follower_count: 1
            }
        );
        let unfollowed = toggle_follow(&store, author.id, &viewer).await.unwrap();
        assert_eq!(
            unfollowed,
            FollowState {
                following: false,
                follower_count: 0
            }
        );

        let own = toggle_follow(&store, fan.id, &viewer).await;
        assert!(matches!(own, Err(AppError::Validation(ValidationError::SelfFollow))));
        let guest = toggle_follow(&store, author.id, &ResolvedVoter::Guest { id: fan.id }).await;
        assert!(matches!(guest, Err(AppError::AuthRequired)));
    }

    #[tokio::test]
    async fn test_username_update() {
        let (store, author) = setup().await;
        let other = store.add_profile("taken").await;
        let viewer = ResolvedVoter::User { id: other.id };

        assert!(matches!(
            update_username(&store, "author", &viewer).await,
            Err(AppError::UsernameTaken)
        ));
        update_username(&store, " fresh_name ", &viewer).await.unwrap();
        assert_eq!(
            store.fetch_profile(other.id).await.unwrap().unwrap().username,
            "fresh_name"
        );
        assert!(matches!(
            update_username(&store, "x", &ResolvedVoter::User { id: author.id }).await,
            Err(AppError::Validation(ValidationError::InvalidUsername))
        ));
    }
}

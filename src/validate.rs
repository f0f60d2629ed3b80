// src/validate.rs
//! Input checks for poll creation and the smaller user-facing forms.
//!
//! Error messages are shown to the user as-is.

use thiserror::Error;

use crate::models::MediaKind;

pub const MAX_TITLE_CHARS: usize = 120;
pub const MAX_OPTION_CHARS: usize = 60;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 6;
pub const MAX_MEDIA_FILES: usize = 4;
pub const MAX_MEDIA_BYTES: u64 = 50 * 1024 * 1024;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Please enter a poll title")]
    EmptyTitle,

    #[error("Title must be at most 120 characters")]
    TitleTooLong,

    #[error("A poll can have at most 6 options")]
    TooManyOptions,

    #[error("Please provide at least 2 options")]
    MinimumOptions,

    #[error("Options must be at most 60 characters")]
    OptionTooLong,

    #[error("Only images and videos are allowed ({file_name})")]
    UnsupportedMediaType { file_name: String },

    #[error("File size must be less than 50MB ({file_name})")]
    MediaTooLarge { file_name: String },

    #[error("Maximum 4 media files allowed")]
    TooManyMedia,

    #[error("Comment cannot be empty")]
    EmptyComment,

    #[error("Replies can only be one level deep")]
    ReplyTooDeep,

    #[error("Username cannot be empty")]
    EmptyUsername,

    #[error("Username must be 3-20 characters and contain only letters, numbers, underscores, or hyphens")]
    InvalidUsername,

    #[error("You cannot follow yourself")]
    SelfFollow,
}

/// A file picked for upload, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl MediaFile {
    pub fn size(&self) -> u64 {
        self.bytes.len() as u64
    }
}

#[derive(Debug, Clone)]
pub struct PollSubmission {
    pub title: String,
    pub body: Option<String>,
    pub options: Vec<String>,
    pub media: Vec<MediaFile>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSubmission {
    pub title: String,
    pub body: Option<String>,
    pub options: Vec<String>,
    pub media: Vec<(MediaKind, MediaFile)>,
}

/// Trims the title and drops blank options, checking both against the limits.
pub fn validate_poll_text(
    title: &str,
    options: &[String],
) -> Result<(String, Vec<String>), ValidationError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.chars().count() > MAX_TITLE_CHARS {
        return Err(ValidationError::TitleTooLong);
    }

    if options.len() > MAX_OPTIONS {
        return Err(ValidationError::TooManyOptions);
    }
    let options: Vec<String> = options
        .iter()
        .map(|option| option.trim())
        .filter(|option| !option.is_empty())
        .map(str::to_string)
        .collect();
    if options.len() < MIN_OPTIONS {
        return Err(ValidationError::MinimumOptions);
    }
    if options
        .iter()
        .any(|option| option.chars().count() > MAX_OPTION_CHARS)
    {
        return Err(ValidationError::OptionTooLong);
    }

    Ok((title.to_string(), options))
}

/// Checks title, options, media then body, stopping at the first failure.
pub fn validate_submission(
    input: PollSubmission,
) -> Result<NormalizedSubmission, ValidationError> {
    let (title, options) = validate_poll_text(&input.title, &input.options)?;

    let batch = validate_media_batch(0, input.media)?;
    if let Some((_, reason)) = batch.rejected.into_iter().next() {
        return Err(reason);
    }

    let body = input
        .body
        .as_deref()
        .map(str::trim)
        .filter(|body| !body.is_empty())
        .map(str::to_string);

    Ok(NormalizedSubmission {
        title,
        body,
        options,
        media: batch.accepted,
    })
}

#[derive(Debug, Default)]
pub struct MediaBatch {
    pub accepted: Vec<(MediaKind, MediaFile)>,
    pub rejected: Vec<(MediaFile, ValidationError)>,
}

pub fn check_media(file: &MediaFile) -> Result<MediaKind, ValidationError> {
    let kind = MediaKind::from_mime(&file.content_type).ok_or_else(|| {
        ValidationError::UnsupportedMediaType {
            file_name: file.file_name.clone(),
        }
    })?;
    if file.size() > MAX_MEDIA_BYTES {
        return Err(ValidationError::MediaTooLarge {
            file_name: file.file_name.clone(),
        });
    }
    Ok(kind)
}

/// Sorts an incoming batch of files into accepted and rejected.
///
/// Each bad file is rejected on its own. If the good ones would push the
/// selection past [`MAX_MEDIA_FILES`] the whole batch is refused instead.
pub fn validate_media_batch(
    already_selected: usize,
    incoming: Vec<MediaFile>,
) -> Result<MediaBatch, ValidationError> {
    let mut batch = MediaBatch::default();
    for file in incoming {
        match check_media(&file) {
            Ok(kind) => batch.accepted.push((kind, file)),
            Err(reason) => batch.rejected.push((file, reason)),
        }
    }

    if already_selected + batch.accepted.len() > MAX_MEDIA_FILES {
        return Err(ValidationError::TooManyMedia);
    }
    Ok(batch)
}

pub fn validate_comment(body: &str) -> Result<String, ValidationError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(ValidationError::EmptyComment);
    }
    Ok(body.to_string())
}

pub fn validate_username(username: &str) -> Result<String, ValidationError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ValidationError::EmptyUsername);
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-';
    if !(3..=20).contains(&username.len()) || !username.chars().all(allowed) {
        return Err(ValidationError::InvalidUsername);
    }
    Ok(username.to_string())
}

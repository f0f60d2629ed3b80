// src/identity.rs
//! Works out who is acting: a signed-in user, an anonymous guest, or nobody.
//!
//! Guests are tracked through a best-effort browser fingerprint. It is not
//! meant to be unique or secure: the random salt mixed into every fingerprint
//! means two tabs without a cached id will each create their own guest.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::models::{Session, VoterIdentity};
use crate::store::GuestStore;

/// Key the guest id is cached under.
pub const GUEST_ID_KEY: &str = "say_it_quick_guest_id";

// Base36 digits of a random fraction, leading `0.` dropped.
const SALT_LEN: usize = 13;
const BASE36: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Outcome of identity resolution, serialized as `{"kind": "user", "id": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ResolvedVoter {
    User { id: Uuid },
    Guest { id: Uuid },
    None,
}

impl ResolvedVoter {
    pub fn identity(&self) -> Option<VoterIdentity> {
        match *self {
            ResolvedVoter::User { id } => Some(VoterIdentity::User(id)),
            ResolvedVoter::Guest { id } => Some(VoterIdentity::Guest(id)),
            ResolvedVoter::None => None,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        match *self {
            ResolvedVoter::User { id } => Some(id),
            _ => None,
        }
    }
}

/// Local key-value storage owned by a single client.
pub trait GuestCache: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: String);
    fn remove(&mut self, key: &str);
}

#[derive(Debug, Default, Clone)]
pub struct MemoryCache {
    entries: HashMap<String, String>,
}

impl MemoryCache {
    /// A cache already holding a guest id, as a returning client would have.
    pub fn with_guest(id: Uuid) -> Self {
        let mut cache = Self::default();
        cache.set(GUEST_ID_KEY, id.to_string());
        cache
    }
}

impl GuestCache for MemoryCache {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: String) {
        self.entries.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

/// Client environment the fingerprint is derived from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentSignals {
    pub user_agent: String,
    pub language: String,
    pub screen_width: u32,
    pub screen_height: u32,
    pub color_depth: u32,
    /// Minutes from UTC, sign as reported by the client.
    pub timezone_offset: i32,
    #[serde(default)]
    pub hardware_concurrency: Option<u32>,
}

impl EnvironmentSignals {
    fn components(&self) -> String {
        let cores = self
            .hardware_concurrency
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unknown".to_string());

        [
            self.user_agent.clone(),
            self.language.clone(),
            self.screen_width.to_string(),
            self.screen_height.to_string(),
            self.color_depth.to_string(),
            self.timezone_offset.to_string(),
            cores,
        ]
        .join("|")
    }
}

/// 32-bit rolling hash (`h * 31 + unit`) over the UTF-16 code units.
pub fn signal_hash(signals: &EnvironmentSignals) -> u32 {
    let hash = signals
        .components()
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        });
    hash.unsigned_abs()
}

/// Formats `{hash hex}_{salt}_{millis base36}`.
pub fn fingerprint(signals: &EnvironmentSignals, salt: &str, now: DateTime<Utc>) -> String {
    let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
    format!("{:x}_{}_{}", signal_hash(signals), salt, to_base36(millis))
}

pub fn random_salt() -> String {
    let mut rng = rand::thread_rng();
    (0..SALT_LEN)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect()
}

fn to_base36(mut value: u64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(BASE36[(value % 36) as usize]);
        value /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

/// Everything the resolver needs besides the cache and the guest table.
#[derive(Debug, Clone, Copy)]
pub struct ResolveContext<'a> {
    pub session: Option<&'a Session>,
    /// Without signals no new guest is minted; only a cached one is honoured.
    pub signals: Option<&'a EnvironmentSignals>,
    pub salt: &'a str,
    pub now: DateTime<Utc>,
}

pub async fn resolve_voter_id(
    ctx: ResolveContext<'_>,
    cache: &mut dyn GuestCache,
    guests: &dyn GuestStore,
) -> ResolvedVoter {
    if let Some(session) = ctx.session {
        return ResolvedVoter::User {
            id: session.user_id,
        };
    }

    if let Some(cached) = cache.get(GUEST_ID_KEY) {
        match Uuid::parse_str(&cached) {
            Ok(id) => match guests.guest_exists(id).await {
                Ok(true) => return ResolvedVoter::Guest { id },
                Ok(false) => debug!(guest_id = %id, "cached guest no longer exists"),
                Err(e) => {
                    error!(guest_id = %id, "failed to confirm guest identity: {e}");
                    return ResolvedVoter::None;
                }
            },
            Err(_) => debug!("ignoring malformed cached guest id"),
        }
    }

    let Some(signals) = ctx.signals else {
        return ResolvedVoter::None;
    };

    let fingerprint = fingerprint(signals, ctx.salt, ctx.now);

    let guest = match guests.find_guest_by_fingerprint(&fingerprint).await {
        Ok(Some(existing)) => existing,
        Ok(None) => match guests.create_guest(&fingerprint).await {
            Ok(created) => {
                info!(guest_id = %created.id, "created guest identity");
                created
            }
            Err(e) => {
                error!("failed to create guest identity: {e}");
                return ResolvedVoter::None;
            }
        },
        Err(e) => {
            error!("failed to look up guest fingerprint: {e}");
            return ResolvedVoter::None;
        }
    };

    cache.set(GUEST_ID_KEY, guest.id.to_string());
    ResolvedVoter::Guest { id: guest.id }
}

/// Drops the cached guest id when the client hands over to a real session.
pub fn clear_guest_identity(cache: &mut dyn GuestCache) {
    cache.remove(GUEST_ID_KEY);
}

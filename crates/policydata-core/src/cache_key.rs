//! Cache key derivation.
//!
//! The member id is rendered in decimal and followed by `_`, so the first
//! `_` after the prefix always ends the id and distinct pairs never collide.

use crate::member::MemberId;

/// Prefix shared by every policy data cache key.
pub const CACHE_KEY_PREFIX: &str = "policydata_member";

/// Derive the cache key for a member and strategy name.
pub fn cache_key(member_id: MemberId, strategy: &str) -> String {
    format!("{CACHE_KEY_PREFIX}{member_id}_{strategy}")
}

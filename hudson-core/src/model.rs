use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::error::{LiveError, LiveResult};
use crate::ids::{ItemId, MembershipId, MessageId, SetId, TenantId};

/// 1-based rank of a membership within its set.
pub type Position = u32;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Normalize a set slug: lowercase, whitespace and underscores become `-`,
/// anything else outside `[a-z0-9-]` is dropped.
pub fn normalize_slug(raw: &str) -> LiveResult<String> {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.trim().chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
        } else if (ch == '-' || ch == '_' || ch.is_whitespace()) && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-').to_string();
    if slug.is_empty() {
        return Err(LiveError::ConstraintViolation(format!(
            "slug {raw:?} is empty after normalization"
        )));
    }
    Ok(slug)
}

/// A tenant-owned, ordered broadcast set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSet {
    pub id: SetId,
    pub tenant_id: TenantId,
    pub name: String,
    /// Unique per tenant
    pub slug: String,
    pub notes: Option<String>,
    /// Last structural change (ms since epoch)
    pub updated_at: u64,
}

impl LiveSet {
    pub fn new(tenant_id: TenantId, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: SetId::new(),
            tenant_id,
            name: name.into(),
            slug: slug.into(),
            notes: None,
            updated_at: now_millis(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at + 1);
    }
}

/// Per-set overrides carried on a membership. Not part of the ordering contract.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MembershipAttrs {
    pub display_name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub sale_price_cents: Option<i64>,
    pub section: Option<String>,
    pub notes: Option<String>,
}

impl MembershipAttrs {
    pub fn named(display_name: impl Into<String>) -> Self {
        Self {
            display_name: Some(display_name.into()),
            ..Self::default()
        }
    }
}

/// One catalog item placed in a set at a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub id: MembershipId,
    pub set_id: SetId,
    pub item_id: ItemId,
    pub position: Position,
    pub attrs: MembershipAttrs,
}

impl Membership {
    pub fn new(set_id: SetId, item_id: ItemId, position: Position, attrs: MembershipAttrs) -> Self {
        Self {
            id: MembershipId::new(),
            set_id,
            item_id,
            position,
            attrs,
        }
    }
}

/// Colour tag for the producer's on-air message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageColor {
    #[default]
    Neutral,
    Info,
    Success,
    Warning,
    Alert,
}

/// Transient message block stamped on the pointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveMessage {
    pub id: MessageId,
    pub text: String,
    pub color: MessageColor,
    /// Server timestamp (ms since epoch)
    pub sent_at: u64,
}

impl LiveMessage {
    pub fn new(text: impl Into<String>, color: MessageColor) -> Self {
        Self {
            id: MessageId::new(),
            text: text.into(),
            color,
            sent_at: now_millis(),
        }
    }
}

/// The single mutable "what is live now" record of a set.
///
/// Exactly one per set; the store keys it by `set_id`. Every broadcast
/// carries the whole pointer, never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatePointer {
    pub set_id: SetId,
    pub current_membership_id: Option<MembershipId>,
    pub current_image_index: u32,
    pub message: Option<LiveMessage>,
    /// Strictly increasing per set (ms since epoch)
    pub updated_at: u64,
}

impl StatePointer {
    /// A pointer that has never been navigated.
    pub fn empty(set_id: SetId) -> Self {
        Self {
            set_id,
            current_membership_id: None,
            current_image_index: 0,
            message: None,
            updated_at: 0,
        }
    }

    /// Point at a membership, resetting the image index.
    pub fn pointing_at(&self, membership_id: Option<MembershipId>) -> Self {
        Self {
            current_membership_id: membership_id,
            current_image_index: 0,
            ..self.clone()
        }
    }

    pub fn with_image_index(&self, index: u32) -> Self {
        Self {
            current_image_index: index,
            ..self.clone()
        }
    }

    pub fn with_message(&self, message: Option<LiveMessage>) -> Self {
        Self {
            message,
            ..self.clone()
        }
    }

    /// Stamp `updated_at` so it is strictly greater than `previous`.
    pub fn stamp_after(&mut self, previous: u64) {
        self.updated_at = now_millis().max(previous + 1);
    }

    pub fn is_initialized(&self) -> bool {
        self.current_membership_id.is_some()
    }
}

/// Direction for image cycling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CycleDirection {
    Forward,
    Backward,
}

impl CycleDirection {
    /// Step `index` one image in this direction, wrapping modulo `count`.
    pub fn step(self, index: u32, count: u32) -> u32 {
        debug_assert!(count > 0);
        let index = index % count;
        match self {
            CycleDirection::Forward => (index + 1) % count,
            CycleDirection::Backward => (index + count - 1) % count,
        }
    }
}

//! # hudson-core: Domain model for live-commerce broadcast sets
//!
//! Pure data and algorithms, no I/O:
//!
//! - [`ids`]: strongly-typed identifiers (tenant, set, membership, item, message)
//! - [`model`]: Set, Membership, State Pointer and the transient message block
//! - [`positions`]: plans that keep membership positions contiguous (`1..N`)
//! - [`catalog`]: read-only catalog collaborator and an in-memory implementation
//! - [`view`]: derived projections for the host display and share links
//! - [`error`]: the business failure taxonomy shared by every layer
//!
//! The engine that persists, locks and broadcasts lives in `hudson-live`.

pub mod ids;
pub mod model;
pub mod positions;
pub mod catalog;
pub mod view;
pub mod error;

pub use ids::{ItemId, MembershipId, MessageId, SetId, TenantId};
pub use model::{
    now_millis, normalize_slug, CycleDirection, LiveMessage, LiveSet, Membership,
    MembershipAttrs, MessageColor, Position, StatePointer,
};
pub use positions::{
    is_contiguous, next_position, renumber_plan, reorder_plan, shift_up_plan,
    staging_base, validate_reorder, PositionMove, TwoPhasePlan, TEMP_POSITION_OFFSET,
};
pub use catalog::{Catalog, CatalogImage, CatalogItem, CatalogVariant, InMemoryCatalog};
pub use view::{LiveView, SharedItem, SharedView};
pub use error::{LiveError, LiveResult};

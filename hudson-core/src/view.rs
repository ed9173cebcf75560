//! Derived, read-only projections.

use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CatalogImage, CatalogItem};
use crate::ids::{MembershipId, SetId};
use crate::model::{LiveMessage, LiveSet, Membership, Position, StatePointer};

/// One item as seen through a share link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedItem {
    pub membership_id: MembershipId,
    pub position: Position,
    /// Membership override if present, otherwise the catalog name
    pub name: String,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub sale_price_cents: Option<i64>,
    pub images: Vec<CatalogImage>,
}

impl SharedItem {
    fn build(membership: &Membership, item: Option<CatalogItem>) -> Self {
        let (catalog_name, images) = match item {
            Some(item) => (Some(item.name), item.images),
            None => (None, Vec::new()),
        };
        let name = membership
            .attrs
            .display_name
            .clone()
            .or(catalog_name)
            .unwrap_or_else(|| membership.item_id.to_string());
        Self {
            membership_id: membership.id,
            position: membership.position,
            name,
            description: membership.attrs.description.clone(),
            price_cents: membership.attrs.price_cents,
            sale_price_cents: membership.attrs.sale_price_cents,
            images,
        }
    }
}

/// Public projection granted by a verified share token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedView {
    pub set_id: SetId,
    pub set_name: String,
    /// Ordered by position
    pub items: Vec<SharedItem>,
    pub pointer: StatePointer,
}

impl SharedView {
    pub fn build(
        set: &LiveSet,
        memberships: &[Membership],
        pointer: StatePointer,
        catalog: &dyn Catalog,
    ) -> Self {
        let mut items: Vec<SharedItem> = memberships
            .iter()
            .map(|m| SharedItem::build(m, catalog.item(m.item_id)))
            .collect();
        items.sort_by_key(|item| item.position);
        Self {
            set_id: set.id,
            set_name: set.name.clone(),
            items,
            pointer,
        }
    }

    pub fn message(&self) -> Option<&LiveMessage> {
        self.pointer.message.as_ref()
    }

    pub fn current_item(&self) -> Option<&SharedItem> {
        let current = self.pointer.current_membership_id?;
        self.items.iter().find(|item| item.membership_id == current)
    }
}

/// What the host display renders: the pointer resolved against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveView {
    pub pointer: StatePointer,
    pub membership: Option<Membership>,
    pub item: Option<CatalogItem>,
    pub image: Option<CatalogImage>,
    pub total: u32,
}

impl LiveView {
    pub fn build(
        pointer: StatePointer,
        membership: Option<Membership>,
        total: u32,
        catalog: &dyn Catalog,
    ) -> Self {
        let item = membership.as_ref().and_then(|m| catalog.item(m.item_id));
        let image = item
            .as_ref()
            .and_then(|item| item.images.get(pointer.current_image_index as usize).cloned());
        Self {
            pointer,
            membership,
            item,
            image,
            total,
        }
    }
}

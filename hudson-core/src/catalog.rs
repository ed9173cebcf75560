//! Read-only catalog collaborator.
//!
//! The engine never mutates catalog data; per-set overrides live on the
//! membership. [`InMemoryCatalog`] backs tests and the host binary.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::RwLock;

use crate::ids::ItemId;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogImage {
    pub url: String,
    #[serde(default)]
    pub alt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVariant {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub price_cents: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: ItemId,
    pub name: String,
    /// Ordered; the pointer's image index addresses this list
    #[serde(default)]
    pub images: Vec<CatalogImage>,
    #[serde(default)]
    pub variants: Vec<CatalogVariant>,
}

impl CatalogItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ItemId::new(),
            name: name.into(),
            images: Vec::new(),
            variants: Vec::new(),
        }
    }

    pub fn with_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.images = urls
            .into_iter()
            .map(|url| CatalogImage { url: url.into(), alt: None })
            .collect();
        self
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }
}

/// Immutable item lookup.
pub trait Catalog: Send + Sync {
    fn item(&self, id: ItemId) -> Option<CatalogItem>;

    /// Image count of an item; unknown items have none.
    fn image_count(&self, id: ItemId) -> u32 {
        self.item(id).map_or(0, |item| item.image_count())
    }
}

/// Catalog held in memory.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<ItemId, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON array of items.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let items: Vec<CatalogItem> = serde_json::from_str(json)?;
        let catalog = Self::new();
        for item in items {
            catalog.insert(item);
        }
        log::debug!("Loaded {} catalog items from JSON", catalog.len());
        Ok(catalog)
    }

    pub fn insert(&self, item: CatalogItem) -> ItemId {
        let id = item.id;
        let mut items = self.items.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        items.insert(id, item);
        id
    }

    pub fn len(&self) -> usize {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Catalog for InMemoryCatalog {
    fn item(&self, id: ItemId) -> Option<CatalogItem> {
        self.items
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let catalog = InMemoryCatalog::new();
        let id = catalog.insert(CatalogItem::new("Linen Shirt").with_images(["a.jpg", "b.jpg"]));
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.item(id).unwrap().name, "Linen Shirt");
        assert_eq!(catalog.image_count(id), 2);
    }

    #[test]
    fn test_unknown_item_has_no_images() {
        let catalog = InMemoryCatalog::new();
        assert!(catalog.item(ItemId::new()).is_none());
        assert_eq!(catalog.image_count(ItemId::new()), 0);
    }

    #[test]
    fn test_from_json() {
        let json = r#"[
            {"id": "550e8400-e29b-41d4-a716-446655440000", "name": "Mug",
             "images": [{"url": "mug.jpg"}],
             "variants": [{"name": "Blue", "price_cents": 1200}]}
        ]"#;
        let catalog = InMemoryCatalog::from_json(json).unwrap();
        assert_eq!(catalog.len(), 1);
        let id = ItemId::from(uuid::Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap());
        let item = catalog.item(id).unwrap();
        assert_eq!(item.images[0].url, "mug.jpg");
        assert_eq!(item.variants[0].price_cents, Some(1200));
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(InMemoryCatalog::from_json("{not json").is_err());
    }
}

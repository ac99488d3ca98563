//! Emby API response types

use bridge_traits::library::{LibraryItem, LibraryItemKind};
use serde::Deserialize;

/// `BaseItemDto`, reduced to the fields lookups need
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BaseItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "Type", default)]
    pub item_type: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub production_year: Option<i32>,
    #[serde(default)]
    pub index_number: Option<u32>,
}

impl From<BaseItem> for LibraryItem {
    fn from(item: BaseItem) -> Self {
        LibraryItem {
            kind: LibraryItemKind::parse(&item.item_type),
            id: item.id,
            name: item.name,
            path: item.path,
            production_year: item.production_year,
            index_number: item.index_number,
        }
    }
}

/// `QueryResult<BaseItemDto>`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ItemsResponse {
    #[serde(default)]
    pub items: Vec<BaseItem>,
    #[serde(default)]
    pub total_record_count: u64,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Image used when the payload carries none.
pub const PLACEHOLDER_IMAGE: &str = "/images/placeholder-agent.png";
/// Creator name used when the payload carries none.
pub const DEFAULT_CREATOR_NAME: &str = "Unknown Creator";
pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_CURRENCY: &str = "USD";

/// A marketplace product ("agent") as displayed by the storefront.
///
/// Counters are `Option` so that a payload which omits a counter can be told apart from
/// one that reports zero; reconciliation relies on that distinction.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub price: Price,
    pub image_url: String,
    pub creator: Creator,
    pub rating: Rating,
    pub likes_count: Option<u64>,
    pub download_count: Option<u64>,
    pub review_count: Option<u64>,
    pub reviews: Vec<Review>,
    pub file: Option<FileDescriptor>,
    /// Local optimistic state, never sent by the server
    pub liked_by_viewer: Option<bool>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProductRecord {
    /// A record carrying only its id and the documented defaults.
    pub fn with_defaults(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: DEFAULT_TITLE.to_string(),
            description: None,
            category: None,
            tags: Vec::new(),
            price: Price::free(),
            image_url: PLACEHOLDER_IMAGE.to_string(),
            creator: Creator::default(),
            rating: Rating::default(),
            likes_count: None,
            download_count: None,
            review_count: None,
            reviews: Vec::new(),
            file: None,
            liked_by_viewer: None,
            created_at: None,
            updated_at: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.price.is_free
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Price {
    pub amount: f64,
    pub currency: String,
    pub is_free: bool,
}

impl Price {
    pub fn free() -> Self {
        Self {
            amount: 0.0,
            currency: DEFAULT_CURRENCY.to_string(),
            is_free: true,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Creator {
    pub id: Option<String>,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl Default for Creator {
    fn default() -> Self {
        Self {
            id: None,
            name: DEFAULT_CREATOR_NAME.to_string(),
            avatar_url: None,
        }
    }
}

impl Creator {
    pub fn is_default(&self) -> bool {
        self.id.is_none() && self.name == DEFAULT_CREATOR_NAME && self.avatar_url.is_none()
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rating {
    pub average: Option<f64>,
    pub count: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub rating: Option<f64>,
    pub comment: String,
    pub created_at: Option<DateTime<Utc>>,
}

/// Where the downloadable file lives, as far as the record knows.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub url: Option<String>,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
}

impl FileDescriptor {
    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.name.is_none() && self.size.is_none() && self.mime_type.is_none()
    }
}

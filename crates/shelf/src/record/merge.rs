//! Field-level merge of a freshly fetched record into the displayed one.
//!
//! A fresh value only replaces the local one when it actually carries data: counters
//! must be present, collections non-empty and descriptive fields different from the
//! normalization defaults. A partial response can therefore refresh what it contains
//! without erasing what it omits.

use tracing::warn;

use crate::record::model::{DEFAULT_TITLE, PLACEHOLDER_IMAGE, ProductRecord};

/// Which fields a merge changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    pub changed_fields: Vec<&'static str>,
}

impl MergeOutcome {
    pub fn changed(&self) -> bool {
        !self.changed_fields.is_empty()
    }
}

/// Merge `fresh` into `local` in place.
///
/// Merging the same `fresh` twice is idempotent: the second call reports no changes.
pub fn merge_record(local: &mut ProductRecord, fresh: &ProductRecord) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();

    if local.id != fresh.id {
        warn!(local_id = %local.id, fresh_id = %fresh.id, "Refusing to merge records with different ids");
        return outcome;
    }

    let mut set = |field: &'static str, changed: bool| {
        if changed {
            outcome.changed_fields.push(field);
        }
    };

    set("likesCount", merge_option(&mut local.likes_count, fresh.likes_count));
    set("downloadCount", merge_option(&mut local.download_count, fresh.download_count));
    set("reviewCount", merge_option(&mut local.review_count, fresh.review_count));
    set("rating.average", merge_option(&mut local.rating.average, fresh.rating.average));
    set("rating.count", merge_option(&mut local.rating.count, fresh.rating.count));

    if !fresh.reviews.is_empty() && local.reviews != fresh.reviews {
        local.reviews = fresh.reviews.clone();
        set("reviews", true);
    }

    if fresh.title != DEFAULT_TITLE && local.title != fresh.title {
        local.title = fresh.title.clone();
        set("title", true);
    }
    if fresh.image_url != PLACEHOLDER_IMAGE && local.image_url != fresh.image_url {
        local.image_url = fresh.image_url.clone();
        set("imageUrl", true);
    }
    if !fresh.creator.is_default() && local.creator != fresh.creator {
        local.creator = fresh.creator.clone();
        set("creator", true);
    }
    // the default price is "free", so only a payload that states a price can change it
    if (!fresh.price.is_free || fresh.price.amount > 0.0) && local.price != fresh.price {
        local.price = fresh.price.clone();
        set("price", true);
    }
    if !fresh.tags.is_empty() && local.tags != fresh.tags {
        local.tags = fresh.tags.clone();
        set("tags", true);
    }

    set("description", merge_option(&mut local.description, fresh.description.clone()));
    set("category", merge_option(&mut local.category, fresh.category.clone()));
    set("file", merge_option(&mut local.file, fresh.file.clone()));
    set("updatedAt", merge_option(&mut local.updated_at, fresh.updated_at));
    set("createdAt", merge_option(&mut local.created_at, fresh.created_at));

    outcome
}

/// Overwrite when the fresh value is present and differs.
fn merge_option<T: PartialEq>(local: &mut Option<T>, fresh: Option<T>) -> bool {
    match fresh {
        Some(value) if local.as_ref() != Some(&value) => {
            *local = Some(value);
            true
        }
        _ => false,
    }
}

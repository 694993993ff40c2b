//! Normalization of server payloads.
//!
//! The API has shipped several shapes for the same entity over time. Every field is
//! resolved through a fixed precedence list of candidate keys; the first candidate that
//! holds a usable value wins and documented defaults fill whatever is left.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

use crate::SyncError;
use crate::record::model::{
    Creator, DEFAULT_CREATOR_NAME, DEFAULT_CURRENCY, DEFAULT_TITLE, FileDescriptor,
    PLACEHOLDER_IMAGE, Price, ProductRecord, Rating, Review,
};

const ID_KEYS: &[&str] = &["id", "_id", "agentId"];
const TITLE_KEYS: &[&str] = &["title", "name"];
const IMAGE_KEYS: &[&str] = &["imageUrl", "image", "thumbnail", "thumbnailUrl"];
const DOWNLOAD_URL_KEYS: &[&str] = &["downloadUrl", "fileUrl"];

/// Turn a raw payload (`{ data: Record }` or a bare record) into a typed record.
pub fn normalize_record(payload: Value) -> Result<ProductRecord, SyncError> {
    let obj = unwrap_envelope(payload)?;

    let id = first_id(&obj, ID_KEYS)
        .ok_or_else(|| SyncError::Validation("record has no id".to_string()))?;

    let title = first_string(&obj, TITLE_KEYS).unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let reviews = parse_reviews(&obj);
    // an empty array is how partial responses omit reviews, not a count of zero
    let review_count = first_u64(&obj, &["reviewCount", "reviewsCount"])
        .or_else(|| array_len(&obj, "reviews").filter(|len| *len > 0));

    Ok(ProductRecord {
        id,
        title,
        description: first_string(&obj, &["description"]),
        category: first_string(&obj, &["category"]),
        tags: parse_tags(&obj),
        price: parse_price(&obj),
        image_url: parse_image(&obj),
        creator: parse_creator(&obj),
        rating: parse_rating(&obj),
        likes_count: first_u64(&obj, &["likesCount", "likes"]).or_else(|| array_len(&obj, "likes")),
        download_count: first_u64(&obj, &["downloadCount", "downloads"]),
        review_count,
        reviews,
        file: parse_file(&obj),
        liked_by_viewer: None,
        created_at: first_datetime(&obj, "createdAt"),
        updated_at: first_datetime(&obj, "updatedAt"),
    })
}

fn unwrap_envelope(payload: Value) -> Result<Map<String, Value>, SyncError> {
    match payload {
        Value::Object(mut obj) => match obj.remove("data") {
            Some(Value::Object(inner)) => Ok(inner),
            Some(other) => {
                // `data` was a field of the record itself, not an envelope
                obj.insert("data".to_string(), other);
                Ok(obj)
            }
            None => Ok(obj),
        },
        other => Err(SyncError::Validation(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn non_empty(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn first_string(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .find_map(|value| value.as_str().and_then(non_empty))
}

/// Ids may arrive as strings or numbers.
fn first_id(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().filter_map(|key| obj.get(*key)).find_map(|value| match value {
        Value::String(s) => non_empty(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|v| *v >= 0.0).map(|v| v as u64)),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }
}

fn first_u64(obj: &Map<String, Value>, keys: &[&str]) -> Option<u64> {
    keys.iter().filter_map(|key| obj.get(*key)).find_map(as_u64)
}

fn array_len(obj: &Map<String, Value>, key: &str) -> Option<u64> {
    obj.get(key)
        .and_then(Value::as_array)
        .map(|items| items.len() as u64)
}

fn first_datetime(obj: &Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
    obj.get(key).and_then(parse_datetime)
}

fn parse_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        _ => None,
    }
}

/// Price precedence: `price`, `pricing.amount`, `priceAmount`.
fn parse_price(obj: &Map<String, Value>) -> Price {
    let pricing = obj.get("pricing").and_then(Value::as_object);

    let amount = obj
        .get("price")
        .and_then(as_f64)
        .or_else(|| pricing.and_then(|p| p.get("amount")).and_then(as_f64))
        .or_else(|| obj.get("priceAmount").and_then(as_f64))
        .unwrap_or(0.0);

    let flagged_free = obj.get("isFree").and_then(Value::as_bool) == Some(true);
    let typed_free = pricing
        .and_then(|p| p.get("type"))
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("free"));
    let labelled_free = obj
        .get("price")
        .and_then(Value::as_str)
        .is_some_and(|p| p.trim().eq_ignore_ascii_case("free"));

    let currency = first_string(obj, &["currency"])
        .or_else(|| pricing.and_then(|p| first_string(p, &["currency"])))
        .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());

    Price {
        amount,
        currency,
        is_free: flagged_free || typed_free || labelled_free || amount == 0.0,
    }
}

fn parse_image(obj: &Map<String, Value>) -> String {
    first_string(obj, IMAGE_KEYS)
        .or_else(|| {
            obj.get("images")
                .and_then(Value::as_array)
                .and_then(|images| images.iter().find_map(|v| v.as_str().and_then(non_empty)))
        })
        .unwrap_or_else(|| PLACEHOLDER_IMAGE.to_string())
}

fn parse_creator(obj: &Map<String, Value>) -> Creator {
    if let Some(creator) = obj.get("creator").and_then(Value::as_object) {
        return Creator {
            id: first_id(creator, &["id", "_id"]),
            name: first_string(creator, &["name", "displayName", "username"])
                .unwrap_or_else(|| DEFAULT_CREATOR_NAME.to_string()),
            avatar_url: first_string(creator, &["avatar", "avatarUrl"]),
        };
    }

    match first_string(obj, &["creatorName", "author", "creator"]) {
        Some(name) => Creator {
            id: first_id(obj, &["creatorId"]),
            name,
            avatar_url: None,
        },
        None => Creator::default(),
    }
}

fn parse_rating(obj: &Map<String, Value>) -> Rating {
    let nested = obj.get("rating").and_then(Value::as_object);

    let average = nested
        .and_then(|r| r.get("average"))
        .and_then(as_f64)
        .or_else(|| obj.get("rating").and_then(as_f64))
        .or_else(|| obj.get("averageRating").and_then(as_f64));
    let count = nested
        .and_then(|r| r.get("count"))
        .and_then(as_u64)
        .or_else(|| first_u64(obj, &["ratingCount"]));

    Rating { average, count }
}

fn parse_reviews(obj: &Map<String, Value>) -> Vec<Review> {
    let Some(items) = obj.get("reviews").and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| {
            let review = parse_review(item);
            if review.is_none() {
                debug!(review = %item, "Skipping malformed review");
            }
            review
        })
        .collect()
}

fn parse_review(value: &Value) -> Option<Review> {
    let obj = value.as_object()?;
    let comment = first_string(obj, &["comment", "content", "text"]).unwrap_or_default();
    let rating = obj.get("rating").and_then(as_f64);
    if comment.is_empty() && rating.is_none() {
        return None;
    }

    let user_name = first_string(obj, &["userName"]).or_else(|| {
        obj.get("user")
            .and_then(Value::as_object)
            .and_then(|user| first_string(user, &["name", "displayName"]))
    });

    Some(Review {
        id: first_id(obj, &["id", "_id"]),
        user_id: first_id(obj, &["userId"]),
        user_name,
        rating,
        comment,
        created_at: obj.get("createdAt").and_then(parse_datetime),
    })
}

fn parse_tags(obj: &Map<String, Value>) -> Vec<String> {
    obj.get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(|t| t.as_str().and_then(non_empty))
                .collect()
        })
        .unwrap_or_default()
}

/// File precedence: `downloadUrl`, `fileUrl`, `file.url`.
fn parse_file(obj: &Map<String, Value>) -> Option<FileDescriptor> {
    let nested = obj.get("file").and_then(Value::as_object);

    let descriptor = FileDescriptor {
        url: first_string(obj, DOWNLOAD_URL_KEYS)
            .or_else(|| nested.and_then(|f| first_string(f, &["url"]))),
        name: first_string(obj, &["fileName"])
            .or_else(|| nested.and_then(|f| first_string(f, &["name"]))),
        size: first_u64(obj, &["fileSize"]).or_else(|| nested.and_then(|f| first_u64(f, &["size"]))),
        mime_type: first_string(obj, &["fileType"])
            .or_else(|| nested.and_then(|f| first_string(f, &["type"]))),
    };

    (!descriptor.is_empty()).then_some(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_enveloped_and_bare_payloads_agree() {
        let bare = json!({ "id": "agent-1", "title": "Scraper", "price": 12.5 });
        let wrapped = json!({ "data": bare.clone() });

        assert_eq!(
            normalize_record(bare).unwrap(),
            normalize_record(wrapped).unwrap()
        );
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let record = normalize_record(json!({ "_id": 42 })).unwrap();
        assert_eq!(record.id, "42");
        assert_eq!(record.title, DEFAULT_TITLE);
        assert_eq!(record.image_url, PLACEHOLDER_IMAGE);
        assert!(record.creator.is_default());
        assert!(record.is_free());
        assert_eq!(record.likes_count, None);
        assert_eq!(record.review_count, None);
        assert!(record.file.is_none());
    }

    #[test]
    fn test_missing_id_is_validation_error() {
        let err = normalize_record(json!({ "title": "x" })).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        let err = normalize_record(json!([1, 2])).unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
    }

    #[test]
    fn test_price_precedence_and_free_detection() {
        let record = normalize_record(json!({
            "id": "a", "price": "19.99", "pricing": { "amount": 5 }, "priceAmount": 1
        }))
        .unwrap();
        assert_eq!(record.price.amount, 19.99);
        assert!(!record.is_free());

        let record = normalize_record(json!({ "id": "a", "pricing": { "amount": 5, "currency": "EUR" } })).unwrap();
        assert_eq!(record.price.amount, 5.0);
        assert_eq!(record.price.currency, "EUR");

        let record = normalize_record(json!({ "id": "a", "price": 9, "isFree": true })).unwrap();
        assert!(record.is_free());

        let record = normalize_record(json!({ "id": "a", "price": "Free" })).unwrap();
        assert!(record.is_free());

        let record = normalize_record(json!({ "id": "a", "pricing": { "type": "FREE", "amount": 3 } })).unwrap();
        assert!(record.is_free());
    }

    #[test]
    fn test_image_and_creator_fallbacks() {
        let record = normalize_record(json!({
            "id": "a", "images": ["", "https://cdn.example.com/1.png"], "author": "Ada"
        }))
        .unwrap();
        assert_eq!(record.image_url, "https://cdn.example.com/1.png");
        assert_eq!(record.creator.name, "Ada");

        let record = normalize_record(json!({
            "id": "a", "thumbnail": "t.png",
            "creator": { "_id": "u1", "displayName": "Bob", "avatarUrl": "b.png" }
        }))
        .unwrap();
        assert_eq!(record.image_url, "t.png");
        assert_eq!(record.creator.id.as_deref(), Some("u1"));
        assert_eq!(record.creator.name, "Bob");
        assert_eq!(record.creator.avatar_url.as_deref(), Some("b.png"));
    }

    #[test]
    fn test_counters_and_reviews() {
        let record = normalize_record(json!({
            "id": "a",
            "likes": ["u1", "u2", "u3"],
            "downloads": 10,
            "rating": { "average": 4.5, "count": 2 },
            "reviews": [
                { "_id": "r1", "rating": 5, "comment": "great", "user": { "name": "Eve" },
                  "createdAt": "2024-05-01T10:00:00Z" },
                { "nothing": true },
                "junk"
            ]
        }))
        .unwrap();

        assert_eq!(record.likes_count, Some(3));
        assert_eq!(record.download_count, Some(10));
        assert_eq!(record.rating.average, Some(4.5));
        assert_eq!(record.rating.count, Some(2));
        assert_eq!(record.reviews.len(), 1);
        assert_eq!(record.reviews[0].user_name.as_deref(), Some("Eve"));
        assert!(record.reviews[0].created_at.is_some());
        // count falls back to the raw array length
        assert_eq!(record.review_count, Some(3));
    }

    #[test]
    fn test_empty_reviews_array_leaves_count_unknown() {
        let record = normalize_record(json!({ "id": "a", "likesCount": 6, "reviews": [] })).unwrap();
        assert!(record.reviews.is_empty());
        assert_eq!(record.review_count, None);

        let record = normalize_record(json!({ "id": "a", "reviewCount": 0, "reviews": [] })).unwrap();
        assert_eq!(record.review_count, Some(0));
    }

    #[test]
    fn test_flat_rating_and_file_descriptor() {
        let record = normalize_record(json!({
            "id": "a", "averageRating": "3.5", "ratingCount": 8,
            "file": { "url": "https://storage.googleapis.com/b/agent.zip", "name": "agent.zip", "size": 2048 }
        }))
        .unwrap();

        assert_eq!(record.rating.average, Some(3.5));
        assert_eq!(record.rating.count, Some(8));
        let file = record.file.unwrap();
        assert_eq!(file.url.as_deref(), Some("https://storage.googleapis.com/b/agent.zip"));
        assert_eq!(file.name.as_deref(), Some("agent.zip"));
        assert_eq!(file.size, Some(2048));
    }

    #[test]
    fn test_download_url_precedence() {
        let record = normalize_record(json!({
            "id": "a", "downloadUrl": "https://a", "fileUrl": "https://b", "file": { "url": "https://c" }
        }))
        .unwrap();
        assert_eq!(record.file.unwrap().url.as_deref(), Some("https://a"));
    }
}

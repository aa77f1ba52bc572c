//! Record and listing fixtures shaped like a Discourse forum's JSON.

use serde_json::{json, Value};

use crate::core::{Identifier, RawRecord};

/// A topic record that satisfies the community-posts projection.
#[must_use]
pub fn topic_record(identifier: &Identifier, views: u64) -> RawRecord {
    topic_record_with(
        identifier,
        &format!("Topic {identifier}"),
        &format!("user{identifier}"),
        &format!("topic-{identifier}"),
        views,
    )
}

/// A topic record with explicit fields.
#[must_use]
pub fn topic_record_with(
    identifier: &Identifier,
    title: &str,
    username: &str,
    slug: &str,
    views: u64,
) -> RawRecord {
    RawRecord::new(json!({
        "id": identifier,
        "title": title,
        "slug": slug,
        "views": views,
        "details": {"created_by": {"username": username}},
    }))
}

/// A `latest.json`-style listing body.
#[must_use]
pub fn listing(identifiers: &[i64]) -> Value {
    let topics: Vec<Value> = identifiers.iter().map(|id| json!({"id": id})).collect();
    json!({"topic_list": {"topics": topics}})
}

/// Integer identifiers.
#[must_use]
pub fn int_ids(values: &[i64]) -> Vec<Identifier> {
    values.iter().copied().map(Identifier::Int).collect()
}

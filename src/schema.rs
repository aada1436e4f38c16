use serde::{Deserialize, Serialize};

/// A single quote as returned by the upstream source.
///
/// This is the only record type flowing through the pool:
/// - Fetch workers decode it from the source payload
/// - The collector channel carries it to the consumer
/// - Sinks render or forward it
///
/// Records are immutable once decoded. A worker owns its record
/// until the channel send succeeds; the consumer owns it afterwards.
///
/// WIRE FORMAT:
/// - The identifier arrives as `_id` (a plain `id` is accepted too)
/// - Remaining keys are camelCase
/// - `tags` keeps the order in which the source sent them
/// - Both dates are kept verbatim; nothing here parses them
///
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,

    pub author: String,

    pub content: String,

    #[serde(default)]
    pub tags: Vec<String>,

    pub author_slug: String,

    /// Length of `content` as reported by the source
    pub length: i64,

    pub date_added: String,

    pub date_modified: String,
}

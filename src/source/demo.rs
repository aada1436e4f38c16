use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use rand::random_range;
use tokio::time::sleep;

use crate::schema::Record;

use super::{FetchError, RecordSource};

/// Offline quote source
///
/// Produces quotes from a small built-in set after a random delay,
/// so the whole pipeline can be exercised without network access.
/// It never fails.
pub struct DemoSource {
    min_latency: Duration,
    max_latency: Duration,
}

struct Sample {
    author: &'static str,
    content: &'static str,
    tags: &'static [&'static str],
}

static SAMPLES: Lazy<Vec<Sample>> = Lazy::new(|| {
    vec![
        Sample {
            author: "Grace Hopper",
            content: "The most dangerous phrase in the language is: we've always done it this way.",
            tags: &["Technology", "Wisdom"],
        },
        Sample {
            author: "Edsger Dijkstra",
            content: "Simplicity is prerequisite for reliability.",
            tags: &["Technology"],
        },
        Sample {
            author: "Marie Curie",
            content: "Nothing in life is to be feared, it is only to be understood.",
            tags: &["Science", "Famous Quotes"],
        },
        Sample {
            author: "Lao Tzu",
            content: "A journey of a thousand miles begins with a single step.",
            tags: &["Famous Quotes", "Inspirational"],
        },
    ]
});

impl DemoSource {
    pub fn new() -> Self {
        Self::with_latency(Duration::from_millis(50), Duration::from_millis(400))
    }

    pub fn with_latency(min_latency: Duration, max_latency: Duration) -> Self {
        Self {
            min_latency,
            max_latency: max_latency.max(min_latency),
        }
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::new()
    }
}

fn slugify(author: &str) -> String {
    author
        .split_whitespace()
        .map(|part| part.to_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

#[async_trait::async_trait]
impl RecordSource for DemoSource {
    fn name(&self) -> &'static str {
        "demo"
    }

    async fn fetch(&self, _worker: usize) -> Result<Record, FetchError> {
        let min = self.min_latency.as_millis() as u64;
        let max = self.max_latency.as_millis() as u64;
        sleep(Duration::from_millis(random_range(min..=max))).await;

        let sample = &SAMPLES[random_range(0..SAMPLES.len())];
        let today = Utc::now().format("%Y-%m-%d").to_string();

        Ok(Record {
            id: format!("demo-{:08x}", random_range(0..u32::MAX)),
            author: sample.author.to_string(),
            content: sample.content.to_string(),
            tags: sample.tags.iter().map(|t| t.to_string()).collect(),
            author_slug: slugify(sample.author),
            length: sample.content.chars().count() as i64,
            date_added: today.clone(),
            date_modified: today,
        })
    }
}

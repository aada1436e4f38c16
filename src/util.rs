//! Utility helpers shared by the pool and the sinks.
//!
//! This module contains:
//! - Panic payload formatting for the coordinator
//! - Small rendering helpers for records
//!
//! No pool or source logic should live here.

use std::any::Any;

/// Extracts a readable message from a task panic payload.
pub fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Renders a tag list as `[a b c]`.
///
/// Tags keep the order in which the source sent them.
pub fn format_tags(tags: &[String]) -> String {
    format!("[{}]", tags.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_tags_in_source_order() {
        let tags = vec!["Wisdom".to_string(), "Famous Quotes".to_string()];
        assert_eq!(format_tags(&tags), "[Wisdom Famous Quotes]");
        assert_eq!(format_tags(&[]), "[]");
    }

    #[test]
    fn reads_str_and_string_payloads() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}

//! Property tests for output file names

use gmail_export::models::{EmailRecord, MessageId};
use gmail_export::sink::{record_file_name, safe_component, MAX_COMPONENT_CHARS};
use proptest::prelude::*;

fn allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-' | ' ')
}

fn record(sender_email: String, subject: String, request_id: u64) -> EmailRecord {
    EmailRecord {
        id: MessageId::new("m"),
        request_id,
        time_received: "Unknown".to_string(),
        is_read: true,
        sender_name: String::new(),
        sender_email,
        subject,
        original_html: None,
        clean_html: None,
        clean_markdown: Some("body".to_string()),
        attachments: vec![],
        token_count: 1,
    }
}

proptest! {
    #[test]
    fn safe_component_only_uses_allowed_chars(value in any::<String>()) {
        let safe = safe_component(&value, MAX_COMPONENT_CHARS);
        prop_assert!(safe.chars().all(allowed));
        prop_assert!(safe.chars().count() <= MAX_COMPONENT_CHARS);
        prop_assert_eq!(safe.chars().count(), value.chars().count().min(MAX_COMPONENT_CHARS));
    }

    #[test]
    fn safe_component_keeps_allowed_input(value in "[A-Za-z0-9_. -]{0,50}") {
        prop_assert_eq!(safe_component(&value, MAX_COMPONENT_CHARS), value);
    }

    #[test]
    fn file_names_never_escape_output_dir(
        sender in any::<String>(),
        subject in any::<String>(),
        request_id in 1u64..1_000_000,
    ) {
        let name = record_file_name(&record(sender, subject, request_id));
        let prefix = format!("email_{}_", request_id);

        prop_assert!(name.starts_with(&prefix));
        prop_assert!(name.ends_with(".md"));
        prop_assert!(!name.contains('/'));
        prop_assert!(!name.contains('\\'));
        prop_assert!(name.chars().all(allowed));
    }
}

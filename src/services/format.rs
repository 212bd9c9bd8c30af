//! Telegram MarkdownV2 message bodies.

use std::sync::OnceLock;

use regex::Regex;

use crate::feed::FeedItem;
use crate::models::Feed;

/// Snippet length in individually delivered messages.
pub const MAX_DESCRIPTION_CHARS: usize = 200;

/// Escape every MarkdownV2 reserved character.
pub fn escape_markdown(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(
            c,
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '=' | '|'
                | '{' | '}' | '.' | '!' | '\\'
        ) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// Inside the (...) part of an inline link only ')' and '\' are special.
fn escape_link_url(url: &str) -> String {
    url.replace('\\', "\\\\").replace(')', "\\)")
}

/// Cut to `max` characters, appending "..." when something was dropped.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

/// Remove markdown code fences some models wrap their answer in.
pub fn strip_code_fences(text: &str) -> String {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    match FENCE.get_or_init(|| Regex::new(r"```[A-Za-z]*\n?").ok()) {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

/// One message for one new item.
pub fn format_item(item: &FeedItem, feed_title: &str) -> String {
    let title = item
        .title
        .as_deref()
        .filter(|t| !t.is_empty())
        .unwrap_or("Untitled");
    let description = item
        .summary_text()
        .map(|s| truncate(s.trim(), MAX_DESCRIPTION_CHARS))
        .unwrap_or_else(|| "No summary".to_string());

    let mut message = format!(
        "📰 *{}*\n\n{}\n\n",
        escape_markdown(title),
        escape_markdown(&description)
    );
    if let Some(link) = item.link.as_deref().filter(|l| !l.is_empty()) {
        message.push_str(&format!("🔗 [Read more]({})\n", escape_link_url(link)));
    }
    message.push_str(&format!("📡 Source: {}", escape_markdown(feed_title)));
    message
}

/// One message carrying the generated digest and the list of items it covers.
pub fn format_digest(feed_title: &str, summary: &str, items: &[FeedItem]) -> String {
    let mut message = format!(
        "📊 *{} \\- AI digest*\n\n📖 {} new articles\n\n{}\n\n",
        escape_markdown(feed_title),
        items.len(),
        escape_markdown(&strip_code_fences(summary))
    );

    if !items.is_empty() {
        message.push_str("📑 *Articles:*\n");
        for (i, item) in items.iter().enumerate() {
            let title = escape_markdown(item.title.as_deref().unwrap_or("Untitled"));
            match item.link.as_deref().filter(|l| !l.is_empty()) {
                Some(link) => message.push_str(&format!(
                    "{}\\. [{}]({})\n",
                    i + 1,
                    title,
                    escape_link_url(link)
                )),
                None => message.push_str(&format!("{}\\. {}\n", i + 1, title)),
            }
        }
        message.push('\n');
    }

    message.push_str("_\\[generated automatically\\]_");
    message
}

/// Notice sent once a feed keeps failing.
pub fn format_error_notice(feed: &Feed, error: &str, error_count: u32) -> String {
    format!(
        "⚠️ *Feed error*\n\nFeed: {}\nURL: {}\nError: {}\n\nThis feed has failed {} times in a row\\. Please check that the URL is still valid\\.",
        escape_markdown(feed.title.as_deref().unwrap_or("Unnamed")),
        escape_markdown(&feed.url),
        escape_markdown(error),
        error_count
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(title: &str, link: Option<&str>, snippet: Option<&str>) -> FeedItem {
        FeedItem {
            title: Some(title.to_string()),
            link: link.map(str::to_string),
            snippet: snippet.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(escape_markdown("a.b-c!"), "a\\.b\\-c\\!");
        assert_eq!(escape_markdown("[x](y)"), "\\[x\\]\\(y\\)");
        assert_eq!(escape_markdown("plain text"), "plain text");
    }

    #[test]
    fn truncate_counts_characters_not_bytes() {
        assert_eq!(truncate("héllo", 10), "héllo");
        assert_eq!(truncate("héllo wörld", 5), "héllo...");
        assert_eq!(truncate("日本語のテキスト", 3), "日本語...");
    }

    #[test]
    fn strips_fences() {
        assert_eq!(strip_code_fences("```markdown\nhello\n```"), "hello");
        assert_eq!(strip_code_fences("  no fences  "), "no fences");
    }

    #[test]
    fn item_message_has_title_snippet_link_and_source() {
        let long = "word ".repeat(100);
        let msg = format_item(
            &item("Rust 1.0 released!", Some("https://example.com/a_(b)"), Some(&long)),
            "Example.com",
        );

        assert!(msg.starts_with("📰 *Rust 1\\.0 released\\!*"));
        assert!(msg.contains("🔗 [Read more](https://example.com/a_(b\\))"));
        assert!(msg.ends_with("📡 Source: Example\\.com"));
        assert!(msg.contains("\\.\\.\\."));
    }

    #[test]
    fn item_without_link_or_snippet() {
        let msg = format_item(&item("Bare", None, None), "Feed");
        assert!(msg.contains("No summary"));
        assert!(!msg.contains("Read more"));
    }

    #[test]
    fn digest_lists_every_item() {
        let items = vec![
            item("One", Some("https://e.com/1"), None),
            item("Two", None, None),
        ];
        let msg = format_digest("My Feed", "```\nSummary text.\n```", &items);

        assert!(msg.starts_with("📊 *My Feed \\- AI digest*"));
        assert!(msg.contains("📖 2 new articles"));
        assert!(msg.contains("Summary text\\."));
        assert!(!msg.contains("```"));
        assert!(msg.contains("1\\. [One](https://e.com/1)\n"));
        assert!(msg.contains("2\\. Two\n"));
    }

    #[test]
    fn error_notice_mentions_feed_and_count() {
        let feed = Feed {
            id: 1,
            url: "https://example.com/feed.xml".to_string(),
            title: None,
            last_check: None,
            error_count: 3,
            digest_enabled: false,
            created_at: Utc::now(),
        };
        let msg = format_error_notice(&feed, "request timed out", 3);

        assert!(msg.contains("Feed: Unnamed"));
        assert!(msg.contains("https://example\\.com/feed\\.xml"));
        assert!(msg.contains("failed 3 times in a row"));
    }
}

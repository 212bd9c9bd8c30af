use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Link, Text};
use feed_rs::parser;
use reqwest::Client;

use crate::error::{FetchError, Result};

use super::{FeedItem, FeedSource, ParsedFeed};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; rss-relay/1.0)";

pub struct FeedFetcher {
    client: Client,
}

impl FeedFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self { client })
    }
}

#[async_trait]
impl FeedSource for FeedFetcher {
    async fn fetch(&self, url: &str) -> std::result::Result<ParsedFeed, FetchError> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let bytes = response.bytes().await?;
        parse_feed(&bytes)
    }
}

// Entries without a provider id get an empty one instead of a generated
// hash, so identity can fall back to link and title.
fn no_generated_id(_links: &[Link], _title: &Option<Text>, _uri: Option<&str>) -> String {
    String::new()
}

/// Parse an RSS/Atom/JSON feed document.
pub fn parse_feed(bytes: &[u8]) -> std::result::Result<ParsedFeed, FetchError> {
    let parser = parser::Builder::new().id_generator(no_generated_id).build();
    let feed = parser.parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            // Try content first, then fall back to summary
            let content = entry
                .content
                .and_then(|c| c.body)
                .or_else(|| entry.summary.map(|s| s.content))
                .filter(|c| !c.trim().is_empty());

            let snippet = content.as_deref().and_then(to_plain_text);

            FeedItem {
                guid: Some(entry.id).filter(|id| !id.trim().is_empty()),
                link: entry
                    .links
                    .into_iter()
                    .next()
                    .map(|l| l.href)
                    .filter(|href| !href.is_empty()),
                title: entry
                    .title
                    .map(|t| t.content.trim().to_string())
                    .filter(|t| !t.is_empty()),
                published_at: entry.published.or(entry.updated),
                content,
                snippet,
            }
        })
        .collect();

    Ok(ParsedFeed {
        title: feed
            .title
            .map(|t| t.content.trim().to_string())
            .filter(|t| !t.is_empty()),
        items,
    })
}

fn to_plain_text(html: &str) -> Option<String> {
    let text = html2text::from_read(html.as_bytes(), 200).ok()?;
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!collapsed.is_empty()).then_some(collapsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Example News</title>
    <link>https://example.com</link>
    <description>News</description>
    <item>
      <title>With guid</title>
      <guid>urn:example:1</guid>
      <link>https://example.com/1</link>
      <description>&lt;p&gt;Hello &lt;b&gt;world&lt;/b&gt;&lt;/p&gt;</description>
      <pubDate>Tue, 10 Jun 2025 04:00:00 GMT</pubDate>
    </item>
    <item>
      <title>Link only</title>
      <link>https://example.com/2</link>
    </item>
    <item>
      <title>Title only</title>
    </item>
  </channel>
</rss>"#;

    #[test]
    fn parses_title_and_items_in_document_order() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(feed.title.as_deref(), Some("Example News"));
        let titles: Vec<_> = feed.items.iter().filter_map(|i| i.title.as_deref()).collect();
        assert_eq!(titles, vec!["With guid", "Link only", "Title only"]);
    }

    #[test]
    fn missing_guid_falls_back_to_link_then_title() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();

        assert_eq!(feed.items[0].identity(), Some("urn:example:1"));
        assert_eq!(feed.items[1].guid, None);
        assert_eq!(feed.items[1].identity(), Some("https://example.com/2"));
        assert_eq!(feed.items[2].identity(), Some("Title only"));
    }

    #[test]
    fn html_description_becomes_plain_snippet() {
        let feed = parse_feed(RSS.as_bytes()).unwrap();
        let first = &feed.items[0];

        let snippet = first.snippet.as_deref().unwrap();
        assert!(snippet.contains("Hello"));
        assert!(snippet.contains("world"));
        assert!(!snippet.contains("<p>"));
        assert!(first.published_at.is_some());
        assert!(feed.items[1].snippet.is_none());
    }

    #[test]
    fn garbage_is_malformed() {
        let result = parse_feed(b"this is not a feed");
        assert!(matches!(result, Err(FetchError::Malformed(_))));
    }
}

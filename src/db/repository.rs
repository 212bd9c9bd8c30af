use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    Article, Feed, FilterKind, FilterRule, NewArticle, ProviderUsage, UsageRecord,
};

use super::schema::SCHEMA;

const FEED_COLUMNS: &str =
    "id, url, title, last_check, error_count, digest_enabled, created_at";

/// Durable storage for feeds, seen items, filter rules, settings and
/// summarizer usage. All writes go through the single connection owned by
/// `tokio_rusqlite`, so they are serialized.
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Feed operations

    pub async fn add_feed(&self, url: &str, title: Option<String>) -> Result<i64> {
        let url = url.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO feeds (url, title) VALUES (?1, ?2)",
                    params![url, title],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Removes a feed together with its items and filter rules.
    pub async fn remove_feed(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM feeds WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(removed)
    }

    pub async fn get_feed(&self, id: i64) -> Result<Option<Feed>> {
        let feed = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM feeds WHERE id = ?1",
                    FEED_COLUMNS
                ))?;
                let feed = stmt.query_row(params![id], feed_from_row).optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let url = url.to_string();
        let feed = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM feeds WHERE url = ?1",
                    FEED_COLUMNS
                ))?;
                let feed = stmt.query_row(params![url], feed_from_row).optional()?;
                Ok(feed)
            })
            .await?;
        Ok(feed)
    }

    pub async fn list_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = self
            .conn
            .call(|conn| {
                let mut stmt =
                    conn.prepare(&format!("SELECT {} FROM feeds ORDER BY id", FEED_COLUMNS))?;
                let feeds = stmt
                    .query_map([], feed_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(feeds)
            })
            .await?;
        Ok(feeds)
    }

    /// Unconditional rename, used for user-assigned titles.
    pub async fn set_title(&self, id: i64, title: &str) -> Result<bool> {
        let title = title.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE feeds SET title = ?1 WHERE id = ?2",
                    params![title, id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(updated)
    }

    /// Sets the title only while it is still NULL. Returns whether a row changed.
    pub async fn set_title_if_unset(&self, id: i64, title: &str) -> Result<bool> {
        let title = title.to_string();
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE feeds SET title = ?1 WHERE id = ?2 AND title IS NULL",
                    params![title, id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(updated)
    }

    pub async fn set_last_check(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET last_check = ?1 WHERE id = ?2",
                    params![at.timestamp(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_error_count(&self, id: i64, count: u32) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE feeds SET error_count = ?1 WHERE id = ?2",
                    params![count, id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn set_digest_enabled(&self, id: i64, enabled: bool) -> Result<bool> {
        let updated = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "UPDATE feeds SET digest_enabled = ?1 WHERE id = ?2",
                    params![enabled, id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(updated)
    }

    // Article operations

    pub async fn item_exists(&self, feed_id: i64, guid: &str) -> Result<bool> {
        let guid = guid.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM articles WHERE feed_id = ?1 AND guid = ?2 LIMIT 1",
                        params![feed_id, guid],
                        |_| Ok(()),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;
        Ok(exists)
    }

    /// Inserts an item unless `(feed_id, guid)` is already stored. Returns
    /// whether a row was written.
    pub async fn add_item(&self, article: NewArticle) -> Result<bool> {
        let inserted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"INSERT OR IGNORE INTO articles (feed_id, guid, title, link, published_at)
                       VALUES (?1, ?2, ?3, ?4, ?5)"#,
                    params![
                        article.feed_id,
                        article.guid,
                        article.title,
                        article.link,
                        article.published_at.timestamp(),
                    ],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(inserted)
    }

    /// Newest items of a feed first.
    pub async fn list_items(&self, feed_id: i64, limit: u32) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, feed_id, guid, title, link, published_at, created_at
                       FROM articles
                       WHERE feed_id = ?1
                       ORDER BY published_at DESC, id DESC
                       LIMIT ?2"#,
                )?;
                let articles = stmt
                    .query_map(params![feed_id, limit], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn count_items(&self) -> Result<u64> {
        let count = self
            .conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    pub async fn count_items_for_feed(&self, feed_id: i64) -> Result<u64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE feed_id = ?1",
                    params![feed_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Deletes items published strictly before `cutoff`, across all feeds.
    pub async fn delete_items_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM articles WHERE published_at < ?1",
                    params![cutoff.timestamp()],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }

    /// Keeps the `keep` most recently published items of every feed and
    /// deletes the rest in a single statement.
    pub async fn delete_items_beyond_count_per_source(&self, keep: u32) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    r#"DELETE FROM articles WHERE id IN (
                           SELECT id FROM (
                               SELECT id, ROW_NUMBER() OVER (
                                   PARTITION BY feed_id
                                   ORDER BY published_at DESC, id DESC
                               ) AS rn
                               FROM articles
                           )
                           WHERE rn > ?1
                       )"#,
                    params![keep],
                )?;
                Ok(n)
            })
            .await?;
        Ok(deleted)
    }

    // Filter operations

    pub async fn add_filter(&self, feed_id: i64, kind: FilterKind, keyword: &str) -> Result<i64> {
        let keyword = keyword.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO filters (feed_id, kind, keyword) VALUES (?1, ?2, ?3)",
                    params![feed_id, kind.as_str(), keyword],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    pub async fn remove_filter(&self, id: i64) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute("DELETE FROM filters WHERE id = ?1", params![id])?;
                Ok(n > 0)
            })
            .await?;
        Ok(removed)
    }

    pub async fn get_filter(&self, id: i64) -> Result<Option<FilterRule>> {
        let rule = self
            .conn
            .call(move |conn| {
                let rule = conn
                    .query_row(
                        "SELECT id, feed_id, kind, keyword, created_at FROM filters WHERE id = ?1",
                        params![id],
                        filter_from_row,
                    )
                    .optional()?;
                Ok(rule)
            })
            .await?;
        Ok(rule)
    }

    pub async fn list_filters(&self, feed_id: i64) -> Result<Vec<FilterRule>> {
        let rules = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, feed_id, kind, keyword, created_at FROM filters WHERE feed_id = ?1 ORDER BY id",
                )?;
                let rules = stmt
                    .query_map(params![feed_id], filter_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rules)
            })
            .await?;
        Ok(rules)
    }

    pub async fn list_all_filters(&self) -> Result<Vec<FilterRule>> {
        let rules = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, feed_id, kind, keyword, created_at FROM filters ORDER BY feed_id, id",
                )?;
                let rules = stmt
                    .query_map([], filter_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rules)
            })
            .await?;
        Ok(rules)
    }

    // Settings

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT OR REPLACE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Writes a setting only if the key is absent.
    pub async fn seed_setting(&self, key: &str, value: &str) -> Result<bool> {
        let key = key.to_string();
        let value = value.to_string();
        let inserted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT OR IGNORE INTO settings (key, value) VALUES (?1, ?2)",
                    params![key, value],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(inserted)
    }

    // Summarizer usage

    pub async fn record_usage(&self, usage: UsageRecord) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO ai_usage_stats
                       (provider, model, input_tokens, output_tokens, total_tokens, estimated_cost, currency, article_count)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    params![
                        usage.provider,
                        usage.model,
                        usage.input_tokens as i64,
                        usage.output_tokens as i64,
                        usage.total_tokens as i64,
                        usage.estimated_cost,
                        usage.currency,
                        usage.article_count,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn usage_summary(&self, since: DateTime<Utc>) -> Result<Vec<ProviderUsage>> {
        let summary = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT provider,
                              COUNT(*),
                              SUM(input_tokens),
                              SUM(output_tokens),
                              SUM(total_tokens),
                              SUM(estimated_cost),
                              SUM(article_count)
                       FROM ai_usage_stats
                       WHERE created_at >= ?1
                       GROUP BY provider
                       ORDER BY provider"#,
                )?;
                let rows = stmt
                    .query_map(params![since.timestamp()], |row| {
                        Ok(ProviderUsage {
                            provider: row.get(0)?,
                            call_count: row.get::<_, i64>(1)?.max(0) as u64,
                            input_tokens: row.get::<_, i64>(2)?.max(0) as u64,
                            output_tokens: row.get::<_, i64>(3)?.max(0) as u64,
                            total_tokens: row.get::<_, i64>(4)?.max(0) as u64,
                            estimated_cost: row.get(5)?,
                            article_count: row.get::<_, i64>(6)?.max(0) as u64,
                            since,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(summary)
    }
}

fn from_unix(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_default()
}

fn feed_from_row(row: &Row) -> rusqlite::Result<Feed> {
    Ok(Feed {
        id: row.get(0)?,
        url: row.get(1)?,
        title: row.get(2)?,
        last_check: row.get::<_, Option<i64>>(3)?.map(from_unix),
        error_count: row.get::<_, i64>(4)?.max(0) as u32,
        digest_enabled: row.get::<_, i64>(5)? != 0,
        created_at: from_unix(row.get(6)?),
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        guid: row.get(2)?,
        title: row.get(3)?,
        link: row.get(4)?,
        published_at: from_unix(row.get(5)?),
        created_at: from_unix(row.get(6)?),
    })
}

fn filter_from_row(row: &Row) -> rusqlite::Result<FilterRule> {
    let kind: String = row.get(2)?;
    let kind = match kind.as_str() {
        "exclude" => FilterKind::Exclude,
        _ => FilterKind::Include,
    };
    Ok(FilterRule {
        id: row.get(0)?,
        feed_id: row.get(1)?,
        kind,
        keyword: row.get(3)?,
        created_at: from_unix(row.get(4)?),
    })
}

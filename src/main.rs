mod ai;
mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod pipeline;
mod services;
mod settings;
#[cfg(test)]
mod testing;

use app::Relay;
use config::Config;
use error::{AppError, Result};
use models::FilterKind;

const USAGE: &str = "\
Usage: rss-relay [COMMAND]

Without a command the relay runs until interrupted.

Commands:
  --once                               Check every feed once and exit
  --cleanup                            Apply retention once and exit
  --add <url>                          Subscribe to a feed
  --remove <id>                        Unsubscribe, dropping its items and filters
  --list                               List feeds
  --items <id> [limit]                 Show a feed's most recent stored items
  --rename <id> <title>                Set a feed's display title
  --digest <id> on|off                 Toggle digest delivery for a feed
  --filter <id> include|exclude <kw>   Add a keyword filter to a feed
  --unfilter <filter-id>               Remove a filter
  --filters                            List filters
  --set <key> <value>                  Change a runtime setting
  --stats                              Show counts, settings and AI usage
  --help                               Show this help";

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();

    if let Err(e) = run(&args).await {
        tracing::error!("{}", e);
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: &[String]) -> Result<()> {
    let command: Vec<&str> = args.iter().map(String::as_str).collect();

    if matches!(command.as_slice(), ["--help"] | ["-h"]) {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = Config::load()?;
    let relay = Relay::new(&config).await?;

    match command.as_slice() {
        [] => relay.run().await?,

        ["--once"] => {
            let report = relay.check_all().await?;
            println!(
                "Checked {} feeds ({} failed), {} new items",
                report.checked, report.failed, report.new_items
            );
        }

        ["--cleanup"] => {
            let report = relay.run_retention().await?;
            println!(
                "Removed {} items ({} by age, {} by count)",
                report.total(),
                report.by_age,
                report.by_count
            );
        }

        ["--add", url] => {
            let feed = relay.add_source(url).await?;
            println!("Added #{} {}", feed.id, feed.display_title());
        }

        ["--remove", id] => {
            let feed = relay.remove_source(parse_id(id)?).await?;
            println!("Removed #{} {}", feed.id, feed.display_title());
        }

        ["--list"] => {
            let feeds = relay.list_sources().await?;
            if feeds.is_empty() {
                println!("No feeds yet, add one with --add <url>");
            }
            for (feed, items) in feeds {
                let checked = feed
                    .last_check
                    .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "#{:<4} {}\n      {}\n      {} items, checked {}, errors {}, digest {}",
                    feed.id,
                    feed.display_title(),
                    feed.url,
                    items,
                    checked,
                    feed.error_count,
                    if feed.digest_enabled { "on" } else { "off" }
                );
            }
        }

        ["--items", id, rest @ ..] if rest.len() <= 1 => {
            let limit = match rest.first() {
                Some(raw) => raw
                    .parse()
                    .map_err(|_| AppError::InvalidInput(format!("{:?} is not a limit", raw)))?,
                None => 10,
            };
            for article in relay.recent_items(parse_id(id)?, limit).await? {
                println!(
                    "{}  {}\n            {}",
                    article.published_at.format("%Y-%m-%d"),
                    article.title.as_deref().unwrap_or("Untitled"),
                    article.link.as_deref().unwrap_or(&article.guid)
                );
            }
        }

        ["--rename", id, title @ ..] if !title.is_empty() => {
            relay.rename_source(parse_id(id)?, &title.join(" ")).await?;
            println!("Renamed #{}", id);
        }

        ["--digest", id, state] => {
            let enabled = match *state {
                "on" => true,
                "off" => false,
                other => {
                    return Err(AppError::InvalidInput(format!(
                        "expected on or off, got {:?}",
                        other
                    )))
                }
            };
            relay.set_digest(parse_id(id)?, enabled).await?;
            println!("Digest {} for #{}", state, id);
        }

        ["--filter", id, kind, keyword @ ..] if !keyword.is_empty() => {
            let kind: FilterKind = kind.parse()?;
            let filter_id = relay
                .add_filter(parse_id(id)?, kind, &keyword.join(" "))
                .await?;
            println!("Added filter #{}", filter_id);
        }

        ["--unfilter", id] => {
            let rule = relay.remove_filter(parse_id(id)?).await?;
            println!("Removed {} filter {:?} from feed #{}", rule.kind, rule.keyword, rule.feed_id);
        }

        ["--filters"] => {
            let filters = relay.list_filters().await?;
            if filters.is_empty() {
                println!("No filters");
            }
            for rule in filters {
                println!(
                    "#{:<4} feed #{:<4} {:<7} {}",
                    rule.id, rule.feed_id, rule.kind, rule.keyword
                );
            }
        }

        ["--set", key, value @ ..] if !value.is_empty() => {
            relay.set_setting(key, &value.join(" ")).await?;
            println!("{} updated", key);
        }

        ["--stats"] => println!("{}", relay.stats().await?),

        _ => {
            return Err(AppError::InvalidInput(format!(
                "unrecognised arguments: {}\n\n{}",
                args.join(" "),
                USAGE
            )))
        }
    }

    Ok(())
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| AppError::InvalidInput(format!("{:?} is not an id", raw)))
}

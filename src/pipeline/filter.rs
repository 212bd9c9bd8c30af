use crate::feed::FeedItem;
use crate::models::{FilterKind, FilterRule};

/// Whether an item passes a feed's keyword rules.
///
/// Matching is case-insensitive substring containment over the title and
/// snippet. Any matching exclude rule rejects the item, whatever the include
/// rules say. When include rules exist, at least one must match. No rules
/// accepts everything. Blank keywords are ignored.
pub fn matches(rules: &[FilterRule], item: &FeedItem) -> bool {
    if rules.is_empty() {
        return true;
    }

    let text = format!(
        "{} {}",
        item.title.as_deref().unwrap_or_default(),
        item.summary_text().unwrap_or_default()
    )
    .to_lowercase();

    let keywords = |kind: FilterKind| {
        rules
            .iter()
            .filter(move |r| r.kind == kind)
            .map(|r| r.keyword.trim().to_lowercase())
            .filter(|k| !k.is_empty())
    };

    if keywords(FilterKind::Exclude).any(|k| text.contains(&k)) {
        return false;
    }

    let mut includes = keywords(FilterKind::Include).peekable();
    if includes.peek().is_none() {
        return true;
    }
    includes.any(|k| text.contains(&k))
}

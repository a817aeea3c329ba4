use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Text format of `created_at` as written by sqlite's
/// `strftime('%Y-%m-%dT%H:%M:%fZ', 'now')`. Lexicographic order equals
/// chronological order, so the count queries compare strings directly.
pub const STORED_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    pub id: String,
    pub url: String,
    pub title: String,
    pub owner: String,
    pub created_at: String,
}

impl Bookmark {
    /// Hostname of the bookmarked URL with a leading `www.` stripped,
    /// `None` when the URL carries no host.
    pub fn hostname(&self) -> Option<String> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let host = parsed.host_str()?;
        Some(host.strip_prefix("www.").unwrap_or(host).to_string())
    }

    /// Favicon lookup URL via the google s2 icon service. Purely cosmetic;
    /// callers fall back to a placeholder glyph on `None`.
    pub fn favicon_url(&self) -> Option<String> {
        let host = self.hostname()?;
        Some(format!(
            "https://www.google.com/s2/favicons?domain={}&sz=128",
            host
        ))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BookmarkStats {
    pub total: i64,
    pub today: i64,
    pub this_week: i64,
}

/// Lower bounds for the `today` and `this_week` counts, both rendered in
/// the stored UTC text format.
#[derive(Debug, Clone)]
pub struct StatsWindow {
    pub today_start: String,
    pub week_start: String,
}

impl StatsWindow {
    pub fn current() -> Self {
        Self::for_date(Local::now().date_naive())
    }

    /// `today` starts at local midnight of `today`; `this_week` at local
    /// midnight seven days earlier.
    pub fn for_date(today: NaiveDate) -> Self {
        StatsWindow {
            today_start: local_to_stored(today.and_time(NaiveTime::MIN)),
            week_start: local_to_stored(
                (today - chrono::Duration::days(7)).and_time(NaiveTime::MIN),
            ),
        }
    }
}

/// Renders a naive local date-time in the stored UTC text format.
pub fn local_to_stored(naive: NaiveDateTime) -> String {
    let utc = match naive.and_local_timezone(Local).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // DST gap, read the wall-clock time as UTC instead
        None => Utc.from_utc_datetime(&naive),
    };
    utc.format(STORED_TIMESTAMP_FORMAT).to_string()
}

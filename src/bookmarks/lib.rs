use anyhow::Result;
use libsql::Connection;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BokmerkeError;
use crate::model::{Bookmark, BookmarkStats, StatsWindow};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookmark {
    pub url: String,
    pub title: String,
}

/// Rejects input that is not a syntactically valid URL with a host.
/// Validation happens before the insert is issued, field-level.
pub fn validate_url(raw: &str) -> Result<(), BokmerkeError> {
    match url::Url::parse(raw) {
        Ok(parsed) if parsed.has_host() => Ok(()),
        _ => Err(BokmerkeError::InvalidUrl(raw.to_string())),
    }
}

pub struct Bookmarks<'a> {
    conn: &'a Connection,
}

impl<'a> Bookmarks<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Inserts a bookmark for `owner`. The id is generated here and
    /// `created_at` is stamped by the database; neither is client-supplied.
    pub async fn create(&self, owner: &str, input: CreateBookmark) -> Result<Bookmark> {
        let id = Uuid::new_v4().to_string();
        let query = r#"
            INSERT INTO bookmarks (id, url, title, owner)
            VALUES (?, ?, ?, ?)
            RETURNING id, url, title, owner, created_at
        "#;

        let mut rows = self
            .conn
            .query(query, libsql::params![id, input.url, input.title, owner])
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Self::row_to_bookmark(&row)?)
        } else {
            anyhow::bail!("Failed to create bookmark")
        }
    }

    pub async fn get(&self, id: &str) -> Result<Option<Bookmark>> {
        let query = r#"
            SELECT id, url, title, owner, created_at
            FROM bookmarks WHERE id = ?
        "#;

        let mut rows = self.conn.query(query, libsql::params![id]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_bookmark(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list_for_owner(&self, owner: &str) -> Result<Vec<Bookmark>> {
        let query = r#"
            SELECT id, url, title, owner, created_at
            FROM bookmarks
            WHERE owner = ?
            ORDER BY created_at DESC
        "#;

        let mut rows = self.conn.query(query, libsql::params![owner]).await?;
        let mut bookmarks = Vec::new();

        while let Some(row) = rows.next().await? {
            bookmarks.push(Self::row_to_bookmark(&row)?);
        }

        Ok(bookmarks)
    }

    /// Deletes the record only when both id and owner match, returning the
    /// deleted record. A row belonging to someone else behaves as absent.
    /// Single statement, so concurrent deletes of the same id resolve to
    /// exactly one returned record.
    pub async fn delete(&self, owner: &str, id: &str) -> Result<Option<Bookmark>> {
        let query = r#"
            DELETE FROM bookmarks WHERE id = ? AND owner = ?
            RETURNING id, url, title, owner, created_at
        "#;

        let mut rows = self.conn.query(query, libsql::params![id, owner]).await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_bookmark(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn count_for_owner(&self, owner: &str, since: Option<&str>) -> Result<i64> {
        let mut rows = if let Some(since) = since {
            self.conn
                .query(
                    "SELECT COUNT(*) FROM bookmarks WHERE owner = ? AND created_at >= ?",
                    libsql::params![owner, since],
                )
                .await?
        } else {
            self.conn
                .query(
                    "SELECT COUNT(*) FROM bookmarks WHERE owner = ?",
                    libsql::params![owner],
                )
                .await?
        };

        if let Some(row) = rows.next().await? {
            Ok(row.get(0)?)
        } else {
            Ok(0)
        }
    }

    /// Always a fresh set of count queries, never an incremental counter,
    /// so the numbers self-correct from any optimistic drift in a client
    /// view.
    pub async fn stats_for_owner(
        &self,
        owner: &str,
        window: &StatsWindow,
    ) -> Result<BookmarkStats> {
        Ok(BookmarkStats {
            total: self.count_for_owner(owner, None).await?,
            today: self.count_for_owner(owner, Some(&window.today_start)).await?,
            this_week: self.count_for_owner(owner, Some(&window.week_start)).await?,
        })
    }

    fn row_to_bookmark(row: &libsql::Row) -> Result<Bookmark> {
        Ok(Bookmark {
            id: row.get(0)?,
            url: row.get(1)?,
            title: row.get(2)?,
            owner: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

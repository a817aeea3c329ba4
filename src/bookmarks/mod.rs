//! Bookmarks Module
//!
//! The record store behind the service: a single owner-scoped table of
//! saved URLs, plus the HTTP surface over it (CRUD, aggregate counts, and
//! the realtime feed endpoints).
//!
//! # Usage
//!
//! ```rust,ignore
//! use bokmerke::bookmarks;
//!
//! // Get the migrations to run
//! for (name, sql) in bookmarks::migrations() {
//!     // Run migration...
//! }
//!
//! // Mount the routes
//! let app = Router::new()
//!     .nest("/bookmarks", bookmarks::routes())
//!     .with_state(app_state);
//!
//! // Use the library directly
//! let lib = bookmarks::Bookmarks::new(connection);
//! let record = lib.create(&session.user_id, input).await?;
//! ```

mod handler;
mod lib;
mod routes;

pub use lib::*;

pub use routes::routes;

/// Returns the migrations for the bookmarks module, run during application
/// startup.
pub fn migrations() -> &'static [(&'static str, &'static str)] {
    &[(
        "bookmarks_001_schema.sql",
        include_str!("migrations/001_schema.sql"),
    )]
}

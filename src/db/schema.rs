//! Database schema and migrations for Stowage.
//!
//! Migrations are applied sequentially when the database is first opened
//! or upgraded.

/// Database migrations.
///
/// Each migration is a SQL script that will be executed in order.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&str] = &[
    // v1: File and folder metadata
    r#"
-- One row per file or folder in a user's storage tree.
-- path and parent are relative to the user's root; parent '' is the root.
CREATE TABLE files (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    username    TEXT NOT NULL,
    name        TEXT NOT NULL,
    path        TEXT NOT NULL,
    parent      TEXT NOT NULL DEFAULT '',
    size        INTEGER NOT NULL DEFAULT 0,
    is_dir      INTEGER NOT NULL DEFAULT 0,
    mime_type   TEXT,
    created_at  TEXT NOT NULL DEFAULT (datetime('now')),
    modified_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE (username, path)
);

CREATE INDEX idx_files_username_parent ON files(username, parent);
"#,
];

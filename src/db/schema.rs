use rusqlite::{params, Connection};

/// Current schema version, stored under `SchemaVersion` in the metadata table.
pub const SCHEMA_VERSION: u32 = 1;

pub const META_SCHEMA_VERSION: &str = "SchemaVersion";
pub const META_LAST_UPDATED: &str = "LastUpdated";

/// Every data table, in an order safe for bulk deletes.
pub const TABLES: &[&str] = &[
  "issue_labels",
  "issue_assignees",
  "pull_request_labels",
  "pull_request_assignees",
  "search_issues",
  "search_pull_requests",
  "search_repositories",
  "search_users",
  "searches",
  "issues",
  "pull_requests",
  "labels",
  "repositories",
  "users",
  "metadata",
];

pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    internal_id  INTEGER NOT NULL UNIQUE,
    login        TEXT NOT NULL,
    avatar_url   TEXT NOT NULL DEFAULT '',
    user_type    TEXT NOT NULL DEFAULT '',
    time_updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS repositories (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    internal_id    INTEGER NOT NULL UNIQUE,
    owner_id       INTEGER NOT NULL,
    name           TEXT NOT NULL,
    description    TEXT NOT NULL DEFAULT '',
    html_url       TEXT NOT NULL DEFAULT '',
    clone_url      TEXT NOT NULL DEFAULT '',
    default_branch TEXT NOT NULL DEFAULT '',
    private        INTEGER NOT NULL DEFAULT 0,
    visibility     TEXT NOT NULL DEFAULT '',
    has_issues     INTEGER NOT NULL DEFAULT 1,
    fork           INTEGER NOT NULL DEFAULT 0,
    time_updated   INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_repositories_owner_name
    ON repositories(owner_id, name);

CREATE TABLE IF NOT EXISTS labels (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    internal_id  INTEGER NOT NULL UNIQUE,
    name         TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    color        TEXT NOT NULL DEFAULT '',
    is_default   INTEGER NOT NULL DEFAULT 0,
    time_updated INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS issues (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    internal_id        INTEGER NOT NULL UNIQUE,
    number             INTEGER NOT NULL,
    repository_id      INTEGER NOT NULL,
    author_id          INTEGER NOT NULL,
    title              TEXT NOT NULL,
    body               TEXT NOT NULL DEFAULT '',
    state              TEXT NOT NULL DEFAULT '',
    html_url           TEXT NOT NULL DEFAULT '',
    time_created       INTEGER NOT NULL,
    time_updated       INTEGER NOT NULL,
    time_closed        INTEGER,
    time_last_observed INTEGER NOT NULL,
    label_ids          TEXT NOT NULL DEFAULT '',
    assignee_ids       TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_issues_repository
    ON issues(repository_id, time_last_observed);

CREATE TABLE IF NOT EXISTS pull_requests (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    internal_id        INTEGER NOT NULL UNIQUE,
    number             INTEGER NOT NULL,
    repository_id      INTEGER NOT NULL,
    author_id          INTEGER NOT NULL,
    title              TEXT NOT NULL,
    body               TEXT NOT NULL DEFAULT '',
    state              TEXT NOT NULL DEFAULT '',
    html_url           TEXT NOT NULL DEFAULT '',
    time_created       INTEGER NOT NULL,
    time_updated       INTEGER NOT NULL,
    time_closed        INTEGER,
    time_merged        INTEGER,
    time_last_observed INTEGER NOT NULL,
    merged             INTEGER NOT NULL DEFAULT 0,
    mergeable          INTEGER NOT NULL DEFAULT 0,
    merge_state        TEXT NOT NULL DEFAULT '',
    head_sha           TEXT NOT NULL DEFAULT '',
    source_branch      TEXT NOT NULL DEFAULT '',
    target_branch      TEXT NOT NULL DEFAULT '',
    draft              INTEGER NOT NULL DEFAULT 0,
    commit_count       INTEGER NOT NULL DEFAULT 0,
    label_ids          TEXT NOT NULL DEFAULT '',
    assignee_ids       TEXT NOT NULL DEFAULT ''
);

CREATE INDEX IF NOT EXISTS idx_pull_requests_repository
    ON pull_requests(repository_id, time_last_observed);

CREATE TABLE IF NOT EXISTS searches (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    query        TEXT NOT NULL,
    kind         INTEGER NOT NULL,
    time_updated INTEGER NOT NULL,
    UNIQUE (name, query, kind)
);

CREATE TABLE IF NOT EXISTS issue_labels (
    issue_id     INTEGER NOT NULL,
    label_id     INTEGER NOT NULL,
    time_updated INTEGER NOT NULL,
    PRIMARY KEY (issue_id, label_id)
);

CREATE TABLE IF NOT EXISTS issue_assignees (
    issue_id     INTEGER NOT NULL,
    user_id      INTEGER NOT NULL,
    time_updated INTEGER NOT NULL,
    PRIMARY KEY (issue_id, user_id)
);

CREATE TABLE IF NOT EXISTS pull_request_labels (
    pull_request_id INTEGER NOT NULL,
    label_id        INTEGER NOT NULL,
    time_updated    INTEGER NOT NULL,
    PRIMARY KEY (pull_request_id, label_id)
);

CREATE TABLE IF NOT EXISTS pull_request_assignees (
    pull_request_id INTEGER NOT NULL,
    user_id         INTEGER NOT NULL,
    time_updated    INTEGER NOT NULL,
    PRIMARY KEY (pull_request_id, user_id)
);

CREATE TABLE IF NOT EXISTS search_issues (
    search_id    INTEGER NOT NULL,
    issue_id     INTEGER NOT NULL,
    time_updated INTEGER NOT NULL,
    PRIMARY KEY (search_id, issue_id)
);

CREATE TABLE IF NOT EXISTS search_pull_requests (
    search_id       INTEGER NOT NULL,
    pull_request_id INTEGER NOT NULL,
    time_updated    INTEGER NOT NULL,
    PRIMARY KEY (search_id, pull_request_id)
);

CREATE TABLE IF NOT EXISTS search_repositories (
    search_id     INTEGER NOT NULL,
    repository_id INTEGER NOT NULL,
    time_updated  INTEGER NOT NULL,
    PRIMARY KEY (search_id, repository_id)
);

CREATE TABLE IF NOT EXISTS search_users (
    search_id    INTEGER NOT NULL,
    user_id      INTEGER NOT NULL,
    time_updated INTEGER NOT NULL,
    PRIMARY KEY (search_id, user_id)
);
"#;

/// Create all tables if they don't exist and seed metadata.
pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
  conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))?;
  conn.execute_batch(SCHEMA)?;
  seed_metadata(conn)
}

/// Insert the bookkeeping rows a fresh (or freshly reset) store expects.
pub fn seed_metadata(conn: &Connection) -> rusqlite::Result<()> {
  conn.execute(
    "INSERT OR IGNORE INTO metadata (key, value) VALUES (?1, ?2)",
    params![META_SCHEMA_VERSION, SCHEMA_VERSION.to_string()],
  )?;
  conn.execute(
    "INSERT OR IGNORE INTO metadata (key, value) VALUES (?1, '0')",
    params![META_LAST_UPDATED],
  )?;
  Ok(())
}

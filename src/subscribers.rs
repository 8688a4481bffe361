use std::path::Path;
use std::sync::{LazyLock, Mutex};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use regex::Regex;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::entitlement::normalize_email;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    Created,
    AlreadySubscribed,
}

static RE_EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

/// `local@domain.tld` checked as given: no whitespace anywhere (padding
/// included), exactly one `@`, a dot inside the domain with text on both sides.
pub fn is_valid_email(raw: &str) -> bool {
    RE_EMAIL.is_match(raw)
}

pub fn open_db(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS subscribers (
            email TEXT PRIMARY KEY,
            subscribed_at TEXT NOT NULL,
            source TEXT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

/// Newsletter sign-ups. One connection behind a mutex; writes are tiny.
#[derive(Debug)]
pub struct SubscriberStore {
    conn: Mutex<Connection>,
}

impl SubscriberStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = open_db(path)?;
        info!(path = %path.display(), "subscriber store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite")?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Store `email` lowercased and trimmed. Subscribing twice is a no-op.
    pub fn subscribe(&self, email: &str, source: Option<&str>) -> Result<SubscribeOutcome> {
        if !is_valid_email(email) {
            return Err(anyhow!("invalid email"));
        }
        let email = normalize_email(email);
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO subscribers (email, subscribed_at, source) VALUES (?1, ?2, ?3)",
                params![email, Utc::now().to_rfc3339(), source],
            )
            .context("insert subscriber")?;
        Ok(if inserted == 0 {
            SubscribeOutcome::AlreadySubscribed
        } else {
            SubscribeOutcome::Created
        })
    }

    pub fn contains(&self, email: &str) -> Result<bool> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let found: Option<String> = conn
            .query_row(
                "SELECT email FROM subscribers WHERE email = ?1",
                params![normalize_email(email)],
                |row| row.get(0),
            )
            .optional()
            .context("lookup subscriber")?;
        Ok(found.is_some())
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let n: i64 = conn
            .query_row("SELECT COUNT(*) FROM subscribers", [], |row| row.get(0))
            .context("count subscribers")?;
        Ok(n.max(0) as usize)
    }
}

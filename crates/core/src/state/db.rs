//! # Scribe Database
//!
//! SQLite store at `.scribe/scribe.db` for conversations awaiting outline
//! feedback and for editable prompt templates.

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::skills::prompts;
use crate::state::io;
use crate::state::run_state::ChatTurn;

/// Schema version for migrations
const SCHEMA_VERSION: i32 = 1;

/// A stored conversation
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub conversation: Vec<ChatTurn>,
    pub status: String,
    pub updated_at: String,
}

pub struct SessionDb {
    conn: Arc<Mutex<Connection>>,
}

impl SessionDb {
    /// Open or create the database in the runtime directory
    pub fn open() -> Result<Self> {
        Self::open_at(io::get_runtime_path().join("scribe.db"))
    }

    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path.as_ref()).context("Failed to open scribe database")?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        if current_version < 1 {
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS sessions (
                    id TEXT PRIMARY KEY,
                    conversation_json TEXT NOT NULL DEFAULT '[]',
                    status TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                [],
            )?;
            conn.execute(
                r#"
                CREATE TABLE IF NOT EXISTS prompt_templates (
                    slug TEXT PRIMARY KEY,
                    version INTEGER NOT NULL DEFAULT 1,
                    content TEXT NOT NULL,
                    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
                )
                "#,
                [],
            )?;
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                [SCHEMA_VERSION],
            )?;
        }

        Ok(())
    }

    pub fn schema_version(&self) -> Result<i32> {
        let conn = self.lock()?;
        Ok(conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?)
    }

    // === Sessions ===

    pub fn save_session(&self, id: &str, conversation: &[ChatTurn], status: &str) -> Result<()> {
        let json = serde_json::to_string(conversation)?;
        let conn = self.lock()?;
        conn.execute(
            r#"
            INSERT INTO sessions (id, conversation_json, status, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                conversation_json = excluded.conversation_json,
                status = excluded.status,
                updated_at = excluded.updated_at
            "#,
            params![id, json, status, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn load_session(&self, id: &str) -> Result<Option<SessionRecord>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, conversation_json, status, updated_at FROM sessions WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(id, json, status, updated_at)| {
            let conversation = serde_json::from_str(&json)
                .with_context(|| format!("Corrupt conversation for session '{}'", id))?;
            Ok(SessionRecord {
                id,
                conversation,
                status,
                updated_at,
            })
        })
        .transpose()
    }

    pub fn delete_session(&self, id: &str) -> Result<bool> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM sessions WHERE id = ?1", params![id])? > 0)
    }

    pub fn list_sessions(&self) -> Result<Vec<(String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT id, status FROM sessions ORDER BY updated_at DESC")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }

    // === Prompt templates ===

    /// Seed default prompts if the table is empty
    pub fn seed_prompts(&self) -> Result<usize> {
        let conn = self.lock()?;

        let count: i64 = conn.query_row("SELECT COUNT(*) FROM prompt_templates", [], |row| {
            row.get(0)
        })?;
        if count > 0 {
            tracing::debug!("Prompts already seeded ({} found)", count);
            return Ok(0);
        }

        let mut inserted = 0;
        for (slug, content) in prompts::all_defaults() {
            conn.execute(
                "INSERT INTO prompt_templates (slug, version, content) VALUES (?1, 1, ?2)",
                params![slug, content],
            )?;
            inserted += 1;
        }

        tracing::info!("Seeded {} default prompts", inserted);
        Ok(inserted)
    }

    pub fn get_prompt(&self, slug: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Ok(conn
            .query_row(
                "SELECT content FROM prompt_templates WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Update a prompt (increments version automatically)
    pub fn set_prompt(&self, slug: &str, content: &str) -> Result<i32> {
        let conn = self.lock()?;
        let current_version: i32 = conn
            .query_row(
                "SELECT version FROM prompt_templates WHERE slug = ?1",
                params![slug],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        let new_version = current_version + 1;
        conn.execute(
            r#"
            INSERT INTO prompt_templates (slug, version, content, updated_at)
            VALUES (?1, ?2, ?3, datetime('now'))
            ON CONFLICT(slug) DO UPDATE SET
                version = excluded.version,
                content = excluded.content,
                updated_at = excluded.updated_at
            "#,
            params![slug, new_version, content],
        )?;

        tracing::debug!("Updated prompt '{}' to version {}", slug, new_version);
        Ok(new_version)
    }

    pub fn list_prompts(&self) -> Result<Vec<(String, i32)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT slug, version FROM prompt_templates ORDER BY slug")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut prompts = Vec::new();
        for row in rows {
            prompts.push(row?);
        }
        Ok(prompts)
    }
}

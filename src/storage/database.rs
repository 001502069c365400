//! SQLite database management with migrations
//!
//! Structured storage for users, roles, document metadata, and the
//! append-only access audit log.

use crate::auth::UserContext;
use crate::error::{Result, SibylError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SibylError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);

        let pool = Pool::builder()
            .max_size(16)
            .build(manager)
            .map_err(|e| SibylError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| SibylError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL keeps the API server's readers off the ingest writer's back
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// In-memory database for tests
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| SibylError::Config(format!("Failed to create connection pool: {}", e)))?;
        let db = Self { pool };
        db.migrate()?;
        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| SibylError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Insert the canonical roles if missing; returns how many were created
    pub fn seed_roles(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let mut created = 0;

        for name in crate::retrieval::ALL_ROLES {
            created += conn.execute(
                "INSERT OR IGNORE INTO roles (role_name) VALUES (?1)",
                params![name],
            )?;
        }

        Ok(created)
    }

    /// Register a user and attach roles; existing users are left untouched
    pub fn create_user(
        &self,
        user_id: &str,
        email: &str,
        department: &str,
        roles: &[String],
    ) -> Result<bool> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO users (user_id, email, department, created_at)
             VALUES (?1, ?2, ?3, datetime('now'))",
            params![user_id, email, department],
        )?;

        if inserted == 0 {
            return Ok(false);
        }

        for role in roles {
            let role_id: Option<i64> = tx
                .query_row(
                    "SELECT role_id FROM roles WHERE role_name = ?1",
                    params![role],
                    |row| row.get(0),
                )
                .optional()?;

            match role_id {
                Some(role_id) => {
                    tx.execute(
                        "INSERT OR IGNORE INTO user_roles (user_id, role_id) VALUES (?1, ?2)",
                        params![user_id, role_id],
                    )?;
                }
                None => {
                    tracing::warn!("Skipping unknown role '{}' for user {}", role, user_id);
                }
            }
        }

        tx.commit()?;
        Ok(true)
    }

    /// Look up a user's context by id
    pub fn get_user_context(&self, user_id: &str) -> Result<Option<UserContext>> {
        let conn = self.get_conn()?;

        let user: Option<(String, String, String)> = conn
            .query_row(
                "SELECT user_id, email, department FROM users WHERE user_id = ?1",
                params![user_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((user_id, email, department)) = user else {
            return Ok(None);
        };

        let roles = self.roles_for(&conn, &user_id)?;

        Ok(Some(UserContext {
            user_id,
            email,
            department,
            roles,
        }))
    }

    /// Look up a user's context by email (login path)
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserContext>> {
        let conn = self.get_conn()?;

        let user_id: Option<String> = conn
            .query_row(
                "SELECT user_id FROM users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .optional()?;

        match user_id {
            Some(id) => self.get_user_context(&id),
            None => Ok(None),
        }
    }

    fn roles_for(
        &self,
        conn: &rusqlite::Connection,
        user_id: &str,
    ) -> Result<Vec<String>> {
        let mut stmt = conn.prepare(
            "SELECT r.role_name FROM roles r
             JOIN user_roles ur ON ur.role_id = r.role_id
             WHERE ur.user_id = ?1
             ORDER BY r.role_id",
        )?;

        let roles = stmt
            .query_map(params![user_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(roles)
    }

    /// Store document metadata; a title already present reuses its doc_id so
    /// re-ingestion replaces rather than duplicates
    pub fn upsert_document(
        &self,
        title: &str,
        department: &str,
        classification: &str,
        file_path: &str,
    ) -> Result<(String, bool)> {
        let conn = self.get_conn()?;

        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM documents WHERE title = ?1",
                params![title],
                |row| row.get(0),
            )
            .optional()?;

        if let Some(doc_id) = existing {
            return Ok((doc_id, true));
        }

        let doc_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO documents (id, title, department, classification, file_path, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))",
            params![doc_id, title, department, classification, file_path],
        )?;

        Ok((doc_id, false))
    }

    /// Append a search event to the audit log
    pub fn log_search(
        &self,
        user_id: &str,
        query_text: &str,
        doc_ids: &[String],
        allowed: bool,
    ) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "INSERT INTO access_audit_log (user_id, query_text, doc_ids, timestamp, allowed)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                query_text,
                doc_ids.join(","),
                chrono::Utc::now().to_rfc3339(),
                allowed,
            ],
        )?;

        Ok(())
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats> {
        let conn = self.get_conn()?;

        let user_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

        let document_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))?;

        let audit_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM access_audit_log", [], |row| row.get(0))?;

        Ok(DbStats {
            user_count: user_count as usize,
            document_count: document_count as usize,
            audit_count: audit_count as usize,
        })
    }
}

/// Database statistics
#[derive(Debug)]
pub struct DbStats {
    pub user_count: usize,
    pub document_count: usize,
    pub audit_count: usize,
}

/// Numbered migrations; append, never edit
const MIGRATIONS: &[&str] = &[
    // v1: identity and role tables
    "
    CREATE TABLE users (
        user_id TEXT PRIMARY KEY,
        email TEXT NOT NULL UNIQUE,
        department TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE roles (
        role_id INTEGER PRIMARY KEY AUTOINCREMENT,
        role_name TEXT NOT NULL UNIQUE
    );

    CREATE TABLE user_roles (
        user_id TEXT NOT NULL REFERENCES users(user_id),
        role_id INTEGER NOT NULL REFERENCES roles(role_id),
        PRIMARY KEY (user_id, role_id)
    );
    ",
    // v2: document metadata
    "
    CREATE TABLE documents (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        department TEXT NOT NULL,
        classification TEXT NOT NULL,
        file_path TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE INDEX idx_documents_title ON documents(title);
    ",
    // v3: append-only audit log
    "
    CREATE TABLE access_audit_log (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id TEXT NOT NULL,
        query_text TEXT,
        doc_ids TEXT,
        timestamp TEXT NOT NULL,
        allowed INTEGER NOT NULL DEFAULT 1
    );
    ",
];

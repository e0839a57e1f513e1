//! libSQL backend — async `LeadStore` implementation.
//!
//! Supports local file and in-memory databases. Tables are created with
//! `CREATE TABLE IF NOT EXISTS` on open.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::lead::{LeadFields, LeadRecord};
use crate::store::traits::{ConversationTurnRecord, LeadStore};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS conversations (
        id TEXT PRIMARY KEY,
        user_id TEXT,
        conversation_id TEXT NOT NULL,
        user_msg TEXT NOT NULL,
        bot_msg TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_conversations_conversation_id
        ON conversations(conversation_id, created_at);

    CREATE TABLE IF NOT EXISTS lead_summaries (
        conversation_id TEXT PRIMARY KEY,
        user_id TEXT,
        name TEXT,
        email TEXT,
        company TEXT,
        fields TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
"#;

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use,
/// so one connection is shared by every conversation.
pub struct LibSqlBackend {
    // Keeps the database handle alive for the connection.
    _db: libsql::Database,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;
        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: libsql::Database) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        let backend = Self { _db: db, conn };
        backend.init_schema().await?;
        Ok(backend)
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn
            .execute_batch(SCHEMA)
            .await
            .map_err(|e| DatabaseError::Query(format!("init_schema: {e}")))?;
        Ok(())
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn row_to_turn(row: &libsql::Row) -> Result<ConversationTurnRecord, libsql::Error> {
    let id_str: String = row.get(0)?;
    let user_id: Option<String> = row.get::<String>(1).ok();
    let conversation_id: String = row.get(2)?;
    let user_msg: String = row.get(3)?;
    let bot_msg: String = row.get(4)?;
    let created_str: String = row.get(5)?;
    Ok(ConversationTurnRecord {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        user_id,
        conversation_id,
        user_msg,
        bot_msg,
        created_at: parse_datetime(&created_str),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl LeadStore for LibSqlBackend {
    async fn write_conversation_turn(&self, turn: &ConversationTurnRecord) -> Result<(), DatabaseError> {
        self.conn
            .execute(
                "INSERT INTO conversations (id, user_id, conversation_id, user_msg, bot_msg, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    turn.id.to_string(),
                    opt_text(turn.user_id.as_deref()),
                    turn.conversation_id.as_str(),
                    turn.user_msg.as_str(),
                    turn.bot_msg.as_str(),
                    format_datetime(&turn.created_at),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_conversation_turn: {e}")))?;

        debug!(conversation_id = %turn.conversation_id, "Conversation turn stored");
        Ok(())
    }

    async fn write_lead_record(&self, record: &LeadRecord) -> Result<(), DatabaseError> {
        let fields = serde_json::to_string(&record.fields)
            .map_err(|e| DatabaseError::Serialization(format!("lead fields: {e}")))?;
        let now = format_datetime(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO lead_summaries (conversation_id, user_id, name, email, company, fields, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (conversation_id) DO UPDATE SET
                    user_id = excluded.user_id,
                    name = excluded.name,
                    email = excluded.email,
                    company = excluded.company,
                    fields = excluded.fields,
                    updated_at = excluded.updated_at",
                params![
                    record.conversation_id.as_str(),
                    opt_text(record.user_id.as_deref()),
                    opt_text(record.get("name")),
                    opt_text(record.get("email")),
                    opt_text(record.get("company")),
                    fields,
                    format_datetime(&record.created_at),
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("write_lead_record: {e}")))?;

        info!(
            conversation_id = %record.conversation_id,
            filled = record.fields.filled(),
            "Lead record stored"
        );
        Ok(())
    }

    async fn list_conversations(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT conversation_id, MIN(created_at) AS first_at FROM conversations
                 GROUP BY conversation_id ORDER BY first_at ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_conversations: {e}")))?;

        let mut ids = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => {
                    let id: String = row
                        .get(0)
                        .map_err(|e| DatabaseError::Query(format!("list_conversations row parse: {e}")))?;
                    if !id.is_empty() {
                        ids.push(id);
                    }
                }
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_conversations: {e}"))),
            }
        }
        Ok(ids)
    }

    async fn conversation_turns(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<ConversationTurnRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, user_id, conversation_id, user_msg, bot_msg, created_at FROM conversations
                 WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC",
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("conversation_turns: {e}")))?;

        let mut turns = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => turns.push(
                    row_to_turn(&row)
                        .map_err(|e| DatabaseError::Query(format!("conversation_turns row parse: {e}")))?,
                ),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("conversation_turns: {e}"))),
            }
        }
        Ok(turns)
    }

    async fn lead_record(&self, conversation_id: &str) -> Result<Option<LeadRecord>, DatabaseError> {
        let mut rows = self
            .conn
            .query(
                "SELECT conversation_id, user_id, fields, created_at FROM lead_summaries
                 WHERE conversation_id = ?1",
                params![conversation_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("lead_record: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let conversation_id: String = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("lead_record row parse: {e}")))?;
                let user_id: Option<String> = row.get::<String>(1).ok();
                let fields_str: String = row
                    .get(2)
                    .map_err(|e| DatabaseError::Query(format!("lead_record row parse: {e}")))?;
                let created_str: String = row.get(3).unwrap_or_default();
                let fields: LeadFields = serde_json::from_str(&fields_str)
                    .map_err(|e| DatabaseError::Serialization(format!("lead fields: {e}")))?;
                Ok(Some(LeadRecord {
                    conversation_id,
                    user_id,
                    created_at: parse_datetime(&created_str),
                    fields,
                }))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("lead_record: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lead::LeadSchema;

    fn record(conversation_id: &str, name: &str) -> LeadRecord {
        let schema = LeadSchema::default();
        let fields = LeadFields::from_json(
            &schema,
            &serde_json::json!({"name": name, "company": "TCW GmbH", "email": "None"}),
        )
        .unwrap();
        LeadRecord::new(conversation_id, Some("user-1".into()), fields)
    }

    #[tokio::test]
    async fn turns_round_trip_in_order() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.write_conversation_turn(&ConversationTurnRecord::new("c1", Some("u".into()), "Hallo", "Wie heißen Sie?"))
            .await
            .unwrap();
        db.write_conversation_turn(&ConversationTurnRecord::new("c1", Some("u".into()), "Merten", "Danke"))
            .await
            .unwrap();
        db.write_conversation_turn(&ConversationTurnRecord::new("c2", None, "Frage", "Antwort"))
            .await
            .unwrap();

        let turns = db.conversation_turns("c1").await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].user_msg, "Hallo");
        assert_eq!(turns[1].user_msg, "Merten");
        assert_eq!(turns[0].user_id.as_deref(), Some("u"));

        let c2 = db.conversation_turns("c2").await.unwrap();
        assert_eq!(c2[0].user_id, None);
    }

    #[tokio::test]
    async fn list_conversations_is_distinct_and_ordered() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        for (conv, msg) in [("a", "1"), ("b", "2"), ("a", "3")] {
            db.write_conversation_turn(&ConversationTurnRecord::new(conv, None, msg, "ok"))
                .await
                .unwrap();
        }
        assert_eq!(db.list_conversations().await.unwrap(), ["a", "b"]);
    }

    #[tokio::test]
    async fn list_conversations_reports_unreadable_rows() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        db.write_conversation_turn(&ConversationTurnRecord::new("a", None, "1", "ok"))
            .await
            .unwrap();
        db.conn
            .execute(
                "INSERT INTO conversations (id, user_id, conversation_id, user_msg, bot_msg, created_at)
                 VALUES ('x', NULL, X'FF00', 'm', 'b', '2024-01-01T00:00:00Z')",
                (),
            )
            .await
            .unwrap();

        let err = db.list_conversations().await.unwrap_err();
        assert!(matches!(err, DatabaseError::Query(_)));
    }

    #[tokio::test]
    async fn lead_record_upserts() {
        let db = LibSqlBackend::new_memory().await.unwrap();
        assert!(db.lead_record("c1").await.unwrap().is_none());

        db.write_lead_record(&record("c1", "Merten")).await.unwrap();
        db.write_lead_record(&record("c1", "Merten Müller")).await.unwrap();

        let stored = db.lead_record("c1").await.unwrap().unwrap();
        assert_eq!(stored.get("name"), Some("Merten Müller"));
        assert_eq!(stored.get("email"), None);
        assert_eq!(stored.user_id.as_deref(), Some("user-1"));
        assert_eq!(stored.fields.len(), 10);
        let keys: Vec<&str> = stored.fields.keys().collect();
        let schema = LeadSchema::default();
        let expected: Vec<&str> = schema.names().collect();
        assert_eq!(keys, expected);
    }
}

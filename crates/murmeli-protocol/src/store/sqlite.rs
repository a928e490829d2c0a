//! SQLite-backed [`Store`].
//!
//! Profiles, inbox rows and pending contacts are kept as JSON documents
//! next to the columns we query on. Outbox frames are base64 text.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use murmeli_transport::PeerId;
use rusqlite::{params, Connection, OptionalExtension};

use super::{InboxRow, OutboxRow, PendingContact, Recipient, Store};
use crate::message::{EncType, MessageType};
use crate::profile::{ContactProfile, ContactStatus};
use crate::StoreError;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS profiles (
    tor_id  TEXT PRIMARY KEY,
    status  TEXT NOT NULL,
    key_id  TEXT,
    body    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS profiles_status ON profiles(status);
CREATE INDEX IF NOT EXISTS profiles_key_id ON profiles(key_id);
CREATE TABLE IF NOT EXISTS outbox (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    recipient     TEXT NOT NULL,
    message       TEXT NOT NULL,
    enc_type      INTEGER NOT NULL,
    msg_type      INTEGER NOT NULL,
    queue         INTEGER NOT NULL,
    relays        TEXT NOT NULL,
    relay_message TEXT
);
CREATE TABLE IF NOT EXISTS inbox (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    message_hash TEXT NOT NULL,
    deleted      INTEGER NOT NULL DEFAULT 0,
    body         TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS inbox_hash ON inbox(message_hash);
CREATE TABLE IF NOT EXISTS pending_contacts (
    from_id TEXT PRIMARY KEY,
    body    TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS counters (
    name  TEXT PRIMARY KEY,
    value INTEGER NOT NULL
);
";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn query_profiles(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ContactProfile>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let bodies = stmt
            .query_map(args, |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }

    fn query_inbox(
        &self,
        sql: &str,
        args: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<InboxRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(args, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, deleted, body)| {
                let mut row: InboxRow = serde_json::from_str(&body)?;
                row.id = id as u64;
                row.deleted = deleted;
                Ok::<_, StoreError>(row)
            })
            .collect()
    }
}

struct RawOutbox {
    id: i64,
    recipient: String,
    message: String,
    enc_type: u8,
    msg_type: u8,
    queue: bool,
    relays: String,
    relay_message: Option<String>,
}

fn decode_b64(text: &str) -> Result<Vec<u8>, StoreError> {
    BASE64
        .decode(text)
        .map_err(|e| StoreError::Corrupt(format!("bad base64: {e}")))
}

impl RawOutbox {
    fn into_row(self) -> Result<OutboxRow, StoreError> {
        let recipient: Recipient = serde_json::from_str(&self.recipient)?;
        let relays: Vec<PeerId> = serde_json::from_str(&self.relays)?;
        Ok(OutboxRow {
            id: self.id as u64,
            recipient,
            message: decode_b64(&self.message)?,
            enc_type: EncType::from_u8(self.enc_type)
                .ok_or_else(|| StoreError::Corrupt(format!("enc type {}", self.enc_type)))?,
            msg_type: MessageType::from_u8(self.msg_type)
                .ok_or_else(|| StoreError::Corrupt(format!("message type {}", self.msg_type)))?,
            queue: self.queue,
            relays,
            relay_message: self.relay_message.as_deref().map(decode_b64).transpose()?,
        })
    }
}

impl Store for SqliteStore {
    fn own_profile(&self) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self
            .query_profiles(
                "SELECT body FROM profiles WHERE status = ?1 LIMIT 1",
                &[&ContactStatus::Myself.as_str()],
            )?
            .pop())
    }

    fn get_profile(&self, id: &PeerId) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self
            .query_profiles("SELECT body FROM profiles WHERE tor_id = ?1", &[&id.as_str()])?
            .pop())
    }

    fn get_profiles_with_status(
        &self,
        statuses: &[ContactStatus],
    ) -> Result<Vec<ContactProfile>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (1..=statuses.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!("SELECT body FROM profiles WHERE status IN ({placeholders}) ORDER BY tor_id");
        let names: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
        let args: Vec<&dyn rusqlite::ToSql> = names.iter().map(|n| n as &dyn rusqlite::ToSql).collect();
        self.query_profiles(&sql, &args)
    }

    fn find_profile_by_key_id(&self, key_id: &str) -> Result<Option<ContactProfile>, StoreError> {
        Ok(self
            .query_profiles("SELECT body FROM profiles WHERE key_id = ?1 LIMIT 1", &[&key_id])?
            .pop())
    }

    fn add_or_update_profile(&self, profile: ContactProfile) -> Result<(), StoreError> {
        let body = serde_json::to_string(&profile)?;
        self.conn().execute(
            "INSERT INTO profiles (tor_id, status, key_id, body) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tor_id) DO UPDATE SET status = ?2, key_id = ?3, body = ?4",
            params![
                profile.tor_id.as_str(),
                profile.status.as_str(),
                profile.key_id,
                body
            ],
        )?;
        Ok(())
    }

    fn get_outbox(&self) -> Result<Vec<OutboxRow>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, recipient, message, enc_type, msg_type, queue, relays, relay_message
             FROM outbox ORDER BY id",
        )?;
        let raw = stmt
            .query_map([], |row| {
                Ok(RawOutbox {
                    id: row.get(0)?,
                    recipient: row.get(1)?,
                    message: row.get(2)?,
                    enc_type: row.get(3)?,
                    msg_type: row.get(4)?,
                    queue: row.get(5)?,
                    relays: row.get(6)?,
                    relay_message: row.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter().map(RawOutbox::into_row).collect()
    }

    fn add_row_to_outbox(&self, row: OutboxRow) -> Result<u64, StoreError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO outbox (recipient, message, enc_type, msg_type, queue, relays, relay_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                serde_json::to_string(&row.recipient)?,
                BASE64.encode(&row.message),
                row.enc_type as u8,
                row.msg_type as u8,
                row.queue,
                serde_json::to_string(&row.relays)?,
                row.relay_message.as_ref().map(|m| BASE64.encode(m)),
            ],
        )?;
        Ok(conn.last_insert_rowid() as u64)
    }

    fn update_outbox_row(&self, row: &OutboxRow) -> Result<(), StoreError> {
        let changed = self.conn().execute(
            "UPDATE outbox SET recipient = ?2, message = ?3, queue = ?4, relays = ?5,
             relay_message = ?6 WHERE id = ?1",
            params![
                row.id as i64,
                serde_json::to_string(&row.recipient)?,
                BASE64.encode(&row.message),
                row.queue,
                serde_json::to_string(&row.relays)?,
                row.relay_message.as_ref().map(|m| BASE64.encode(m)),
            ],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("outbox row {}", row.id)));
        }
        Ok(())
    }

    fn delete_from_outbox(&self, id: u64) -> Result<(), StoreError> {
        self.conn()
            .execute("DELETE FROM outbox WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    fn get_inbox(&self) -> Result<Vec<InboxRow>, StoreError> {
        self.query_inbox(
            "SELECT id, deleted, body FROM inbox WHERE deleted = 0 ORDER BY id",
            &[],
        )
    }

    fn add_row_to_inbox(&self, row: InboxRow) -> Result<Option<u64>, StoreError> {
        let body = serde_json::to_string(&row)?;
        let conn = self.conn();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM inbox WHERE message_hash = ?1 AND deleted = 0 LIMIT 1",
                params![row.message_hash],
                |r| r.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Ok(None);
        }
        conn.execute(
            "INSERT INTO inbox (message_hash, deleted, body) VALUES (?1, 0, ?2)",
            params![row.message_hash, body],
        )?;
        Ok(Some(conn.last_insert_rowid() as u64))
    }

    fn delete_from_inbox(&self, id: u64) -> Result<(), StoreError> {
        self.conn()
            .execute("UPDATE inbox SET deleted = 1 WHERE id = ?1", params![id as i64])?;
        Ok(())
    }

    fn find_inbox_by_hash(&self, hash: &str) -> Result<Option<InboxRow>, StoreError> {
        Ok(self
            .query_inbox(
                "SELECT id, deleted, body FROM inbox WHERE message_hash = ?1 AND deleted = 0 LIMIT 1",
                &[&hash],
            )?
            .pop())
    }

    fn new_conversation_id(&self) -> Result<u64, StoreError> {
        let conn = self.conn();
        let value: i64 = conn.query_row(
            "INSERT INTO counters (name, value) VALUES ('conversation', 1)
             ON CONFLICT(name) DO UPDATE SET value = value + 1
             RETURNING value",
            [],
            |r| r.get(0),
        )?;
        Ok(value as u64)
    }

    fn add_pending_contact(&self, contact: PendingContact) -> Result<(), StoreError> {
        let body = serde_json::to_string(&contact)?;
        self.conn().execute(
            "INSERT INTO pending_contacts (from_id, body) VALUES (?1, ?2)
             ON CONFLICT(from_id) DO UPDATE SET body = ?2",
            params![contact.from_id.as_str(), body],
        )?;
        Ok(())
    }

    fn pending_contacts(&self) -> Result<Vec<PendingContact>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT body FROM pending_contacts ORDER BY from_id")?;
        let bodies = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        bodies
            .iter()
            .map(|b| serde_json::from_str(b).map_err(StoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;

    #[test]
    fn profiles() {
        conformance::profiles(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn outbox() {
        conformance::outbox(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn inbox() {
        conformance::inbox(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn counters_and_pending() {
        conformance::counters_and_pending(&SqliteStore::open_in_memory().unwrap());
    }

    #[test]
    fn status_filter_runs_in_sql() {
        let store = SqliteStore::open_in_memory().unwrap();
        for (id, status) in [
            ("carolcarolcarolc", ContactStatus::Trusted),
            ("bobbobbobbobbobb", ContactStatus::Untrusted),
            ("davedavedavedave", ContactStatus::Blocked),
            ("evaevaevaevaevae", ContactStatus::Trusted),
        ] {
            store
                .add_or_update_profile(ContactProfile::new(conformance::peer(id), status, id))
                .unwrap();
        }

        let ids = |statuses: &[ContactStatus]| -> Vec<String> {
            store
                .get_profiles_with_status(statuses)
                .unwrap()
                .into_iter()
                .map(|p| p.tor_id.to_string())
                .collect()
        };
        assert_eq!(ids(&[ContactStatus::Trusted]), ["carolcarolcarolc", "evaevaevaevaevae"]);
        assert_eq!(
            ids(&[ContactStatus::Untrusted, ContactStatus::Blocked]),
            ["bobbobbobbobbobb", "davedavedavedave"]
        );
        assert!(ids(&[]).is_empty());
        assert!(ids(&[ContactStatus::Owner]).is_empty());
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("murmeli.db");
        let id = {
            let store = SqliteStore::open(&path).unwrap();
            store
                .add_row_to_outbox(OutboxRow::new(
                    Recipient::Single(conformance::peer("bobbobbobbobbobb")),
                    vec![0, 255, 7],
                    EncType::Asymmetric,
                    MessageType::Regular,
                ))
                .unwrap()
        };

        let store = SqliteStore::open(&path).unwrap();
        let rows = store.get_outbox().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id);
        assert_eq!(rows[0].message, vec![0, 255, 7]);
    }

    #[test]
    fn frames_are_stored_as_text() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .add_row_to_outbox(OutboxRow::new(
                Recipient::Single(conformance::peer("bobbobbobbobbobb")),
                b"murmeli".to_vec(),
                EncType::None,
                MessageType::ContactDeny,
            ))
            .unwrap();
        let text: String = store
            .conn()
            .query_row("SELECT message FROM outbox", [], |r| r.get(0))
            .unwrap();
        assert_eq!(text, BASE64.encode(b"murmeli"));
    }
}

//! Conversation store: one chat session per calendar day, messages in
//! insertion order.
//!
//! Sessions are looked up by `session_date` and created lazily on the first
//! message of the day. The look-up and the insert share one
//! `BEGIN IMMEDIATE` transaction: SQLite's write lock serialises concurrent
//! callers (threads or processes), so the second caller always sees the
//! first caller's row.

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime};
use rusqlite::{ErrorCode, OptionalExtension, TransactionBehavior, ffi, params};
use tracing::{debug, info, warn};

use crate::error::AppError;
use super::{Database, storage_err};

/// `ChatSession.session_date` format.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// `ChatSession.session_time` format.
pub const TIME_FORMAT: &str = "%H:%M:%S";
/// `Message.timestamp` format (local time, microseconds).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// History preview row: one per session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub session_id: i64,
    /// `YYYY-MM-DD`.
    pub date: String,
    /// Text of the session's first message; `None` for an empty session.
    pub preview: Option<String>,
}

/// One transcript line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub sender: String,
    pub text: String,
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct ConversationStore {
    db: Database,
}

impl ConversationStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Session id for today's local date, creating the session if needed.
    pub fn get_or_create_session_for_today(&self) -> Result<i64, AppError> {
        let now = Local::now().naive_local();
        self.get_or_create_session_for(now.date(), now.time())
    }

    /// Session id for `date`; a new session records `time` as its creation
    /// time of day.
    pub fn get_or_create_session_for(&self, date: NaiveDate, time: NaiveTime) -> Result<i64, AppError> {
        let date_str = date.format(DATE_FORMAT).to_string();

        let mut conn = self.db.connect()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| storage_err("begin session tx", e))?;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT session_id FROM ChatSession WHERE session_date = ?1 ORDER BY session_id LIMIT 1",
                params![date_str],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err(&format!("look up session for {date_str}"), e))?;

        if let Some(session_id) = existing {
            debug!(session_id, date = %date_str, "reusing session");
            return Ok(session_id);
        }

        tx.execute(
            "INSERT INTO ChatSession (session_date, session_time) VALUES (?1, ?2)",
            params![date_str, time.format(TIME_FORMAT).to_string()],
        )
        .map_err(|e| storage_err(&format!("create session for {date_str}"), e))?;
        let session_id = tx.last_insert_rowid();

        tx.commit()
            .map_err(|e| storage_err("commit session tx", e))?;

        info!(session_id, date = %date_str, "chat session created");
        Ok(session_id)
    }

    pub fn session_exists(&self, session_id: i64) -> Result<bool, AppError> {
        let conn = self.db.connect()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT session_id FROM ChatSession WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| storage_err(&format!("look up session {session_id}"), e))?;
        Ok(found.is_some())
    }

    /// Append a message. Fails with [`AppError::ForeignKey`] when
    /// `session_id` names no session.
    pub fn save_message(
        &self,
        session_id: i64,
        sender: &str,
        text: &str,
        timestamp: NaiveDateTime,
    ) -> Result<i64, AppError> {
        let conn = self.db.connect()?;
        let result = conn.execute(
            "INSERT INTO Message (session_id, sender, message_text, timestamp) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, sender, text, timestamp.format(TIMESTAMP_FORMAT).to_string()],
        );

        match result {
            Ok(_) => {
                let message_id = conn.last_insert_rowid();
                debug!(session_id, message_id, %sender, len = text.len(), "message saved");
                Ok(message_id)
            }
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation
                    && err.extended_code == ffi::SQLITE_CONSTRAINT_FOREIGNKEY =>
            {
                warn!(session_id, "save_message: unknown session");
                Err(AppError::ForeignKey(session_id))
            }
            Err(e) => Err(storage_err(&format!("insert message into session {session_id}"), e)),
        }
    }

    /// One row per session, ordered by session id, previewing the first
    /// message. Sessions without messages are included with no preview.
    pub fn fetch_session_summaries(&self) -> Result<Vec<SessionSummary>, AppError> {
        let conn = self.db.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT cs.session_id, cs.session_date, m.message_text
                 FROM ChatSession cs
                 LEFT JOIN (
                     SELECT session_id, MIN(message_id) AS first_message_id
                     FROM Message
                     GROUP BY session_id
                 ) first ON cs.session_id = first.session_id
                 LEFT JOIN Message m ON m.message_id = first.first_message_id
                 ORDER BY cs.session_id",
            )
            .map_err(|e| storage_err("prepare session summaries", e))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SessionSummary {
                    session_id: row.get(0)?,
                    date: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    preview: row.get(2)?,
                })
            })
            .map_err(|e| storage_err("query session summaries", e))?;

        let mut summaries = Vec::new();
        for row in rows {
            summaries.push(row.map_err(|e| storage_err("map session summary row", e))?);
        }
        Ok(summaries)
    }

    /// Full transcript of `session_id` in the order it was saved.
    pub fn fetch_messages(&self, session_id: i64) -> Result<Vec<MessageRecord>, AppError> {
        let conn = self.db.connect()?;
        let mut stmt = conn
            .prepare(
                "SELECT sender, message_text, timestamp FROM Message
                 WHERE session_id = ?1 ORDER BY message_id",
            )
            .map_err(|e| storage_err("prepare fetch messages", e))?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok(MessageRecord {
                    sender: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                    text: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    timestamp: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })
            .map_err(|e| storage_err(&format!("query messages for session {session_id}"), e))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(|e| storage_err("map message row", e))?);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, ConversationStore) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(&tmp.path().join("chat.db")).unwrap();
        (tmp, db.conversations())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn ts(d: u32, h: u32, m: u32) -> NaiveDateTime {
        day(d).and_time(at(h, m))
    }

    #[test]
    fn same_day_returns_same_session() {
        let (_tmp, store) = store();
        let first = store.get_or_create_session_for(day(1), at(9, 0)).unwrap();
        let second = store.get_or_create_session_for(day(1), at(17, 30)).unwrap();
        assert_eq!(first, second);
        assert_eq!(store.fetch_session_summaries().unwrap().len(), 1);
    }

    #[test]
    fn different_days_get_different_sessions() {
        let (_tmp, store) = store();
        let a = store.get_or_create_session_for(day(1), at(9, 0)).unwrap();
        let b = store.get_or_create_session_for(day(2), at(9, 0)).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn today_is_stable_across_calls() {
        let (_tmp, store) = store();
        let a = store.get_or_create_session_for_today().unwrap();
        let b = store.get_or_create_session_for_today().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn concurrent_callers_share_one_session() {
        let (_tmp, store) = store();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || store.get_or_create_session_for(day(5), at(8, i)).unwrap())
            })
            .collect();
        let ids: Vec<i64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(store.fetch_session_summaries().unwrap().len(), 1);
    }

    #[test]
    fn messages_come_back_in_save_order() {
        let (_tmp, store) = store();
        let sid = store.get_or_create_session_for(day(1), at(9, 0)).unwrap();
        let lines = [("You", "hi"), ("AI", "hello"), ("You", "how are you"), ("AI", "fine")];
        for (i, (sender, text)) in lines.iter().enumerate() {
            store.save_message(sid, sender, text, ts(1, 9, i as u32)).unwrap();
        }

        let got: Vec<_> = store
            .fetch_messages(sid)
            .unwrap()
            .into_iter()
            .map(|m| (m.sender, m.text))
            .collect();
        let want: Vec<_> = lines.iter().map(|(s, t)| (s.to_string(), t.to_string())).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn timestamp_is_stored_with_microseconds() {
        let (_tmp, store) = store();
        let sid = store.get_or_create_session_for(day(1), at(9, 0)).unwrap();
        store.save_message(sid, "You", "hi", ts(1, 9, 5)).unwrap();
        let msgs = store.fetch_messages(sid).unwrap();
        assert_eq!(msgs[0].timestamp, "2024-03-01 09:05:00.000000");
    }

    #[test]
    fn save_to_unknown_session_is_foreign_key_error() {
        let (_tmp, store) = store();
        let err = store.save_message(999, "You", "hi", ts(1, 9, 0)).unwrap_err();
        assert!(matches!(err, AppError::ForeignKey(999)));
    }

    #[test]
    fn summaries_preview_first_message_and_keep_empty_sessions() {
        let (_tmp, store) = store();
        let s1 = store.get_or_create_session_for(day(1), at(9, 0)).unwrap();
        let s2 = store.get_or_create_session_for(day(2), at(9, 0)).unwrap();
        store.save_message(s1, "You", "first question", ts(1, 9, 1)).unwrap();
        store.save_message(s1, "AI", "first answer", ts(1, 9, 2)).unwrap();

        let summaries = store.fetch_session_summaries().unwrap();
        assert_eq!(
            summaries,
            vec![
                SessionSummary { session_id: s1, date: "2024-03-01".into(), preview: Some("first question".into()) },
                SessionSummary { session_id: s2, date: "2024-03-02".into(), preview: None },
            ]
        );
    }

    #[test]
    fn unknown_session_is_distinguishable_from_empty() {
        let (_tmp, store) = store();
        let sid = store.get_or_create_session_for(day(1), at(9, 0)).unwrap();
        assert!(store.fetch_messages(sid).unwrap().is_empty());
        assert!(store.session_exists(sid).unwrap());
        assert!(!store.session_exists(sid + 100).unwrap());
    }
}

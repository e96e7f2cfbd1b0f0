use std::time::{Duration, Instant};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::instrument;

use colloquy_core::event::Event;
use colloquy_core::ids::SessionId;
use colloquy_core::messages::Content;
use colloquy_core::session::{PendingTurn, Session, SessionKey, Turn};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// SQLite-backed session table. All methods are synchronous; the async
/// [`SessionStore`](crate::SessionStore) impl moves them onto the blocking pool.
#[derive(Clone)]
pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Get a session with its full turn history. `None` if unknown.
    #[instrument(skip(self, key), fields(app = %key.app_name, user = %key.user_id, session_id = %key.session_id))]
    pub fn get(&self, key: &SessionKey) -> Result<Option<Session>, StoreError> {
        self.db.with_conn(|conn| load_session(conn, key))
    }

    /// Create a session with the given initial state.
    /// Fails with `Conflict` if the key already exists.
    #[instrument(skip(self, key, state), fields(app = %key.app_name, user = %key.user_id, session_id = %key.session_id))]
    pub fn create(&self, key: &SessionKey, state: Map<String, Value>) -> Result<Session, StoreError> {
        let now = Utc::now();
        let state_json = serde_json::to_string(&state)?;

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO sessions (app_name, user_id, id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                 ON CONFLICT(app_name, user_id, id) DO NOTHING",
                rusqlite::params![
                    key.app_name,
                    key.user_id,
                    key.session_id.as_str(),
                    state_json,
                    now.to_rfc3339(),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict(format!("session {}", key.session_id)));
            }

            Ok(Session {
                key: key.clone(),
                state,
                turns: Vec::new(),
                created_at: now,
                updated_at: now,
            })
        })
    }

    /// Atomic get-or-create. Returns the session and whether this call
    /// created it; among concurrent callers for one key exactly one sees `true`.
    #[instrument(skip(self, key), fields(app = %key.app_name, user = %key.user_id, session_id = %key.session_id))]
    pub fn get_or_create(&self, key: &SessionKey) -> Result<(Session, bool), StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let inserted = tx.execute(
                "INSERT INTO sessions (app_name, user_id, id, state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, '{}', ?4, ?4)
                 ON CONFLICT(app_name, user_id, id) DO NOTHING",
                rusqlite::params![key.app_name, key.user_id, key.session_id.as_str(), now],
            )?;
            let session = load_session(&tx, key)?
                .ok_or_else(|| StoreError::NotFound(format!("session {}", key.session_id)))?;
            tx.commit()?;
            Ok((session, inserted == 1))
        })
    }

    /// Append a completed turn and merge its state delta, in one transaction.
    ///
    /// The transaction commits only if it gets there within `budget`;
    /// otherwise it is rolled back and `Timeout` is returned. Once this
    /// returns, no write for the turn is still pending.
    #[instrument(skip(self, key, turn), fields(app = %key.app_name, user = %key.user_id, session_id = %key.session_id, events = turn.events.len()))]
    pub fn append_turn(
        &self,
        key: &SessionKey,
        turn: PendingTurn,
        budget: Duration,
    ) -> Result<Turn, StoreError> {
        let deadline = Instant::now() + budget;
        let now = Utc::now();
        let message_json = serde_json::to_string(&turn.message)?;
        let events_json = serde_json::to_string(&turn.events)?;
        let delta = turn.state_delta();

        self.db.with_conn_until(deadline, |conn| {
            let tx = conn.unchecked_transaction()?;

            let (state_raw, next_seq): (String, i64) = tx
                .query_row(
                    "SELECT s.state,
                            COALESCE((SELECT MAX(sequence) FROM turns t
                                      WHERE t.app_name = s.app_name AND t.user_id = s.user_id
                                        AND t.session_id = s.id), -1) + 1
                     FROM sessions s WHERE s.app_name = ?1 AND s.user_id = ?2 AND s.id = ?3",
                    rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("session {}", key.session_id)))?;

            tx.execute(
                "INSERT INTO turns (app_name, user_id, session_id, sequence, message, events, reply, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    key.app_name,
                    key.user_id,
                    key.session_id.as_str(),
                    next_seq,
                    message_json,
                    events_json,
                    turn.reply,
                    now.to_rfc3339(),
                ],
            )?;

            let mut state: Map<String, Value> =
                row_helpers::parse_json(&state_raw, "sessions", "state")?;
            state.extend(delta);
            write_state(&tx, key, &state, &now.to_rfc3339())?;

            if Instant::now() >= deadline {
                // Dropping `tx` rolls the insert back.
                return Err(StoreError::Timeout(budget));
            }
            tx.commit()?;

            Ok(Turn {
                sequence: next_seq,
                message: turn.message,
                events: turn.events,
                reply: turn.reply,
                created_at: now,
            })
        })
    }

    /// Merge keys into the session's state bag; returns the new state.
    #[instrument(skip(self, key, delta), fields(app = %key.app_name, user = %key.user_id, session_id = %key.session_id))]
    pub fn update_state(
        &self,
        key: &SessionKey,
        delta: Map<String, Value>,
    ) -> Result<Map<String, Value>, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            let state_raw: String = tx
                .query_row(
                    "SELECT state FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
                    rusqlite::params![key.app_name, key.user_id, key.session_id.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound(format!("session {}", key.session_id)))?;

            let mut state: Map<String, Value> =
                row_helpers::parse_json(&state_raw, "sessions", "state")?;
            state.extend(delta);
            write_state(&tx, key, &state, &now)?;
            tx.commit()?;
            Ok(state)
        })
    }

    /// Number of sessions stored for an (app, user) pair.
    #[instrument(skip(self))]
    pub fn count(&self, app_name: &str, user_id: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM sessions WHERE app_name = ?1 AND user_id = ?2",
                [app_name, user_id],
                |row| row.get(0),
            )?)
        })
    }
}

fn write_state(
    conn: &Connection,
    key: &SessionKey,
    state: &Map<String, Value>,
    now: &str,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE sessions SET state = ?1, updated_at = ?2
         WHERE app_name = ?3 AND user_id = ?4 AND id = ?5",
        rusqlite::params![
            serde_json::to_string(state)?,
            now,
            key.app_name,
            key.user_id,
            key.session_id.as_str(),
        ],
    )?;
    Ok(())
}

fn load_session(conn: &Connection, key: &SessionKey) -> Result<Option<Session>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, state, created_at, updated_at
         FROM sessions WHERE app_name = ?1 AND user_id = ?2 AND id = ?3",
    )?;
    let mut rows = stmt.query(rusqlite::params![
        key.app_name,
        key.user_id,
        key.session_id.as_str()
    ])?;
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let id: String = row_helpers::get(row, 0, "sessions", "id")?;
    let state_raw: String = row_helpers::get(row, 1, "sessions", "state")?;
    let created_raw: String = row_helpers::get(row, 2, "sessions", "created_at")?;
    let updated_raw: String = row_helpers::get(row, 3, "sessions", "updated_at")?;

    Ok(Some(Session {
        key: SessionKey::new(&key.app_name, &key.user_id, SessionId::from_raw(id)),
        state: row_helpers::parse_json(&state_raw, "sessions", "state")?,
        turns: load_turns(conn, key)?,
        created_at: row_helpers::parse_timestamp(&created_raw, "sessions", "created_at")?,
        updated_at: row_helpers::parse_timestamp(&updated_raw, "sessions", "updated_at")?,
    }))
}

fn load_turns(conn: &Connection, key: &SessionKey) -> Result<Vec<Turn>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT sequence, message, events, reply, created_at
         FROM turns WHERE app_name = ?1 AND user_id = ?2 AND session_id = ?3
         ORDER BY sequence ASC",
    )?;
    let mut rows = stmt.query(rusqlite::params![
        key.app_name,
        key.user_id,
        key.session_id.as_str()
    ])?;

    let mut turns = Vec::new();
    while let Some(row) = rows.next()? {
        let message_raw: String = row_helpers::get(row, 1, "turns", "message")?;
        let events_raw: String = row_helpers::get(row, 2, "turns", "events")?;
        let created_raw: String = row_helpers::get(row, 4, "turns", "created_at")?;
        let message: Content = row_helpers::parse_json(&message_raw, "turns", "message")?;
        let events: Vec<Event> = row_helpers::parse_json(&events_raw, "turns", "events")?;

        turns.push(Turn {
            sequence: row_helpers::get(row, 0, "turns", "sequence")?,
            message,
            events,
            reply: row_helpers::get(row, 3, "turns", "reply")?,
            created_at: row_helpers::parse_timestamp(&created_raw, "turns", "created_at")?,
        });
    }
    Ok(turns)
}

use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{Call, CALL_STATUS_ACTIVE, CALL_STATUS_ENDED};

impl Database {
    /// Register a new active call for a room.
    pub fn create_call(&self, room_id: &str) -> Result<Call> {
        let call = Call {
            id: Uuid::new_v4(),
            room_id: room_id.to_string(),
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            status: CALL_STATUS_ACTIVE.to_string(),
            recording: false,
            metadata: "{}".to_string(),
        };

        self.conn().execute(
            "INSERT INTO calls (id, room_id, created_at, status, recording, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                call.id.to_string(),
                call.room_id,
                call.created_at.to_rfc3339(),
                call.status,
                call.recording,
                call.metadata,
            ],
        )?;

        Ok(call)
    }

    pub fn get_call(&self, call_id: Uuid) -> Result<Call> {
        self.conn()
            .query_row(
                "SELECT id, room_id, created_at, started_at, ended_at, status, recording, metadata
                 FROM calls WHERE id = ?1",
                params![call_id.to_string()],
                row_to_call,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// Mark a call ended.
    pub fn end_call(&self, call_id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE calls SET ended_at = ?1, status = ?2 WHERE id = ?3",
            params![
                Utc::now().to_rfc3339(),
                CALL_STATUS_ENDED,
                call_id.to_string()
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn active_calls(&self) -> Result<Vec<Call>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, room_id, created_at, started_at, ended_at, status, recording, metadata
             FROM calls WHERE status = ?1 ORDER BY created_at DESC",
        )?;

        let rows = stmt.query_map(params![CALL_STATUS_ACTIVE], row_to_call)?;

        let mut calls = Vec::new();
        for row in rows {
            calls.push(row?);
        }
        Ok(calls)
    }
}

fn row_to_call(row: &rusqlite::Row<'_>) -> rusqlite::Result<Call> {
    let id_str: String = row.get(0)?;
    let started_at: Option<String> = row.get(3)?;
    let ended_at: Option<String> = row.get(4)?;
    let created_at: String = row.get(2)?;

    Ok(Call {
        id: parse_uuid(&id_str, 0)?,
        room_id: row.get(1)?,
        created_at: parse_timestamp(&created_at, 2)?,
        started_at: started_at.as_deref().map(|s| parse_timestamp(s, 3)).transpose()?,
        ended_at: ended_at.as_deref().map(|s| parse_timestamp(s, 4)).transpose()?,
        status: row.get(5)?,
        recording: row.get(6)?,
        metadata: row.get(7)?,
    })
}

pub(crate) fn parse_uuid(value: &str, column: usize) -> rusqlite::Result<Uuid> {
    Uuid::parse_str(value).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn parse_timestamp(value: &str, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                column,
                rusqlite::types::Type::Text,
                Box::new(e),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn call_lifecycle() {
        let db = Database::open_in_memory().unwrap();

        let call = db.create_call("room-1").unwrap();
        assert_eq!(call.status, CALL_STATUS_ACTIVE);
        assert!(!call.recording);

        let loaded = db.get_call(call.id).unwrap();
        assert_eq!(loaded.room_id, "room-1");
        assert_eq!(loaded.id, call.id);

        assert_eq!(db.active_calls().unwrap().len(), 1);

        db.end_call(call.id).unwrap();
        let ended = db.get_call(call.id).unwrap();
        assert_eq!(ended.status, CALL_STATUS_ENDED);
        assert!(ended.ended_at.is_some());
        assert!(db.active_calls().unwrap().is_empty());
    }

    #[test]
    fn missing_call_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.get_call(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
        assert!(matches!(
            db.end_call(Uuid::new_v4()),
            Err(StoreError::NotFound)
        ));
    }
}

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use crate::calls::{parse_timestamp, parse_uuid};
use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Participant;

impl Database {
    /// Record a participant joining a call.
    pub fn add_participant(
        &self,
        call_id: Uuid,
        user_id: &str,
        role: &str,
        client_ip: &str,
    ) -> Result<Participant> {
        let participant = Participant {
            id: Uuid::new_v4(),
            call_id,
            user_id: user_id.to_string(),
            role: role.to_string(),
            joined_at: Utc::now(),
            left_at: None,
            client_ip: client_ip.to_string(),
            metadata: "{}".to_string(),
        };

        self.conn().execute(
            "INSERT INTO participants (id, call_id, user_id, role, joined_at, client_ip, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                participant.id.to_string(),
                participant.call_id.to_string(),
                participant.user_id,
                participant.role,
                participant.joined_at.to_rfc3339(),
                participant.client_ip,
                participant.metadata,
            ],
        )?;

        Ok(participant)
    }

    /// Stamp a participant's departure time.
    pub fn mark_participant_left(&self, participant_id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE participants SET left_at = ?1 WHERE id = ?2",
            params![Utc::now().to_rfc3339(), participant_id.to_string()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn participants_for_call(&self, call_id: Uuid) -> Result<Vec<Participant>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, call_id, user_id, role, joined_at, left_at, client_ip, metadata
             FROM participants WHERE call_id = ?1 ORDER BY joined_at",
        )?;

        let rows = stmt.query_map(params![call_id.to_string()], row_to_participant)?;

        let mut participants = Vec::new();
        for row in rows {
            participants.push(row?);
        }
        Ok(participants)
    }
}

fn row_to_participant(row: &rusqlite::Row<'_>) -> rusqlite::Result<Participant> {
    let id_str: String = row.get(0)?;
    let call_id_str: String = row.get(1)?;
    let joined_at: String = row.get(4)?;
    let left_at: Option<String> = row.get(5)?;

    Ok(Participant {
        id: parse_uuid(&id_str, 0)?,
        call_id: parse_uuid(&call_id_str, 1)?,
        user_id: row.get(2)?,
        role: row.get(3)?,
        joined_at: parse_timestamp(&joined_at, 4)?,
        left_at: left_at.as_deref().map(|s| parse_timestamp(s, 5)).transpose()?,
        client_ip: row.get(6)?,
        metadata: row.get(7)?,
    })
}

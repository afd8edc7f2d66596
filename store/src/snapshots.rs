//! Compression snapshots: the summary text plus the messages it replaced,
//! kept so the UI can reveal the originals.

use rusqlite::params;

use crate::{new_id, now_ms, CompressionSnapshot, Message, Store, StoreError};

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<CompressionSnapshot> {
    let messages: String = row.get(3)?;
    Ok(CompressionSnapshot {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        summary: row.get(2)?,
        messages: serde_json::from_str(&messages).unwrap_or_default(),
        created_at_ms: row.get(4)?,
    })
}

impl Store {
    pub async fn insert_compression_snapshot(
        &self,
        conversation_id: &str,
        summary: &str,
        messages: &[Message],
    ) -> Result<CompressionSnapshot, StoreError> {
        let snapshot = CompressionSnapshot {
            id: new_id(),
            conversation_id: conversation_id.to_string(),
            summary: summary.to_string(),
            messages: messages.to_vec(),
            created_at_ms: now_ms(),
        };
        let messages_json = serde_json::to_string(&snapshot.messages)
            .map_err(|e| StoreError::Storage(format!("serialize snapshot: {}", e)))?;
        let s = snapshot.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO compression_snapshots \
                 (id, conversation_id, summary, messages, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![s.id, s.conversation_id, s.summary, messages_json, s.created_at_ms],
            )?;
            Ok(())
        })?;
        Ok(snapshot)
    }

    pub async fn list_compression_snapshots(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<CompressionSnapshot>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, summary, messages, created_at \
                 FROM compression_snapshots WHERE conversation_id = ?1 ORDER BY created_at ASC",
            )?;
            let rows = stmt.query_map(params![conversation_id], row_to_snapshot)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Most recent snapshot, the one context composition substitutes.
    pub async fn latest_compression_snapshot(
        &self,
        conversation_id: &str,
    ) -> Result<Option<CompressionSnapshot>, StoreError> {
        let conversation_id = conversation_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, conversation_id, summary, messages, created_at \
                 FROM compression_snapshots WHERE conversation_id = ?1 \
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
            )?;
            let mut rows = stmt.query(params![conversation_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_snapshot(row)?)),
                None => Ok(None),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::open_temp;
    use crate::MessageRole;
    use stream_chunk::MessageChunk;

    #[tokio::test(flavor = "multi_thread")]
    async fn snapshot_round_trips_and_latest_wins() {
        let (_dir, store) = open_temp();
        let conv = store
            .create_conversation(None, None, None, None)
            .await
            .unwrap();
        let m = store
            .create_message(
                &conv.id,
                MessageRole::User,
                None,
                None,
                vec![MessageChunk::text("old")],
            )
            .await
            .unwrap();

        store
            .insert_compression_snapshot(&conv.id, "first summary", &[m.clone()])
            .await
            .unwrap();
        store
            .insert_compression_snapshot(&conv.id, "second summary", &[m.clone()])
            .await
            .unwrap();

        let all = store.list_compression_snapshots(&conv.id).await.unwrap();
        assert_eq!(all.len(), 2);
        let latest = store
            .latest_compression_snapshot(&conv.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.summary, "second summary");
        assert_eq!(latest.messages[0].id, m.id);
    }
}

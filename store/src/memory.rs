//! Memory notes: opaque key-value records per workspace, backing the memory
//! tool category.

use rusqlite::params;

use crate::{now_ms, MemoryNote, Store, StoreError};

impl Store {
    pub async fn set_memory_note(
        &self,
        workspace_id: &str,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        let workspace_id = workspace_id.to_string();
        let key = key.to_string();
        let value = value.to_string();
        let now = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO memory_notes (workspace_id, key, value, updated_at) \
                 VALUES (?1, ?2, ?3, ?4) \
                 ON CONFLICT(workspace_id, key) DO UPDATE SET value = ?3, updated_at = ?4",
                params![workspace_id, key, value, now],
            )?;
            Ok(())
        })
    }

    pub async fn get_memory_note(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<Option<String>, StoreError> {
        let workspace_id = workspace_id.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            match conn.query_row(
                "SELECT value FROM memory_notes WHERE workspace_id = ?1 AND key = ?2",
                params![workspace_id, key],
                |row| row.get(0),
            ) {
                Ok(v) => Ok(Some(v)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
    }

    pub async fn list_memory_notes(
        &self,
        workspace_id: &str,
    ) -> Result<Vec<MemoryNote>, StoreError> {
        let workspace_id = workspace_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT key, value, updated_at FROM memory_notes \
                 WHERE workspace_id = ?1 ORDER BY key ASC",
            )?;
            let rows = stmt.query_map(params![workspace_id], |row| {
                Ok(MemoryNote {
                    key: row.get(0)?,
                    value: row.get(1)?,
                    updated_at_ms: row.get(2)?,
                })
            })?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    pub async fn delete_memory_note(
        &self,
        workspace_id: &str,
        key: &str,
    ) -> Result<bool, StoreError> {
        let workspace_id = workspace_id.to_string();
        let key = key.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "DELETE FROM memory_notes WHERE workspace_id = ?1 AND key = ?2",
                params![workspace_id, key],
            )?;
            Ok(changed > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::open_temp;

    #[tokio::test(flavor = "multi_thread")]
    async fn notes_upsert_and_scope_by_workspace() {
        let (_dir, store) = open_temp();
        store.set_memory_note("w1", "deploy", "use blue env").await.unwrap();
        store.set_memory_note("w1", "deploy", "use green env").await.unwrap();
        store.set_memory_note("w2", "deploy", "other").await.unwrap();

        assert_eq!(
            store.get_memory_note("w1", "deploy").await.unwrap().as_deref(),
            Some("use green env")
        );
        assert_eq!(store.list_memory_notes("w1").await.unwrap().len(), 1);
        assert!(store.delete_memory_note("w1", "deploy").await.unwrap());
        assert!(!store.delete_memory_note("w1", "deploy").await.unwrap());
        assert!(store.get_memory_note("w1", "deploy").await.unwrap().is_none());
    }
}

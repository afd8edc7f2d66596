//! Conversation rows: create, list, patch, soft delete.

use rusqlite::params;

use crate::{new_id, now_ms, Conversation, ConversationStatus, Store, StoreError};

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status: String = row.get(5)?;
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        workspace_id: row.get(2)?,
        asset_id: row.get(3)?,
        asset_session_id: row.get(4)?,
        status: ConversationStatus::parse(&status).unwrap_or(ConversationStatus::Active),
        created_at_ms: row.get(6)?,
        updated_at_ms: row.get(7)?,
    })
}

const CONVERSATION_COLS: &str =
    "id, title, workspace_id, asset_id, asset_session_id, status, created_at, updated_at";

impl Store {
    pub async fn create_conversation(
        &self,
        title: Option<&str>,
        workspace_id: Option<&str>,
        asset_id: Option<&str>,
        asset_session_id: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        let id = new_id();
        let now = now_ms();
        let conversation = Conversation {
            id: id.clone(),
            title: title.map(str::to_string),
            workspace_id: workspace_id.map(str::to_string),
            asset_id: asset_id.map(str::to_string),
            asset_session_id: asset_session_id.map(str::to_string),
            status: ConversationStatus::Active,
            created_at_ms: now,
            updated_at_ms: now,
        };
        let insert = conversation.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO conversations \
                 (id, title, workspace_id, asset_id, asset_session_id, status, created_at, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    insert.id,
                    insert.title,
                    insert.workspace_id,
                    insert.asset_id,
                    insert.asset_session_id,
                    insert.status.as_str(),
                    insert.created_at_ms,
                    insert.updated_at_ms,
                ],
            )?;
            Ok(())
        })?;
        Ok(conversation)
    }

    pub async fn get_conversation(&self, id: &str) -> Result<Conversation, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!(
                    "SELECT {} FROM conversations WHERE id = ?1 AND deleted = 0",
                    CONVERSATION_COLS
                ),
                params![id],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    StoreError::NotFound(format!("conversation {}", id))
                }
                other => other.into(),
            })
        })
    }

    /// Lists conversations by updated time descending, optionally filtered.
    pub async fn list_conversations(
        &self,
        workspace_id: Option<&str>,
        asset_id: Option<&str>,
    ) -> Result<Vec<Conversation>, StoreError> {
        let workspace_id = workspace_id.map(str::to_string);
        let asset_id = asset_id.map(str::to_string);
        self.with_conn(move |conn| {
            let mut sql = format!(
                "SELECT {} FROM conversations WHERE deleted = 0",
                CONVERSATION_COLS
            );
            let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
            if let Some(w) = workspace_id {
                args.push(Box::new(w));
                sql.push_str(&format!(" AND workspace_id = ?{}", args.len()));
            }
            if let Some(a) = asset_id {
                args.push(Box::new(a));
                sql.push_str(&format!(" AND asset_id = ?{}", args.len()));
            }
            sql.push_str(" ORDER BY updated_at DESC");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())),
                row_to_conversation,
            )?;
            rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
        })
    }

    /// Patches title and/or status.
    pub async fn update_conversation(
        &self,
        id: &str,
        title: Option<&str>,
        status: Option<ConversationStatus>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let title = title.map(str::to_string);
        let now = now_ms();
        self.with_conn(move |conn| {
            let mut changed = 0;
            if let Some(t) = title {
                changed += conn.execute(
                    "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3 AND deleted = 0",
                    params![t, now, id],
                )?;
            }
            if let Some(s) = status {
                changed += conn.execute(
                    "UPDATE conversations SET status = ?1, updated_at = ?2 WHERE id = ?3 AND deleted = 0",
                    params![s.as_str(), now, id],
                )?;
            }
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {}", id)));
            }
            Ok(())
        })
    }

    /// Sets a title only when none exists yet; returns whether it was set.
    /// Keeps background title generation from clobbering a user rename.
    pub async fn set_title_if_empty(&self, id: &str, title: &str) -> Result<bool, StoreError> {
        let id = id.to_string();
        let title = title.to_string();
        let now = now_ms();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 \
                 WHERE id = ?3 AND deleted = 0 AND (title IS NULL OR title = '')",
                params![title, now, id],
            )?;
            Ok(changed > 0)
        })
    }

    pub async fn touch_conversation(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        let now = now_ms();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                params![now, id],
            )?;
            Ok(())
        })
    }

    /// Soft delete; rows stay for audit but disappear from every listing.
    pub async fn delete_conversation(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE conversations SET deleted = 1 WHERE id = ?1 AND deleted = 0",
                params![id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {}", id)));
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::open_temp;
    use crate::ConversationStatus;

    #[tokio::test(flavor = "multi_thread")]
    async fn create_get_list_order() {
        let (_dir, store) = open_temp();
        let a = store
            .create_conversation(Some("first"), Some("w1"), None, None)
            .await
            .unwrap();
        let b = store
            .create_conversation(None, Some("w1"), None, None)
            .await
            .unwrap();
        store.touch_conversation(&a.id).await.unwrap();

        let got = store.get_conversation(&a.id).await.unwrap();
        assert_eq!(got.title.as_deref(), Some("first"));

        let listed = store.list_conversations(Some("w1"), None).await.unwrap();
        assert_eq!(listed.len(), 2);
        // a was touched after b's creation, so it lists first.
        assert_eq!(listed[0].id, a.id);
        assert_eq!(listed[1].id, b.id);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn soft_delete_hides_conversation() {
        let (_dir, store) = open_temp();
        let c = store.create_conversation(None, None, None, None).await.unwrap();
        store.delete_conversation(&c.id).await.unwrap();
        assert!(store.get_conversation(&c.id).await.is_err());
        assert!(store.list_conversations(None, None).await.unwrap().is_empty());
        assert!(store.delete_conversation(&c.id).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn patch_title_and_status() {
        let (_dir, store) = open_temp();
        let c = store.create_conversation(None, None, None, None).await.unwrap();
        store
            .update_conversation(&c.id, Some("renamed"), Some(ConversationStatus::Archived))
            .await
            .unwrap();
        let got = store.get_conversation(&c.id).await.unwrap();
        assert_eq!(got.title.as_deref(), Some("renamed"));
        assert_eq!(got.status, ConversationStatus::Archived);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn title_if_empty_is_one_shot() {
        let (_dir, store) = open_temp();
        let c = store.create_conversation(None, None, None, None).await.unwrap();
        assert!(store.set_title_if_empty(&c.id, "auto").await.unwrap());
        assert!(!store.set_title_if_empty(&c.id, "auto2").await.unwrap());
        let got = store.get_conversation(&c.id).await.unwrap();
        assert_eq!(got.title.as_deref(), Some("auto"));
    }
}

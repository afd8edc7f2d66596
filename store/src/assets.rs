//! Asset rows with doubly-linked sibling order.
//!
//! `prev_id`/`next_id` keep the UI tree order stable across reorders with no
//! renumbering: create appends at the tail, delete and move relink the
//! neighbors.

use rusqlite::params;
use serde_json::Value;

use crate::{new_id, now_ms, Asset, AssetKind, Store, StoreError};

const ASSET_COLS: &str = "id, name, kind, config, prev_id, next_id, created_at";

fn row_to_asset(row: &rusqlite::Row<'_>) -> rusqlite::Result<Asset> {
    let kind: String = row.get(2)?;
    let config: String = row.get(3)?;
    Ok(Asset {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: AssetKind::parse(&kind).unwrap_or(AssetKind::FolderGroup),
        config: serde_json::from_str(&config).unwrap_or_default(),
        prev_id: row.get(4)?,
        next_id: row.get(5)?,
        created_at_ms: row.get(6)?,
    })
}

fn get_asset_sync(conn: &rusqlite::Connection, id: &str) -> Result<Asset, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM assets WHERE id = ?1", ASSET_COLS),
        params![id],
        row_to_asset,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("asset {}", id)),
        other => other.into(),
    })
}

fn set_links(
    conn: &rusqlite::Connection,
    id: &str,
    prev: Option<&str>,
    next: Option<&str>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE assets SET prev_id = ?1, next_id = ?2 WHERE id = ?3",
        params![prev, next, id],
    )?;
    Ok(())
}

/// Detaches `asset` from the chain, relinking its neighbors to each other.
fn unlink(conn: &rusqlite::Connection, asset: &Asset) -> Result<(), StoreError> {
    if let Some(prev) = &asset.prev_id {
        conn.execute(
            "UPDATE assets SET next_id = ?1 WHERE id = ?2",
            params![asset.next_id, prev],
        )?;
    }
    if let Some(next) = &asset.next_id {
        conn.execute(
            "UPDATE assets SET prev_id = ?1 WHERE id = ?2",
            params![asset.prev_id, next],
        )?;
    }
    Ok(())
}

fn tail_id(conn: &rusqlite::Connection) -> Result<Option<String>, StoreError> {
    let mut stmt = conn.prepare("SELECT id FROM assets WHERE next_id IS NULL")?;
    let mut rows = stmt.query([])?;
    match rows.next()? {
        Some(row) => Ok(Some(row.get(0)?)),
        None => Ok(None),
    }
}

impl Store {
    /// Creates an asset at the tail of the sibling chain.
    pub async fn create_asset(
        &self,
        name: &str,
        kind: AssetKind,
        config: Value,
    ) -> Result<Asset, StoreError> {
        let id = new_id();
        let now = now_ms();
        let name = name.to_string();
        let config_json = serde_json::to_string(&config)
            .map_err(|e| StoreError::Storage(format!("serialize config: {}", e)))?;
        let created_id = id.clone();
        self.with_conn(move |conn| {
            let tail = tail_id(conn)?;
            conn.execute(
                &format!(
                    "INSERT INTO assets ({}) VALUES (?1, ?2, ?3, ?4, ?5, NULL, ?6)",
                    ASSET_COLS
                ),
                params![created_id, name, kind.as_str(), config_json, tail, now],
            )?;
            if let Some(tail) = tail {
                conn.execute(
                    "UPDATE assets SET next_id = ?1 WHERE id = ?2",
                    params![created_id, tail],
                )?;
            }
            Ok(())
        })?;
        self.get_asset(&id).await
    }

    pub async fn get_asset(&self, id: &str) -> Result<Asset, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| get_asset_sync(conn, &id))
    }

    /// All assets in chain order (head first). Orphans from interrupted
    /// writes are appended at the end rather than lost.
    pub async fn list_assets(&self) -> Result<Vec<Asset>, StoreError> {
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM assets ORDER BY created_at ASC",
                ASSET_COLS
            ))?;
            let rows = stmt.query_map([], row_to_asset)?;
            let all: Vec<Asset> = rows.collect::<Result<Vec<_>, _>>()?;
            let index: std::collections::HashMap<&str, &Asset> =
                all.iter().map(|a| (a.id.as_str(), a)).collect();
            let mut ordered = Vec::with_capacity(all.len());
            let mut seen = std::collections::HashSet::new();
            let mut cursor = all.iter().find(|a| a.prev_id.is_none()).map(|a| a.id.clone());
            while let Some(id) = cursor {
                if !seen.insert(id.clone()) {
                    break;
                }
                if let Some(asset) = index.get(id.as_str()) {
                    ordered.push((*asset).clone());
                    cursor = asset.next_id.clone();
                } else {
                    break;
                }
            }
            for asset in &all {
                if !seen.contains(&asset.id) {
                    ordered.push(asset.clone());
                }
            }
            Ok(ordered)
        })
    }

    pub async fn update_asset(
        &self,
        id: &str,
        name: Option<&str>,
        config: Option<Value>,
    ) -> Result<(), StoreError> {
        let id = id.to_string();
        let name = name.map(str::to_string);
        let config_json = match config {
            Some(c) => Some(
                serde_json::to_string(&c)
                    .map_err(|e| StoreError::Storage(format!("serialize config: {}", e)))?,
            ),
            None => None,
        };
        self.with_conn(move |conn| {
            get_asset_sync(conn, &id)?;
            if let Some(n) = name {
                conn.execute("UPDATE assets SET name = ?1 WHERE id = ?2", params![n, id])?;
            }
            if let Some(c) = config_json {
                conn.execute(
                    "UPDATE assets SET config = ?1 WHERE id = ?2",
                    params![c, id],
                )?;
            }
            Ok(())
        })
    }

    pub async fn delete_asset(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let asset = get_asset_sync(conn, &id)?;
            unlink(conn, &asset)?;
            conn.execute("DELETE FROM assets WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    /// Moves an asset after `after` (or to the head when `after` is None),
    /// relinking both old and new neighbors.
    pub async fn reorder_asset(&self, id: &str, after: Option<&str>) -> Result<(), StoreError> {
        let id = id.to_string();
        let after = after.map(str::to_string);
        self.with_conn(move |conn| {
            let asset = get_asset_sync(conn, &id)?;
            if after.as_deref() == Some(asset.id.as_str()) {
                return Err(StoreError::Conflict("cannot move an asset after itself".into()));
            }
            unlink(conn, &asset)?;
            match after {
                Some(after_id) => {
                    // Fetched after unlink so a neighboring anchor's links are current.
                    let anchor = get_asset_sync(conn, &after_id)?;
                    set_links(conn, &id, Some(&anchor.id), anchor.next_id.as_deref())?;
                    if let Some(next) = &anchor.next_id {
                        conn.execute(
                            "UPDATE assets SET prev_id = ?1 WHERE id = ?2",
                            params![id, next],
                        )?;
                    }
                    conn.execute(
                        "UPDATE assets SET next_id = ?1 WHERE id = ?2",
                        params![id, anchor.id],
                    )?;
                }
                None => {
                    let mut stmt =
                        conn.prepare("SELECT id FROM assets WHERE prev_id IS NULL AND id != ?1")?;
                    let head: Option<String> = {
                        let mut rows = stmt.query(params![id])?;
                        match rows.next()? {
                            Some(row) => Some(row.get(0)?),
                            None => None,
                        }
                    };
                    set_links(conn, &id, None, head.as_deref())?;
                    if let Some(head) = head {
                        conn.execute(
                            "UPDATE assets SET prev_id = ?1 WHERE id = ?2",
                            params![id, head],
                        )?;
                    }
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::open_temp;

    async fn names(store: &Store) -> Vec<String> {
        store
            .list_assets()
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn create_appends_in_chain_order() {
        let (_dir, store) = open_temp();
        for n in ["a", "b", "c"] {
            store
                .create_asset(n, AssetKind::SshHost, serde_json::json!({}))
                .await
                .unwrap();
        }
        assert_eq!(names(&store).await, ["a", "b", "c"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delete_relinks_neighbors() {
        let (_dir, store) = open_temp();
        let mut ids = Vec::new();
        for n in ["a", "b", "c"] {
            ids.push(
                store
                    .create_asset(n, AssetKind::SshHost, serde_json::json!({}))
                    .await
                    .unwrap()
                    .id,
            );
        }
        store.delete_asset(&ids[1]).await.unwrap();
        assert_eq!(names(&store).await, ["a", "c"]);
        let a = store.get_asset(&ids[0]).await.unwrap();
        assert_eq!(a.next_id.as_deref(), Some(ids[2].as_str()));
        let c = store.get_asset(&ids[2]).await.unwrap();
        assert_eq!(c.prev_id.as_deref(), Some(ids[0].as_str()));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn reorder_moves_without_renumbering() {
        let (_dir, store) = open_temp();
        let mut ids = Vec::new();
        for n in ["a", "b", "c"] {
            ids.push(
                store
                    .create_asset(n, AssetKind::SshHost, serde_json::json!({}))
                    .await
                    .unwrap()
                    .id,
            );
        }
        // c to the head
        store.reorder_asset(&ids[2], None).await.unwrap();
        assert_eq!(names(&store).await, ["c", "a", "b"]);
        // a after b
        store.reorder_asset(&ids[0], Some(&ids[1])).await.unwrap();
        assert_eq!(names(&store).await, ["c", "b", "a"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn asset_config_round_trips() {
        let (_dir, store) = open_temp();
        let asset = store
            .create_asset(
                "box",
                AssetKind::SshHost,
                serde_json::json!({"host": "10.0.0.2", "port": 2222, "username": "ops"}),
            )
            .await
            .unwrap();
        let got = store.get_asset(&asset.id).await.unwrap();
        assert_eq!(got.config["host"], "10.0.0.2");
        store
            .update_asset(&asset.id, Some("box2"), None)
            .await
            .unwrap();
        assert_eq!(store.get_asset(&asset.id).await.unwrap().name, "box2");
    }
}

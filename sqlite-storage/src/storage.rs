use async_trait::async_trait;
use mule_bpa::store::{BundlePack, BundleStore, Constraints, Result, StoreError};
use mule_bpv7::{bundle::Bundle, eid::Eid};
use rusqlite::OptionalExtension;
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

pub struct Storage {
    connection: Mutex<rusqlite::Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_eid(s: String) -> Result<Eid> {
    s.parse()
        .map_err(|e| StoreError::InvalidData(format!("bad EID in store: {e}")))
}

fn row_to_pack(row: &rusqlite::Row) -> rusqlite::Result<(String, String, String, u64, u64, u8)> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get::<_, i64>(3)? as u64,
        row.get::<_, i64>(4)? as u64,
        row.get::<_, i64>(5)? as u8,
    ))
}

fn unpack(row: (String, String, String, u64, u64, u8)) -> Result<BundlePack> {
    let (id, source, destination, creation_time, size, constraints) = row;
    Ok(BundlePack {
        id,
        source: parse_eid(source)?,
        destination: parse_eid(destination)?,
        creation_time,
        size,
        constraints: Constraints::from_bits(constraints),
    })
}

impl Storage {
    /// Opens (or creates) `bundles.db` under the working directory.
    pub fn open(workdir: &Path) -> Result<Self> {
        std::fs::create_dir_all(workdir)
            .map_err(|e| StoreError::Database(format!("cannot create {}: {e}", workdir.display())))?;
        let path = workdir.join(crate::DB_FILE);
        info!("Opening bundle store {}", path.display());

        let mut connection = rusqlite::Connection::open(&path).map_err(db_err)?;
        crate::migrate::migrate(&mut connection).map_err(db_err)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let mut connection = rusqlite::Connection::open_in_memory().map_err(db_err)?;
        crate::migrate::migrate(&mut connection).map_err(db_err)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    /// Ids still holding a processing constraint from a previous run;
    /// the daemon re-dispatches these at boot.
    pub fn pending_ids(&self) -> Result<Vec<String>> {
        let pending = (Constraints::DISPATCH_PENDING.bits()
            | Constraints::FORWARD_PENDING.bits()) as i64;
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        let mut statement = connection
            .prepare("SELECT id FROM bundle_metadata WHERE (constraints & ?1) != 0")
            .map_err(db_err)?;
        let rows = statement
            .query_map([pending], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(db_err)
    }
}

#[async_trait]
impl BundleStore for Storage {
    async fn push(&self, bundle: &Bundle) -> Result<()> {
        let data = bundle.to_cbor();
        let pack = BundlePack::new(bundle, data.len() as u64);

        let mut connection = self.connection.lock().expect("sqlite lock poisoned");
        let tx = connection.transaction().map_err(db_err)?;
        tx.execute(
            "INSERT INTO bundles (id, data) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET data = excluded.data",
            rusqlite::params![pack.id, data],
        )
        .map_err(db_err)?;
        // First push creates the descriptor; replays keep its constraints
        tx.execute(
            "INSERT OR IGNORE INTO bundle_metadata
             (id, source, destination, creation_time, size, constraints)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                pack.id,
                pack.source.to_string(),
                pack.destination.to_string(),
                pack.creation_time as i64,
                pack.size as i64,
                pack.constraints.bits() as i64,
            ],
        )
        .map_err(db_err)?;
        tx.commit().map_err(db_err)
    }

    async fn update_metadata(&self, pack: &BundlePack) -> Result<()> {
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        let updated = connection
            .execute(
                "UPDATE bundle_metadata SET source = ?2, destination = ?3,
                 creation_time = ?4, size = ?5, constraints = ?6 WHERE id = ?1",
                rusqlite::params![
                    pack.id,
                    pack.source.to_string(),
                    pack.destination.to_string(),
                    pack.creation_time as i64,
                    pack.size as i64,
                    pack.constraints.bits() as i64,
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StoreError::BundleNotFound(pack.id.clone()));
        }
        Ok(())
    }

    async fn remove(&self, id: &str) -> Result<()> {
        // The FK cascade takes the metadata row with the bytes
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        let removed = connection
            .execute("DELETE FROM bundles WHERE id = ?1", [id])
            .map_err(db_err)?;
        if removed == 0 {
            return Err(StoreError::BundleNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn count(&self) -> u64 {
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        connection
            .query_row("SELECT COUNT(*) FROM bundles", [], |row| {
                row.get::<_, i64>(0)
            })
            .unwrap_or(0) as u64
    }

    async fn all_ids(&self) -> Vec<String> {
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        let Ok(mut statement) = connection.prepare("SELECT id FROM bundle_metadata") else {
            return Vec::new();
        };
        statement
            .query_map([], |row| row.get::<_, String>(0))
            .map(|rows| rows.flatten().collect())
            .unwrap_or_default()
    }

    async fn all_bundles(&self) -> Vec<BundlePack> {
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        let Ok(mut statement) = connection.prepare(
            "SELECT id, source, destination, creation_time, size, constraints
             FROM bundle_metadata",
        ) else {
            return Vec::new();
        };
        statement
            .query_map([], row_to_pack)
            .map(|rows| rows.flatten().filter_map(|r| unpack(r).ok()).collect())
            .unwrap_or_default()
    }

    async fn has_item(&self, id: &str) -> bool {
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        connection
            .query_row(
                "SELECT 1 FROM bundle_metadata WHERE id = ?1",
                [id],
                |_| Ok(()),
            )
            .optional()
            .map(|r| r.is_some())
            .unwrap_or(false)
    }

    async fn get_bundle(&self, id: &str) -> Option<Bundle> {
        let data = {
            let connection = self.connection.lock().expect("sqlite lock poisoned");
            connection
                .query_row("SELECT data FROM bundles WHERE id = ?1", [id], |row| {
                    row.get::<_, Vec<u8>>(0)
                })
                .optional()
                .ok()
                .flatten()?
        };
        Bundle::from_cbor(&data).ok()
    }

    async fn get_metadata(&self, id: &str) -> Option<BundlePack> {
        let connection = self.connection.lock().expect("sqlite lock poisoned");
        connection
            .query_row(
                "SELECT id, source, destination, creation_time, size, constraints
                 FROM bundle_metadata WHERE id = ?1",
                [id],
                row_to_pack,
            )
            .optional()
            .ok()
            .flatten()
            .and_then(|row| unpack(row).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mule_bpv7::builder::Builder;
    use mule_bpv7::creation_timestamp::CreationTimestamp;
    use mule_bpv7::dtn_time::DtnTime;

    fn bundle_at(seq: u64) -> Bundle {
        Builder::new(
            "dtn://a/app".parse().unwrap(),
            "dtn://b/app".parse().unwrap(),
        )
        .timestamp(CreationTimestamp::new(DtnTime::new(9000), seq))
        .payload(b"persistent".to_vec())
        .build()
    }

    #[tokio::test]
    async fn push_round_trip() {
        let store = Storage::open_in_memory().unwrap();
        let bundle = bundle_at(0);
        let id = bundle.id().to_string();

        store.push(&bundle).await.unwrap();
        assert_eq!(store.count().await, 1);
        assert!(store.has_item(&id).await);

        let loaded = store.get_bundle(&id).await.unwrap();
        assert_eq!(loaded.to_cbor(), bundle.to_cbor());

        let pack = store.get_metadata(&id).await.unwrap();
        assert_eq!(pack.source.to_string(), "dtn://a/app");
        assert_eq!(pack.creation_time, 9000);
    }

    #[tokio::test]
    async fn replay_preserves_constraints() {
        let store = Storage::open_in_memory().unwrap();
        let bundle = bundle_at(0);
        let id = bundle.id().to_string();
        store.push(&bundle).await.unwrap();

        let mut pack = store.get_metadata(&id).await.unwrap();
        pack.constraints.insert(Constraints::FORWARD_PENDING);
        store.update_metadata(&pack).await.unwrap();

        store.push(&bundle).await.unwrap();
        assert!(store
            .get_metadata(&id)
            .await
            .unwrap()
            .constraints
            .contains(Constraints::FORWARD_PENDING));
    }

    #[tokio::test]
    async fn cascade_delete() {
        let store = Storage::open_in_memory().unwrap();
        let bundle = bundle_at(0);
        let id = bundle.id().to_string();
        store.push(&bundle).await.unwrap();

        store.remove(&id).await.unwrap();
        assert_eq!(store.count().await, 0);
        assert!(!store.has_item(&id).await);
        assert!(store.get_metadata(&id).await.is_none());
        assert!(matches!(
            store.remove(&id).await,
            Err(StoreError::BundleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn pending_recovery() {
        let store = Storage::open_in_memory().unwrap();
        let held = bundle_at(0);
        let done = bundle_at(1);
        store.push(&held).await.unwrap();
        store.push(&done).await.unwrap();

        let mut pack = store.get_metadata(&held.id().to_string()).await.unwrap();
        pack.constraints.insert(Constraints::FORWARD_PENDING);
        store.update_metadata(&pack).await.unwrap();

        assert_eq!(store.pending_ids().unwrap(), vec![held.id().to_string()]);
    }

    #[tokio::test]
    async fn update_missing_metadata_fails() {
        let store = Storage::open_in_memory().unwrap();
        let pack = BundlePack::new(&bundle_at(0), 10);
        assert!(matches!(
            store.update_metadata(&pack).await,
            Err(StoreError::BundleNotFound(_))
        ));
    }
}

//! Catalog persistence backed by SQLite
//!
//! Holds the ordered set of disk items plus the `max_devices` setting.
//! Settings reads are hot (every allocation scan bound) and go through an
//! `ArcSwap` cache; item reads always hit the database.

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use super::types::{DiskItem, DiskMode};
use crate::error::{AppError, Result};

/// Durable user preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Number of LUN slots the gadget is initialized with
    pub max_devices: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self { max_devices: 1 }
    }
}

/// Catalog change event
#[derive(Debug, Clone)]
pub struct CatalogChange {
    /// Changed item id; None for settings changes
    pub id: Option<String>,
}

/// SQLite-backed catalog store
#[derive(Clone)]
pub struct CatalogStore {
    pool: Pool<Sqlite>,
    /// Lock-free settings cache
    settings: Arc<ArcSwap<Settings>>,
    change_tx: broadcast::Sender<CatalogChange>,
}

impl CatalogStore {
    /// Open (or create) the catalog database
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

        let pool = SqlitePoolOptions::new()
            // SQLite is single-writer; 2 connections keep reads from
            // blocking behind writes on embedded devices
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(5))
            .idle_timeout(Duration::from_secs(300))
            .connect(&db_url)
            .await?;

        Self::init_schema(&pool).await?;

        let settings = Self::load_settings(&pool).await?;
        let settings = Arc::new(ArcSwap::from_pointee(settings));

        let (change_tx, _) = broadcast::channel(16);

        Ok(Self {
            pool,
            settings,
            change_tx,
        })
    }

    async fn init_schema(pool: &Pool<Sqlite>) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS disk_items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                mode TEXT NOT NULL,
                path TEXT,
                lun_id INTEGER,
                disk_size_gb REAL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )
            "#,
        )
        .execute(pool)
        .await?;

        Ok(())
    }

    async fn load_settings(pool: &Pool<Sqlite>) -> Result<Settings> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM settings WHERE key = 'settings'")
                .fetch_optional(pool)
                .await?;

        match row {
            Some((json,)) => {
                let mut settings: Settings = serde_json::from_str(&json)?;
                settings.max_devices = settings.max_devices.max(1);
                Ok(settings)
            }
            None => {
                let settings = Settings::default();
                Self::save_settings_to_db(pool, &settings).await?;
                Ok(settings)
            }
        }
    }

    async fn save_settings_to_db(pool: &Pool<Sqlite>, settings: &Settings) -> Result<()> {
        let json = serde_json::to_string(settings)?;
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES ('settings', ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(json)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Current max device count (cached, clamped ≥ 1)
    pub fn max_devices(&self) -> u32 {
        self.settings.load().max_devices
    }

    /// Persist a new max device count, clamped to ≥ 1.
    ///
    /// Takes effect on the slot *count* only after the next gadget
    /// re-initialization; allocation bounds pick it up immediately.
    pub async fn set_max_devices(&self, count: u32) -> Result<u32> {
        let count = count.max(1);
        let settings = Settings { max_devices: count };
        Self::save_settings_to_db(&self.pool, &settings).await?;
        self.settings.store(Arc::new(settings));
        self.notify(None);
        Ok(count)
    }

    /// All items in stable catalog order
    pub async fn list(&self) -> Result<Vec<DiskItem>> {
        let rows: Vec<RowTuple> = sqlx::query_as(
            "SELECT id, name, mode, path, lun_id, disk_size_gb, created_at \
             FROM disk_items ORDER BY created_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(item_from_row).collect()
    }

    /// Fetch one item by id
    pub async fn get(&self, id: &str) -> Result<DiskItem> {
        let row: Option<RowTuple> = sqlx::query_as(
            "SELECT id, name, mode, path, lun_id, disk_size_gb, created_at \
             FROM disk_items WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => item_from_row(row),
            None => Err(AppError::NotFound(format!("Disk item not found: {}", id))),
        }
    }

    /// Append a new item
    pub async fn append(&self, item: &DiskItem) -> Result<()> {
        sqlx::query(
            "INSERT INTO disk_items (id, name, mode, path, lun_id, disk_size_gb, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.mode.as_str())
        .bind(item.path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(item.lun_id().map(|l| l as i64))
        .bind(item.disk_size_gb)
        .bind(item.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        self.notify(Some(item.id.clone()));
        Ok(())
    }

    /// Replace an existing item by id
    pub async fn replace(&self, item: &DiskItem) -> Result<()> {
        let result = sqlx::query(
            "UPDATE disk_items SET name = ?, mode = ?, path = ?, lun_id = ?, disk_size_gb = ? \
             WHERE id = ?",
        )
        .bind(&item.name)
        .bind(item.mode.as_str())
        .bind(item.path.as_ref().map(|p| p.to_string_lossy().into_owned()))
        .bind(item.lun_id().map(|l| l as i64))
        .bind(item.disk_size_gb)
        .bind(&item.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "Disk item not found: {}",
                item.id
            )));
        }
        self.notify(Some(item.id.clone()));
        Ok(())
    }

    /// Remove an item; refused while it is mounted
    pub async fn remove(&self, id: &str) -> Result<()> {
        let item = self.get(id).await?;
        if item.is_active() {
            return Err(AppError::InvalidInput(
                "Cannot remove a mounted item; eject it first".to_string(),
            ));
        }

        sqlx::query("DELETE FROM disk_items WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        self.notify(Some(id.to_string()));
        Ok(())
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<CatalogChange> {
        self.change_tx.subscribe()
    }

    fn notify(&self, id: Option<String>) {
        let _ = self.change_tx.send(CatalogChange { id });
    }
}

type RowTuple = (
    String,
    String,
    String,
    Option<String>,
    Option<i64>,
    Option<f64>,
    String,
);

fn item_from_row(row: RowTuple) -> Result<DiskItem> {
    let (id, name, mode, path, lun_id, disk_size_gb, created_at) = row;
    let mode: DiskMode = mode
        .parse()
        .map_err(|e: String| AppError::Internal(e))?;
    let created_at = chrono::DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| AppError::Internal(format!("Bad created_at timestamp: {}", e)))?
        .with_timezone(&chrono::Utc);

    Ok(DiskItem::from_row(
        id,
        name,
        mode,
        path.map(PathBuf::from),
        lun_id.map(|l| l as u32),
        disk_size_gb,
        created_at,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open(dir: &TempDir) -> CatalogStore {
        CatalogStore::new(&dir.path().join("catalog.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_list_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let iso = DiskItem::new_iso("boot", PathBuf::from("/sdcard/boot.iso"));
        let disk = DiskItem::new_disk("disk1", PathBuf::from("/sdcard/images"), 2.5);
        store.append(&iso).await.unwrap();
        store.append(&disk).await.unwrap();

        let items = store.list().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].name, "boot");
        assert_eq!(items[1].mode, DiskMode::Disk);
        assert_eq!(items[1].disk_size_gb, Some(2.5));
    }

    #[tokio::test]
    async fn test_replace_persists_mount_state() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut item = DiskItem::new_iso("boot", PathBuf::from("/sdcard/boot.iso"));
        store.append(&item).await.unwrap();

        item.set_mounted(1);
        store.replace(&item).await.unwrap();

        let loaded = store.get(&item.id).await.unwrap();
        assert!(loaded.is_active());
        assert_eq!(loaded.lun_id(), Some(1));
    }

    #[tokio::test]
    async fn test_replace_unknown_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let item = DiskItem::new_iso("ghost", PathBuf::from("/x.iso"));
        assert!(matches!(
            store.replace(&item).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_refused_while_active() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut item = DiskItem::new_iso("boot", PathBuf::from("/x.iso"));
        store.append(&item).await.unwrap();
        item.set_mounted(0);
        store.replace(&item).await.unwrap();

        assert!(matches!(
            store.remove(&item.id).await,
            Err(AppError::InvalidInput(_))
        ));

        item.set_ejected();
        store.replace(&item).await.unwrap();
        store.remove(&item.id).await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_max_devices_clamped_and_persisted() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        assert_eq!(store.max_devices(), 1);
        assert_eq!(store.set_max_devices(0).await.unwrap(), 1);
        assert_eq!(store.set_max_devices(4).await.unwrap(), 4);
        assert_eq!(store.max_devices(), 4);

        // Survives reopen
        drop(store);
        let store = open(&dir).await;
        assert_eq!(store.max_devices(), 4);
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        let mut rx = store.subscribe();

        let item = DiskItem::new_iso("boot", PathBuf::from("/x.iso"));
        store.append(&item).await.unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.id.as_deref(), Some(item.id.as_str()));
    }
}

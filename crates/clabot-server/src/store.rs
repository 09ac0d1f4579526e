use chrono::Utc;
use clabot_contracts::{AirtableRecord, AirtableRecords};
use clabot_kernel::{airtable_filter_formula, AcceptanceRecord};
use reqwest::{Client, Url};
use rusqlite::{params, Connection};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{expect_success, ServiceError};

const AIRTABLE: &str = "airtable";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    AlreadyPresent,
}

/// Record store of accepted identities.
///
/// Every operation holds the backend lock for its full duration, so the check-then-insert in
/// [`RecordStore::append`] never interleaves within one process. Writers in other processes
/// can still race unless the backend enforces uniqueness (sqlite does).
pub struct RecordStore {
    backend: Mutex<StoreBackend>,
}

enum StoreBackend {
    Memory(MemoryStore),
    Sqlite(SqliteStore),
    Airtable(AirtableStore),
}

#[derive(Default)]
struct MemoryStore {
    records: Vec<AcceptanceRecord>,
}

struct SqliteStore {
    conn: std::sync::Mutex<Connection>,
}

struct AirtableStore {
    client: Client,
    table_url: Url,
    api_key: SecretString,
    name_field: String,
    notes_field: String,
}

impl RecordStore {
    pub fn memory() -> Self {
        Self::with_backend(StoreBackend::Memory(MemoryStore::default()))
    }

    pub fn sqlite(path: &str) -> Result<Self, ServiceError> {
        Ok(Self::with_backend(StoreBackend::Sqlite(SqliteStore::new(
            path,
        )?)))
    }

    pub fn airtable(cfg: &clabot_config::Airtable, client: Client) -> Result<Self, ServiceError> {
        Ok(Self::with_backend(StoreBackend::Airtable(
            AirtableStore::new(cfg, client)?,
        )))
    }

    pub fn from_config(
        cfg: &clabot_config::RecordStore,
        client: Client,
    ) -> Result<Self, ServiceError> {
        match cfg.kind.as_str() {
            "memory" => Ok(Self::memory()),
            "sqlite" => {
                let path = cfg.sqlite_path.as_deref().ok_or_else(|| {
                    ServiceError::Setup("record_store.sqlite_path is required".to_string())
                })?;
                Self::sqlite(path)
            }
            "airtable" => {
                let airtable = cfg.airtable.as_ref().ok_or_else(|| {
                    ServiceError::Setup("record_store.airtable is required".to_string())
                })?;
                Self::airtable(airtable, client)
            }
            other => Err(ServiceError::Setup(format!(
                "unsupported record_store.type={other}"
            ))),
        }
    }

    fn with_backend(backend: StoreBackend) -> Self {
        Self {
            backend: Mutex::new(backend),
        }
    }

    pub async fn exists(&self, name: &str) -> Result<bool, ServiceError> {
        Ok(self.count(name).await? > 0)
    }

    /// Number of rows whose name matches exactly.
    pub async fn count(&self, name: &str) -> Result<usize, ServiceError> {
        let backend = self.backend.lock().await;
        backend.count(name).await
    }

    /// Notes stored with every row for `name`, in insertion order where the backend keeps one.
    pub async fn notes(&self, name: &str) -> Result<Vec<String>, ServiceError> {
        let backend = self.backend.lock().await;
        backend.notes(name).await
    }

    /// Inserts `record` unless a row with the same name already exists.
    pub async fn append(&self, record: &AcceptanceRecord) -> Result<AppendOutcome, ServiceError> {
        let mut backend = self.backend.lock().await;
        if backend.count(&record.name).await? > 0 {
            debug!(name = %record.name, "acceptance already recorded");
            return Ok(AppendOutcome::AlreadyPresent);
        }
        let outcome = backend.insert(record).await?;
        if outcome == AppendOutcome::Inserted {
            info!(name = %record.name, "acceptance recorded");
        }
        Ok(outcome)
    }
}

impl StoreBackend {
    async fn count(&self, name: &str) -> Result<usize, ServiceError> {
        match self {
            StoreBackend::Memory(store) => {
                Ok(store.records.iter().filter(|r| r.name == name).count())
            }
            StoreBackend::Sqlite(store) => store.count(name),
            StoreBackend::Airtable(store) => store.count(name).await,
        }
    }

    async fn notes(&self, name: &str) -> Result<Vec<String>, ServiceError> {
        match self {
            StoreBackend::Memory(store) => Ok(store
                .records
                .iter()
                .filter(|r| r.name == name)
                .map(|r| r.note.clone())
                .collect()),
            StoreBackend::Sqlite(store) => store.notes(name),
            StoreBackend::Airtable(store) => store.notes(name).await,
        }
    }

    async fn insert(&mut self, record: &AcceptanceRecord) -> Result<AppendOutcome, ServiceError> {
        match self {
            StoreBackend::Memory(store) => {
                store.records.push(record.clone());
                Ok(AppendOutcome::Inserted)
            }
            StoreBackend::Sqlite(store) => store.insert(record),
            StoreBackend::Airtable(store) => store.insert(record).await,
        }
    }
}

impl SqliteStore {
    fn new(path: &str) -> Result<Self, ServiceError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS acceptance_records (
                name TEXT NOT NULL UNIQUE,
                note TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            ",
        )?;
        Ok(Self {
            conn: std::sync::Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, ServiceError> {
        self.conn
            .lock()
            .map_err(|_| ServiceError::Store("sqlite connection lock poisoned".to_string()))
    }

    fn count(&self, name: &str) -> Result<usize, ServiceError> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(*) FROM acceptance_records WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    fn notes(&self, name: &str) -> Result<Vec<String>, ServiceError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT note FROM acceptance_records WHERE name = ?1 ORDER BY rowid")?;
        let notes = stmt
            .query_map(params![name], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(notes)
    }

    fn insert(&self, record: &AcceptanceRecord) -> Result<AppendOutcome, ServiceError> {
        let changed = self.conn()?.execute(
            "INSERT OR IGNORE INTO acceptance_records(name, note, recorded_at) VALUES (?1, ?2, ?3)",
            params![record.name, record.note, Utc::now().to_rfc3339()],
        )?;
        Ok(if changed == 0 {
            AppendOutcome::AlreadyPresent
        } else {
            AppendOutcome::Inserted
        })
    }
}

impl AirtableStore {
    fn new(cfg: &clabot_config::Airtable, client: Client) -> Result<Self, ServiceError> {
        let mut table_url = Url::parse(&cfg.api_base_url)
            .map_err(|e| ServiceError::Setup(format!("invalid airtable api_base_url: {e}")))?;
        table_url
            .path_segments_mut()
            .map_err(|_| {
                ServiceError::Setup("airtable api_base_url must be a hierarchical URL".to_string())
            })?
            .pop_if_empty()
            .extend(["v0", cfg.base_id.as_str(), cfg.table_name.as_str()]);
        Ok(Self {
            client,
            table_url,
            api_key: cfg.api_key.clone(),
            name_field: cfg.name_field.clone(),
            notes_field: cfg.notes_field.clone(),
        })
    }

    async fn count(&self, name: &str) -> Result<usize, ServiceError> {
        Ok(self.find(name).await?.len())
    }

    async fn notes(&self, name: &str) -> Result<Vec<String>, ServiceError> {
        Ok(self
            .find(name)
            .await?
            .into_iter()
            .filter_map(|record| match record.fields.get(&self.notes_field) {
                Some(Value::String(note)) => Some(note.clone()),
                _ => None,
            })
            .collect())
    }

    async fn find(&self, name: &str) -> Result<Vec<AirtableRecord>, ServiceError> {
        let formula = airtable_filter_formula(&self.name_field, name);
        debug!(%formula, "querying airtable");

        let mut found = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut query = vec![("filterByFormula", formula.clone())];
            if let Some(o) = offset.take() {
                query.push(("offset", o));
            }
            let response = self
                .client
                .get(self.table_url.clone())
                .bearer_auth(self.api_key.expose_secret())
                .query(&query)
                .send()
                .await
                .map_err(|e| ServiceError::transport(AIRTABLE, e))?;
            let page: AirtableRecords = expect_success(AIRTABLE, response)
                .await?
                .json()
                .await
                .map_err(|e| ServiceError::decode(AIRTABLE, e))?;
            found.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(found)
    }

    async fn insert(&self, record: &AcceptanceRecord) -> Result<AppendOutcome, ServiceError> {
        let mut fields = Map::new();
        fields.insert(self.name_field.clone(), Value::String(record.name.clone()));
        fields.insert(self.notes_field.clone(), Value::String(record.note.clone()));
        let body = AirtableRecords {
            records: vec![AirtableRecord {
                id: None,
                fields,
                created_time: None,
            }],
            offset: None,
        };

        let response = self
            .client
            .post(self.table_url.clone())
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| ServiceError::transport(AIRTABLE, e))?;
        let created: AirtableRecords = expect_success(AIRTABLE, response)
            .await?
            .json()
            .await
            .map_err(|e| ServiceError::decode(AIRTABLE, e))?;
        debug!(
            ids = ?created.records.iter().filter_map(|r| r.id.as_deref()).collect::<Vec<_>>(),
            "airtable records created"
        );
        Ok(AppendOutcome::Inserted)
    }
}

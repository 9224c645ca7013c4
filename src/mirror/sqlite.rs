//! SQLite-backed mirror

use super::{Document, Filter};
use crate::config::MirrorSettings;
use crate::{HashiError, Result};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Mirror configuration
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Path to SQLite database file
    pub path: PathBuf,

    /// Enable WAL mode so readers don't block the writer
    pub wal_mode: bool,
}

impl From<&MirrorSettings> for MirrorConfig {
    fn from(settings: &MirrorSettings) -> Self {
        Self {
            path: settings.path.clone(),
            wal_mode: true,
        }
    }
}

/// Handle to the mirror database; clones share one connection
#[derive(Clone)]
pub struct Mirror {
    conn: Arc<Mutex<Connection>>,
}

impl Mirror {
    /// Open or create a mirror database
    pub fn open(config: &MirrorConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        tracing::info!(path = %config.path.display(), "Opening mirror database");

        let conn = Connection::open(&config.path)?;
        if config.wal_mode {
            conn.pragma_update(None, "journal_mode", "WAL")?;
        }

        Self::with_connection(conn)
    }

    /// A private in-memory mirror
    pub fn in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let mirror = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        mirror.init_schema()?;
        Ok(mirror)
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS documents (
                    collection TEXT NOT NULL,
                    id TEXT NOT NULL,
                    data TEXT NOT NULL,
                    synced_at TEXT NOT NULL,
                    PRIMARY KEY (collection, id)
                );

                CREATE VIRTUAL TABLE IF NOT EXISTS document_text USING fts5(
                    collection UNINDEXED,
                    id UNINDEXED,
                    body
                );
                "#,
            )?;
            Ok(())
        })
    }

    fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| HashiError::Storage("mirror connection lock poisoned".to_string()))?;
        f(&mut conn)
    }

    /// Insert or replace one record by its remote id
    pub fn upsert<T: Document>(&self, doc: &T) -> Result<()> {
        self.upsert_all(std::slice::from_ref(doc)).map(|_| ())
    }

    /// Upsert a batch of records in one transaction
    pub fn upsert_all<T: Document>(&self, docs: &[T]) -> Result<usize> {
        if docs.is_empty() {
            return Ok(0);
        }

        let synced_at = Utc::now().to_rfc3339();
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            for doc in docs {
                let id = doc.document_id();
                let data = serde_json::to_string(doc)?;
                tx.execute(
                    r#"
                    INSERT INTO documents (collection, id, data, synced_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT (collection, id)
                    DO UPDATE SET data = excluded.data, synced_at = excluded.synced_at
                    "#,
                    params![T::COLLECTION, id, data, synced_at],
                )?;

                if let Some(text) = doc.search_text() {
                    tx.execute(
                        "DELETE FROM document_text WHERE collection = ?1 AND id = ?2",
                        params![T::COLLECTION, id],
                    )?;
                    tx.execute(
                        "INSERT INTO document_text (collection, id, body) VALUES (?1, ?2, ?3)",
                        params![T::COLLECTION, id, text],
                    )?;
                }
            }
            tx.commit()?;
            Ok(())
        })?;

        tracing::debug!(collection = T::COLLECTION, count = docs.len(), "Upserted documents");
        Ok(docs.len())
    }

    /// Fetch one record by remote id
    pub fn get<T: Document>(&self, id: &str) -> Result<Option<T>> {
        let data: Option<String> = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    "SELECT data FROM documents WHERE collection = ?1 AND id = ?2",
                    params![T::COLLECTION, id],
                    |row| row.get(0),
                )
                .optional()?)
        })?;

        data.map(|d| decode::<T>(&d)).transpose()
    }

    /// Every record in the collection matching `filter`, in insertion order
    pub fn find<T: Document>(&self, filter: &Filter) -> Result<Vec<T>> {
        let mut sql = String::from("SELECT data FROM documents WHERE collection = ?");
        let mut values: Vec<Value> = vec![Value::Text(T::COLLECTION.to_string())];
        for (path, value) in filter.clauses() {
            sql.push_str(" AND json_extract(data, ?) = ?");
            values.push(Value::Text(path.clone()));
            values.push(value.clone());
        }
        sql.push_str(" ORDER BY rowid");

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(values.iter()), |row| {
                    row.get::<_, String>(0)
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        rows.iter().map(|d| decode::<T>(d)).collect()
    }

    /// Every record in the collection
    pub fn all<T: Document>(&self) -> Result<Vec<T>> {
        self.find(&Filter::new())
    }

    /// Full-text search over the collection's indexed text, most relevant first
    ///
    /// The query is matched as a phrase, case-insensitively, ignoring
    /// punctuation: `(gh 42)` matches notes containing `(GH 42)`.
    pub fn text_search<T: Document>(&self, query: &str) -> Result<Vec<T>> {
        let phrase = format!("\"{}\"", query.replace('"', "\"\""));

        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT d.data
                FROM document_text t
                INNER JOIN documents d ON d.collection = t.collection AND d.id = t.id
                WHERE document_text MATCH ?1 AND t.collection = ?2
                ORDER BY bm25(document_text), t.rowid
                "#,
            )?;
            let rows = stmt
                .query_map(params![phrase, T::COLLECTION], |row| row.get::<_, String>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;

        tracing::debug!(collection = T::COLLECTION, query = %query, hits = rows.len(), "Text search");
        rows.iter().map(|d| decode::<T>(d)).collect()
    }

    /// Remove one record; returns whether it existed
    pub fn delete<T: Document>(&self, id: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let removed = tx.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                params![T::COLLECTION, id],
            )?;
            tx.execute(
                "DELETE FROM document_text WHERE collection = ?1 AND id = ?2",
                params![T::COLLECTION, id],
            )?;
            tx.commit()?;
            Ok(removed > 0)
        })
    }

    /// Number of records in the collection
    pub fn count<T: Document>(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let n: i64 = conn.query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ?1",
                params![T::COLLECTION],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        })
    }
}

/// Deserialize a stored document, attaching the payload on failure
fn decode<T: Document>(data: &str) -> Result<T> {
    serde_json::from_str(data).map_err(|e| HashiError::CorruptRecord {
        collection: T::COLLECTION.to_string(),
        payload: data.chars().take(500).collect(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::repo_filter;
    use crate::model::{Issue, IssueState, Reference, RepoRef, Task, User, Workspace};
    use tempfile::TempDir;

    fn task(id: &str, number: u64) -> Task {
        Task::new(id, format!("Task {}", id))
            .with_notes(format!("(GH {})\nbody\nhttps://example.com/{}", number, number))
            .in_project(Reference::new("10"))
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let mirror = Mirror::in_memory().unwrap();
        mirror.upsert(&Workspace::new("1", "W")).unwrap();
        mirror.upsert(&Workspace::new("1", "Renamed")).unwrap();

        let all: Vec<Workspace> = mirror.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].name, "Renamed");
        assert_eq!(mirror.count::<Workspace>().unwrap(), 1);
    }

    #[test]
    fn test_collections_are_separate() {
        let mirror = Mirror::in_memory().unwrap();
        mirror.upsert(&Workspace::new("1", "W")).unwrap();
        mirror.upsert(&task("1", 7)).unwrap();

        assert!(mirror.get::<Workspace>("1").unwrap().is_some());
        assert_eq!(mirror.get::<Task>("1").unwrap().unwrap().name, "Task 1");
        assert!(mirror.get::<Task>("2").unwrap().is_none());
    }

    #[test]
    fn test_text_search_matches_tag_case_insensitively() {
        let mirror = Mirror::in_memory().unwrap();
        mirror
            .upsert_all(&[task("1001", 42), task("1002", 420), task("1003", 4)])
            .unwrap();

        let hits: Vec<Task> = mirror.text_search("(gh 42)").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "1001");

        let none: Vec<Task> = mirror.text_search("(gh 99)").unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_reindex_on_update() {
        let mirror = Mirror::in_memory().unwrap();
        mirror.upsert(&task("1001", 42)).unwrap();
        mirror
            .upsert(&task("1001", 42).with_notes("(GH 43)\nmoved"))
            .unwrap();

        assert!(mirror.text_search::<Task>("(gh 42)").unwrap().is_empty());
        assert_eq!(mirror.text_search::<Task>("(gh 43)").unwrap().len(), 1);
    }

    #[test]
    fn test_find_by_json_path() {
        let mirror = Mirror::in_memory().unwrap();
        let widgets = RepoRef::new("acme", "widgets");
        let gadgets = RepoRef::new("acme", "gadgets");
        let alice = User::new("alice", 1);

        mirror
            .upsert_all(&[
                Issue::new(1, 1, "a", widgets.clone()).with_assignee(alice.clone()),
                Issue::new(2, 2, "b", widgets.clone()).with_assignee(User::new("bob", 2)),
                Issue::new(3, 3, "c", gadgets.clone()).with_assignee(alice),
                Issue::new(4, 4, "d", widgets.clone()),
            ])
            .unwrap();

        let found: Vec<Issue> = mirror
            .find(&repo_filter(&widgets).eq("$.assignee.login", "alice"))
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].number, 1);

        let open: Vec<Issue> = mirror.find(&Filter::new().eq("$.state", "open")).unwrap();
        assert_eq!(open.len(), 4);
        assert!(open.iter().all(|i| i.state == IssueState::Open));
    }

    #[test]
    fn test_corrupt_record_carries_payload() {
        let mirror = Mirror::in_memory().unwrap();
        mirror
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO documents (collection, id, data, synced_at) VALUES ('tasks', '9', '{\"id\": 9}', 'x')",
                    [],
                )?;
                Ok(())
            })
            .unwrap();

        match mirror.get::<Task>("9") {
            Err(HashiError::CorruptRecord {
                collection,
                payload,
                ..
            }) => {
                assert_eq!(collection, "tasks");
                assert_eq!(payload, "{\"id\": 9}");
            }
            other => panic!("expected corrupt record, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_delete_removes_document_and_index() {
        let mirror = Mirror::in_memory().unwrap();
        mirror.upsert(&task("1001", 42)).unwrap();

        assert!(mirror.delete::<Task>("1001").unwrap());
        assert!(!mirror.delete::<Task>("1001").unwrap());
        assert!(mirror.text_search::<Task>("(gh 42)").unwrap().is_empty());
    }

    #[test]
    fn test_on_disk_mirror_persists() {
        let temp = TempDir::new().unwrap();
        let config = MirrorConfig {
            path: temp.path().join("mirror.db"),
            wal_mode: true,
        };

        Mirror::open(&config).unwrap().upsert(&task("1001", 42)).unwrap();

        let reopened = Mirror::open(&config).unwrap();
        assert_eq!(reopened.text_search::<Task>("(GH 42)").unwrap().len(), 1);
    }
}

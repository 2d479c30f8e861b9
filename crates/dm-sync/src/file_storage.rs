use crate::storage::Mutation;
use crate::{
    Document, DocumentSnapshot, DocumentStore, Error, FieldUpdate, InMemoryStore, Predicate,
    Result, SnapshotCallback, Unsubscribe, WatchTarget,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Serialize, Deserialize)]
struct StoredDocument {
    collection: String,
    id: String,
    fields: Document,
}

/// Write-through document store: one JSON file per document, everything
/// mirrored in memory so queries and live subscriptions never touch disk.
/// A write reaches memory and watchers only after its file is on disk.
pub struct FileDocumentStore {
    base_path: PathBuf,
    memory: InMemoryStore,
    persist: Mutex<()>,
}

impl FileDocumentStore {
    pub fn open(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).map_err(|e| {
            Error::StoreUnavailable(format!("Failed to create directory: {}", e))
        })?;

        let memory = InMemoryStore::new();
        let mut loaded = 0usize;
        for stored in read_stored_documents(&base_path)? {
            memory.load(&stored.collection, &stored.id, stored.fields)?;
            loaded += 1;
        }
        tracing::debug!(base_path = %base_path.display(), loaded, "opened file store");

        Ok(Self {
            base_path,
            memory,
            persist: Mutex::new(()),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Pick up documents written by other processes sharing the directory.
    /// Watchers see every document whose content changed. Returns how many
    /// documents changed.
    pub fn refresh(&self) -> Result<usize> {
        let _guard = self.persist_lock()?;
        let mut changed = 0usize;
        for stored in read_stored_documents(&self.base_path)? {
            if self
                .memory
                .replace_if_changed(&stored.collection, &stored.id, stored.fields)?
            {
                changed += 1;
            }
        }
        if changed > 0 {
            tracing::debug!(changed, "refreshed file store");
        }
        Ok(changed)
    }

    fn key_to_path(&self, collection: &str, id: &str) -> PathBuf {
        let key = format!("{}/{}", collection, id);
        let mut escaped = String::with_capacity(key.len());
        for c in key.chars() {
            match c {
                '%' => escaped.push_str("%25"),
                '/' => escaped.push_str("%2F"),
                '\\' => escaped.push_str("%5C"),
                ':' => escaped.push_str("%3A"),
                _ => escaped.push(c),
            }
        }
        self.base_path.join(format!("{}.json", escaped))
    }

    fn persist(&self, collection: &str, id: &str, fields: &Document) -> Result<()> {
        let path = self.key_to_path(collection, id);
        let stored = StoredDocument {
            collection: collection.to_string(),
            id: id.to_string(),
            fields: fields.clone(),
        };
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string(&stored)?)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to write file: {}", e)))?;
        fs::rename(&tmp, &path)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to replace file: {}", e)))?;
        Ok(())
    }

    fn persist_lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.persist
            .lock()
            .map_err(|_| Error::StoreUnavailable("persist lock poisoned".to_string()))
    }
}

fn read_stored_documents(base_path: &Path) -> Result<Vec<StoredDocument>> {
    let entries = fs::read_dir(base_path)
        .map_err(|e| Error::StoreUnavailable(format!("Failed to read directory: {}", e)))?;
    let mut documents = Vec::new();
    for entry in entries {
        let entry = entry
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read dir entry: {}", e)))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        let raw = fs::read_to_string(&path)
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read file: {}", e)))?;
        match serde_json::from_str::<StoredDocument>(&raw) {
            Ok(stored) => documents.push(stored),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable document");
            }
        }
    }
    Ok(documents)
}

impl DocumentStore for FileDocumentStore {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.memory.get_document(collection, id)
    }

    fn put_document(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Document> {
        let _guard = self.persist_lock()?;
        self.memory
            .put_document_with(collection, id, fields, &|c, i, doc| self.persist(c, i, doc))
    }

    fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Option<Document>> {
        let _guard = self.persist_lock()?;
        self.memory
            .create_document_with(collection, id, fields, &|c, i, doc| self.persist(c, i, doc))
    }

    fn update_fields(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Document> {
        self.transact(collection, id, &mut |_| Ok(fields.clone()))
    }

    fn transact(&self, collection: &str, id: &str, mutation: Mutation<'_>) -> Result<Document> {
        let _guard = self.persist_lock()?;
        self.memory
            .transact_with(collection, id, mutation, &|c, i, doc| self.persist(c, i, doc))
    }

    fn query_where(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<DocumentSnapshot>> {
        self.memory.query_where(collection, predicates)
    }

    fn subscribe(&self, target: WatchTarget, callback: SnapshotCallback) -> Result<Unsubscribe> {
        self.memory.subscribe(target, callback)
    }
}

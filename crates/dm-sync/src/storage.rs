use crate::{Error, Result, Timestamp, Unsubscribe};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

/// Field map of a stored document.
pub type Document = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    pub fields: Document,
}

/// Path to a (possibly nested) field. Segments are kept apart so map keys
/// may contain dots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn lookup<'a>(&self, doc: &'a Document) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut current = doc.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl From<&str> for FieldPath {
    fn from(dotted: &str) -> Self {
        Self(dotted.split('.').map(str::to_string).collect())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Set(Value),
    Increment(i64),
    /// Append each value not already present.
    ArrayUnion(Vec<Value>),
    /// Resolved by the store to the commit time of the write.
    ServerTimestamp,
    Delete,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldUpdate {
    pub path: FieldPath,
    pub value: FieldValue,
}

impl FieldUpdate {
    pub fn new(path: impl Into<FieldPath>, value: FieldValue) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }

    pub fn set(path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        Self::new(path, FieldValue::Set(value.into()))
    }

    pub fn increment(path: impl Into<FieldPath>, by: i64) -> Self {
        Self::new(path, FieldValue::Increment(by))
    }

    pub fn array_union(path: impl Into<FieldPath>, values: Vec<Value>) -> Self {
        Self::new(path, FieldValue::ArrayUnion(values))
    }

    pub fn server_timestamp(path: impl Into<FieldPath>) -> Self {
        Self::new(path, FieldValue::ServerTimestamp)
    }

    pub fn delete(path: impl Into<FieldPath>) -> Self {
        Self::new(path, FieldValue::Delete)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Equals(FieldPath, Value),
    ArrayContains(FieldPath, Value),
    StartsWith(FieldPath, String),
}

impl Predicate {
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Predicate::Equals(path, expected) => path.lookup(doc) == Some(expected),
            Predicate::ArrayContains(path, expected) => path
                .lookup(doc)
                .and_then(Value::as_array)
                .map(|items| items.contains(expected))
                .unwrap_or(false),
            Predicate::StartsWith(path, prefix) => path
                .lookup(doc)
                .and_then(Value::as_str)
                .map(|s| s.starts_with(prefix.as_str()))
                .unwrap_or(false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WatchTarget {
    Document { collection: String, id: String },
    Query {
        collection: String,
        predicates: Vec<Predicate>,
    },
}

impl WatchTarget {
    pub fn document(collection: impl Into<String>, id: impl Into<String>) -> Self {
        WatchTarget::Document {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn query(collection: impl Into<String>, predicates: Vec<Predicate>) -> Self {
        WatchTarget::Query {
            collection: collection.into(),
            predicates,
        }
    }

    fn collection(&self) -> &str {
        match self {
            WatchTarget::Document { collection, .. } | WatchTarget::Query { collection, .. } => {
                collection
            }
        }
    }

    fn concerns(&self, id: &str, before: Option<&Document>, after: Option<&Document>) -> bool {
        match self {
            WatchTarget::Document { id: watched, .. } => watched == id,
            WatchTarget::Query { predicates, .. } => {
                let hit = |doc: Option<&Document>| {
                    doc.map(|d| predicates.iter().all(|p| p.matches(d)))
                        .unwrap_or(false)
                };
                hit(before) || hit(after)
            }
        }
    }
}

pub type SnapshotCallback = Box<dyn Fn(Vec<DocumentSnapshot>) + Send>;

pub type Mutation<'a> = &'a mut dyn FnMut(&Document) -> Result<Vec<FieldUpdate>>;

/// Sees a computed write before it becomes visible. An error abandons the
/// write: nothing is stored and no watcher fires.
pub(crate) type BeforeCommit<'a> = &'a dyn Fn(&str, &str, &Document) -> Result<()>;

fn commit_always(_: &str, _: &str, _: &Document) -> Result<()> {
    Ok(())
}

/// Contract over the backing document store.
///
/// Every write is applied atomically per document. Subscription callbacks
/// run on the writing thread with the store locked: they must not block and
/// must not call back into the store.
pub trait DocumentStore: Send + Sync {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>>;

    /// Replace the whole document.
    fn put_document(&self, collection: &str, id: &str, fields: Vec<FieldUpdate>)
        -> Result<Document>;

    /// Write only if no document with this id exists. `None` when it did.
    fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Option<Document>>;

    /// Partial update of an existing document.
    fn update_fields(&self, collection: &str, id: &str, fields: Vec<FieldUpdate>)
        -> Result<Document>;

    /// Atomic read-modify-write. The mutation sees the current document and
    /// returns the partial updates to apply; an empty list writes nothing.
    fn transact(&self, collection: &str, id: &str, mutation: Mutation<'_>) -> Result<Document>;

    fn query_where(&self, collection: &str, predicates: &[Predicate])
        -> Result<Vec<DocumentSnapshot>>;

    /// Deliver the current result set now and after every write touching it.
    fn subscribe(&self, target: WatchTarget, callback: SnapshotCallback) -> Result<Unsubscribe>;
}

fn parent_mut<'a>(
    doc: &'a mut Document,
    parents: &[String],
    create: bool,
) -> Option<&'a mut Document> {
    let Some((first, rest)) = parents.split_first() else {
        return Some(doc);
    };
    if !create && !doc.get(first).map(Value::is_object).unwrap_or(false) {
        return None;
    }
    let entry = doc
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Document::new()));
    if !entry.is_object() {
        *entry = Value::Object(Document::new());
    }
    parent_mut(entry.as_object_mut()?, rest, create)
}

pub(crate) fn apply_updates(doc: &mut Document, updates: Vec<FieldUpdate>, now: Timestamp) {
    for update in updates {
        let Some((leaf, parents)) = update.path.segments().split_last() else {
            continue;
        };
        let create = !matches!(update.value, FieldValue::Delete);
        let Some(target) = parent_mut(doc, parents, create) else {
            continue;
        };

        match update.value {
            FieldValue::Set(value) => {
                target.insert(leaf.clone(), value);
            }
            FieldValue::Increment(by) => {
                let current = target.get(leaf).and_then(Value::as_i64).unwrap_or(0);
                target.insert(leaf.clone(), Value::from(current.saturating_add(by)));
            }
            FieldValue::ArrayUnion(values) => {
                let mut items = target
                    .get(leaf)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                for value in values {
                    if !items.contains(&value) {
                        items.push(value);
                    }
                }
                target.insert(leaf.clone(), Value::Array(items));
            }
            FieldValue::ServerTimestamp => {
                target.insert(leaf.clone(), Value::from(now.as_millis()));
            }
            FieldValue::Delete => {
                target.remove(leaf);
            }
        }
    }
}

struct Watcher {
    target: WatchTarget,
    callback: SnapshotCallback,
}

#[derive(Default)]
struct Watchers {
    next_id: u64,
    entries: HashMap<u64, Watcher>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Document>>,
    clock: u64,
}

impl State {
    /// Strictly increasing commit time.
    fn tick(&mut self) -> Timestamp {
        self.clock = Timestamp::now().as_millis().max(self.clock + 1);
        Timestamp(self.clock)
    }

    fn snapshot(&self, target: &WatchTarget) -> Vec<DocumentSnapshot> {
        match target {
            WatchTarget::Document { collection, id } => self
                .collections
                .get(collection)
                .and_then(|docs| docs.get(id))
                .map(|fields| DocumentSnapshot {
                    id: id.clone(),
                    fields: fields.clone(),
                })
                .into_iter()
                .collect(),
            WatchTarget::Query {
                collection,
                predicates,
            } => self.query(collection, predicates),
        }
    }

    fn query(&self, collection: &str, predicates: &[Predicate]) -> Vec<DocumentSnapshot> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| predicates.iter().all(|p| p.matches(fields)))
                    .map(|(id, fields)| DocumentSnapshot {
                        id: id.clone(),
                        fields: fields.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

struct Inner {
    state: Mutex<State>,
    watchers: Mutex<Watchers>,
}

/// Process-local store. Clones share the same data.
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<Inner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                watchers: Mutex::new(Watchers::default()),
            }),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        self.inner
            .state
            .lock()
            .map_err(|_| Error::StoreUnavailable("store state poisoned".to_string()))
    }

    /// Insert without notifying watchers. Used when hydrating from disk.
    pub(crate) fn load(&self, collection: &str, id: &str, fields: Document) -> Result<()> {
        let mut state = self.state()?;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields);
        Ok(())
    }

    /// Overwrite with an externally produced version. Watchers are only
    /// told when the content actually differs.
    pub(crate) fn replace_if_changed(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<bool> {
        let written = self.write(
            collection,
            id,
            |existing, _| {
                if existing == Some(&fields) {
                    Ok(None)
                } else {
                    Ok(Some(fields))
                }
            },
            &commit_always,
        )?;
        Ok(written.is_some())
    }

    pub(crate) fn put_document_with(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
        before_commit: BeforeCommit<'_>,
    ) -> Result<Document> {
        self.write(
            collection,
            id,
            |_, now| {
                let mut doc = Document::new();
                apply_updates(&mut doc, fields, now);
                Ok(Some(doc))
            },
            before_commit,
        )?
        .ok_or_else(|| not_found(collection, id))
    }

    pub(crate) fn create_document_with(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
        before_commit: BeforeCommit<'_>,
    ) -> Result<Option<Document>> {
        self.write(
            collection,
            id,
            |existing, now| {
                if existing.is_some() {
                    return Ok(None);
                }
                let mut doc = Document::new();
                apply_updates(&mut doc, fields, now);
                Ok(Some(doc))
            },
            before_commit,
        )
    }

    pub(crate) fn transact_with(
        &self,
        collection: &str,
        id: &str,
        mutation: Mutation<'_>,
        before_commit: BeforeCommit<'_>,
    ) -> Result<Document> {
        let mut unchanged = None;
        let written = self.write(
            collection,
            id,
            |existing, now| {
                let current = existing.ok_or_else(|| not_found(collection, id))?;
                let updates = mutation(current)?;
                if updates.is_empty() {
                    unchanged = Some(current.clone());
                    return Ok(None);
                }
                let mut doc = current.clone();
                apply_updates(&mut doc, updates, now);
                Ok(Some(doc))
            },
            before_commit,
        )?;
        written
            .or(unchanged)
            .ok_or_else(|| not_found(collection, id))
    }

    fn write<F>(
        &self,
        collection: &str,
        id: &str,
        compute: F,
        before_commit: BeforeCommit<'_>,
    ) -> Result<Option<Document>>
    where
        F: FnOnce(Option<&Document>, Timestamp) -> Result<Option<Document>>,
    {
        let mut state = self.state()?;
        let now = state.tick();
        let before = state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned();
        let Some(after) = compute(before.as_ref(), now)? else {
            return Ok(None);
        };
        before_commit(collection, id, &after)?;
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), after.clone());
        self.notify(&state, collection, id, before.as_ref(), Some(&after))?;
        Ok(Some(after))
    }

    fn notify(
        &self,
        state: &State,
        collection: &str,
        id: &str,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> Result<()> {
        let watchers = self
            .inner
            .watchers
            .lock()
            .map_err(|_| Error::StoreUnavailable("watcher registry poisoned".to_string()))?;
        for watcher in watchers.entries.values() {
            if watcher.target.collection() == collection
                && watcher.target.concerns(id, before, after)
            {
                (watcher.callback)(state.snapshot(&watcher.target));
            }
        }
        Ok(())
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn not_found(collection: &str, id: &str) -> Error {
    Error::NotFound(format!("{}/{}", collection, id))
}

impl DocumentStore for InMemoryStore {
    fn get_document(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        Ok(self
            .state()?
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
    }

    fn put_document(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Document> {
        self.put_document_with(collection, id, fields, &commit_always)
    }

    fn create_document(
        &self,
        collection: &str,
        id: &str,
        fields: Vec<FieldUpdate>,
    ) -> Result<Option<Document>> {
        self.create_document_with(collection, id, fields, &commit_always)
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
        self.transact_with(collection, id, mutation, &commit_always)
    }

    fn query_where(
        &self,
        collection: &str,
        predicates: &[Predicate],
    ) -> Result<Vec<DocumentSnapshot>> {
        Ok(self.state()?.query(collection, predicates))
    }

    fn subscribe(&self, target: WatchTarget, callback: SnapshotCallback) -> Result<Unsubscribe> {
        let state = self.state()?;
        let mut watchers = self
            .inner
            .watchers
            .lock()
            .map_err(|_| Error::StoreUnavailable("watcher registry poisoned".to_string()))?;
        callback(state.snapshot(&target));
        let watcher_id = watchers.next_id;
        watchers.next_id += 1;
        watchers
            .entries
            .insert(watcher_id, Watcher { target, callback });
        drop(watchers);
        drop(state);

        let inner = Arc::downgrade(&self.inner);
        Ok(Box::new(move || {
            if let Some(inner) = inner.upgrade() {
                if let Ok(mut watchers) = inner.watchers.lock() {
                    watchers.entries.remove(&watcher_id);
                }
            }
        }))
    }
}

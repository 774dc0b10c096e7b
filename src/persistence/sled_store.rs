use crate::error::{AppError, Result};
use crate::persistence::{Document, Query, Repository, Sort, ID_FIELD};
use async_trait::async_trait;
use serde_json::Value;
use sled::{Db, IVec, Tree};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Maximum documents kept by a log collection
pub const DEFAULT_CAPACITY: usize = 100_000;

/// Size-bounded document collection in a sled tree.
///
/// Keys are sled-generated monotonic ids, so iteration order is insertion
/// order and the oldest document is always the first key. Once the collection
/// holds more than `capacity` documents the oldest are evicted.
#[derive(Clone)]
pub struct CappedCollection {
    db: Arc<Db>,
    tree: Tree,
    capacity: usize,
    len: Arc<AtomicUsize>,
}

impl CappedCollection {
    /// Open (or create) collection `name` in the database at `path`
    pub fn open<P: AsRef<Path>>(path: P, name: &str, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(AppError::Configuration(
                "Capped collection capacity must be at least 1".to_string(),
            ));
        }

        let db = sled::open(path.as_ref()).map_err(|e| {
            AppError::Database(format!("Failed to open sled database: {}", e))
        })?;
        let tree = db.open_tree(name).map_err(|e| {
            AppError::Database(format!("Failed to open collection {}: {}", name, e))
        })?;

        let collection = Self {
            len: Arc::new(AtomicUsize::new(tree.len())),
            db: Arc::new(db),
            tree,
            capacity,
        };
        collection.evict()?;

        tracing::info!(
            path = ?path.as_ref(),
            collection = name,
            capacity,
            "Opened capped collection"
        );
        Ok(collection)
    }

    pub fn name(&self) -> String {
        String::from_utf8_lossy(&self.tree.name()).into_owned()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store `doc`, evicting the oldest documents past capacity. Returns the
    /// stored document including its `_id`.
    pub fn append(&self, mut doc: Document) -> Result<Document> {
        let id = self.db.generate_id()?;
        doc.insert(ID_FIELD.to_string(), Value::from(id));

        self.tree.insert(id.to_be_bytes(), serde_json::to_vec(&doc)?)?;
        self.len.fetch_add(1, Ordering::SeqCst);
        self.evict()?;

        Ok(doc)
    }

    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::Database(format!("Failed to flush database: {}", e))
        })?;
        Ok(())
    }

    fn evict(&self) -> Result<()> {
        while self.len.load(Ordering::SeqCst) > self.capacity {
            match self.tree.pop_min()? {
                Some(_) => {
                    self.len.fetch_sub(1, Ordering::SeqCst);
                }
                None => break,
            }
        }
        Ok(())
    }

    fn scan(&self, query: &Query) -> Result<Vec<(IVec, Document)>> {
        let mut matched = Vec::new();
        for entry in self.tree.iter() {
            let (key, bytes) = entry?;
            let doc: Document = serde_json::from_slice(&bytes)?;
            if query.matches(&doc) {
                matched.push((key, doc));
            }
        }
        Ok(matched)
    }
}

#[async_trait]
impl Repository for CappedCollection {
    async fn find(&self, query: &Query, sort: Option<&Sort>) -> Result<Vec<Document>> {
        let mut docs: Vec<Document> = self.scan(query)?.into_iter().map(|(_, doc)| doc).collect();
        if let Some(sort) = sort {
            docs.sort_by(|a, b| sort.compare(a, b));
        }
        Ok(docs)
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        if *query == Query::all() {
            return Ok(self.len() as u64);
        }
        Ok(self.scan(query)?.len() as u64)
    }

    async fn insert(&self, doc: Document) -> Result<Document> {
        self.append(doc)
    }

    async fn update(&self, changes: &Document, query: &Query) -> Result<u64> {
        let mut updated = 0;
        for (key, mut doc) in self.scan(query)? {
            for (field, value) in changes {
                if field != ID_FIELD {
                    doc.insert(field.clone(), value.clone());
                }
            }
            self.tree.insert(key, serde_json::to_vec(&doc)?)?;
            updated += 1;
        }
        Ok(updated)
    }

    async fn remove(&self, query: &Query) -> Result<u64> {
        let mut removed = 0;
        for (key, _) in self.scan(query)? {
            if self.tree.remove(key)?.is_some() {
                self.len.fetch_sub(1, Ordering::SeqCst);
                removed += 1;
            }
        }
        Ok(removed)
    }
}

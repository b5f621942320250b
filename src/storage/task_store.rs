use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, MultiThreaded, Options,
    WriteBatch, WriteOptions,
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoreError, Task, TaskId, TaskMeta};
use crate::tree::BppTree;
use crate::util::UnixMillis;

const PAYLOADS_CF: &str = "payloads";
const META_CF: &str = "meta";
const TASKS_META_KEY: &[u8] = b"tasks";

/// Time-indexed task store: due-times in a B⁺⁺-tree, payloads in RocksDB.
///
/// The tree knows only due-times; `ids` pairs each due-time with the task ids
/// scheduled at that instant, oldest first. For every tree entry the
/// `payloads` column family holds a row `id → payload`, and the `meta` column
/// family mirrors the full `(id, due)` list so the schedule survives a
/// restart; payloads are only read back when a task is popped.
pub struct TaskStore {
    inner: RwLock<StoreInner>,
    db: DBWithThreadMode<MultiThreaded>,
}

struct StoreInner {
    tree: BppTree,
    ids: HashMap<UnixMillis, VecDeque<TaskId>>,
}

impl TaskStore {
    /// Opens (or creates) the store at `path` and rebuilds the in-memory
    /// tree from the persisted metadata row, if one exists.
    pub fn open(path: &Path, branching: usize) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(PAYLOADS_CF, Options::default()),
            ColumnFamilyDescriptor::new(META_CF, Options::default()),
        ];
        let db = DBWithThreadMode::<MultiThreaded>::open_cf_descriptors(&opts, path, cfs)?;

        let mut inner = StoreInner {
            tree: BppTree::new(branching),
            ids: HashMap::new(),
        };

        let meta_cf = db
            .cf_handle(META_CF)
            .ok_or(StoreError::MissingColumnFamily(META_CF))?;
        if let Some(raw) = db.get_cf(&meta_cf, TASKS_META_KEY)? {
            let (metas, _): (Vec<TaskMeta>, usize) =
                bincode::serde::decode_from_slice(&raw, bincode::config::standard())
                    .map_err(|err| StoreError::MetaDecode(err.to_string()))?;

            tracing::info!(tasks = metas.len(), "restoring scheduled tasks from disk");
            for meta in metas {
                inner.tree.insert(meta.due);
                inner.ids.entry(meta.due).or_default().push_back(meta.id);
            }
        }
        drop(meta_cf);

        Ok(Self {
            inner: RwLock::new(inner),
            db,
        })
    }

    /// Schedules `payload` for delivery at `due` and returns the fresh task
    /// id. The task is committed in memory before the durable writes; a
    /// failed write leaves a durability gap but does not unschedule it.
    pub async fn add(&self, payload: &[u8], due: UnixMillis) -> Result<TaskId, StoreError> {
        let id = Uuid::new_v4().to_string();

        let mut inner = self.inner.write().await;
        inner.tree.insert(due);
        inner.ids.entry(due).or_default().push_back(id.clone());

        self.write_meta(&inner)?;
        let payloads_cf = self.cf(PAYLOADS_CF)?;
        self.db
            .put_cf_opt(&payloads_cf, id.as_bytes(), payload, &sync_writes())?;

        Ok(id)
    }

    /// All tasks with `due <= now`, payloads included. Mutates nothing:
    /// the tree keeps the entries and the payload rows stay in place.
    pub async fn lesser_than(&self, now: UnixMillis) -> Result<Vec<Task>, StoreError> {
        let inner = self.inner.read().await;
        let dues = inner.tree.range_query(0, now);

        let mut taken: HashMap<UnixMillis, usize> = HashMap::new();
        let payloads_cf = self.cf(PAYLOADS_CF)?;
        let mut out = Vec::with_capacity(dues.len());

        for due in dues {
            let offset = taken.entry(due).or_insert(0);
            let id = inner
                .ids
                .get(&due)
                .and_then(|queue| queue.get(*offset))
                .ok_or_else(|| StoreError::Internal(format!("no scheduled id for due {due}")))?
                .clone();
            *offset += 1;

            let payload = self
                .db
                .get_cf(&payloads_cf, id.as_bytes())?
                .ok_or_else(|| StoreError::PayloadNotFound { id: id.clone() })?;
            out.push(Task { id, due, payload });
        }

        Ok(out)
    }

    /// Removes and returns all tasks with `due <= now`. Tree entries, the
    /// metadata row and the payload rows are gone once this returns; within
    /// the batch, ordering by due-time is not guaranteed.
    pub async fn pop_lesser_than(&self, now: UnixMillis) -> Result<Vec<Task>, StoreError> {
        let mut inner = self.inner.write().await;
        let dues = inner.tree.pop_range_query(0, now);

        let mut metas = Vec::with_capacity(dues.len());
        for due in dues {
            let (id, emptied) = {
                let queue = inner.ids.get_mut(&due).ok_or_else(|| {
                    StoreError::Internal(format!("no scheduled ids for due {due}"))
                })?;
                let id = queue.pop_front().ok_or_else(|| {
                    StoreError::Internal(format!("id list drained for due {due}"))
                })?;
                (id, queue.is_empty())
            };
            if emptied {
                inner.ids.remove(&due);
            }
            metas.push((id, due));
        }

        self.write_meta(&inner)?;

        let payloads_cf = self.cf(PAYLOADS_CF)?;
        let mut out = Vec::with_capacity(metas.len());
        let mut batch = WriteBatch::default();
        for (id, due) in metas {
            match self.db.get_cf(&payloads_cf, id.as_bytes())? {
                Some(payload) => {
                    batch.delete_cf(&payloads_cf, id.as_bytes());
                    out.push(Task { id, due, payload });
                }
                None => {
                    tracing::error!(id = %id, due, "payload row missing for due task, dropping it");
                }
            }
        }
        self.db.write_opt(batch, &sync_writes())?;

        Ok(out)
    }

    /// Number of tasks currently scheduled.
    pub async fn scheduled_count(&self) -> usize {
        self.inner.read().await.tree.len()
    }

    fn write_meta(&self, inner: &StoreInner) -> Result<(), StoreError> {
        let mut metas: Vec<TaskMeta> = inner
            .ids
            .iter()
            .flat_map(|(&due, queue)| queue.iter().map(move |id| TaskMeta { id: id.clone(), due }))
            .collect();
        metas.sort_by_key(|meta| meta.due);

        let raw = bincode::serde::encode_to_vec(&metas, bincode::config::standard())
            .map_err(|err| StoreError::MetaEncode(err.to_string()))?;

        let meta_cf = self.cf(META_CF)?;
        self.db
            .put_cf_opt(&meta_cf, TASKS_META_KEY, raw, &sync_writes())?;
        Ok(())
    }

    fn cf(&self, name: &'static str) -> Result<Arc<BoundColumnFamily<'_>>, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::MissingColumnFamily(name))
    }
}

fn sync_writes() -> WriteOptions {
    let mut opts = WriteOptions::default();
    opts.set_sync(true);
    opts
}

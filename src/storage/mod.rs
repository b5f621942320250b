pub mod task_store;

pub use task_store::TaskStore;

use serde::{Deserialize, Serialize};

use crate::util::UnixMillis;

/// Opaque unique task identifier, assigned on insert.
pub type TaskId = String;

/// A scheduled delivery: held until `due`, then republished once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: TaskId,
    pub due: UnixMillis,
    pub payload: Vec<u8>,
}

/// Durable mirror of one in-memory tree entry; the full list is rewritten to
/// the metadata row after every add and every pop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct TaskMeta {
    pub id: TaskId,
    pub due: UnixMillis,
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("column family not found: {0}")]
    MissingColumnFamily(&'static str),

    #[error("rocksdb error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    #[error("missing payload for task {id}")]
    PayloadNotFound { id: TaskId },

    #[error("task metadata decode error: {0}")]
    MetaDecode(String),

    #[error("task metadata encode error: {0}")]
    MetaEncode(String),

    #[error("unexpected internal error: {0}")]
    Internal(String),
}

//! Store executor for non-blocking database access
//!
//! Runs all durable-store operations on a dedicated thread and exposes them
//! as independent async tasks. There is no ordering guarantee between
//! unrelated operations; callers sequence dependent calls themselves.
//!
//! # Usage
//!
//! ```ignore
//! let executor = DbExecutor::new(db);
//!
//! let all = executor.run(|db| db.list_activities()).await?;
//! ```

use crate::db::{Database, StoreError};
use std::sync::mpsc;
use std::thread;
use tokio::sync::oneshot;

/// A store executor that runs operations on a dedicated thread
pub struct DbExecutor {
    sender: mpsc::Sender<StoreOperation>,
    _handle: thread::JoinHandle<()>,
}

type BoxedStoreOp = Box<dyn FnOnce(&Database) -> BoxedResult + Send + 'static>;
type BoxedResult = Box<dyn std::any::Any + Send + 'static>;

struct StoreOperation {
    op: BoxedStoreOp,
    response: oneshot::Sender<BoxedResult>,
}

impl DbExecutor {
    /// Create a new store executor
    ///
    /// Takes ownership of the database and runs all operations on a
    /// dedicated thread.
    pub fn new(db: Database) -> Self {
        let (sender, receiver) = mpsc::channel::<StoreOperation>();

        let handle = thread::spawn(move || {
            while let Ok(operation) = receiver.recv() {
                let result = (operation.op)(&db);
                let _ = operation.response.send(result);
            }
        });

        Self {
            sender,
            _handle: handle,
        }
    }

    /// Run a store operation asynchronously
    ///
    /// The operation is executed on the dedicated store thread and the
    /// result is returned through a oneshot channel.
    pub async fn run<F, T>(&self, op: F) -> Result<T, DbExecutorError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let (response_tx, response_rx) = oneshot::channel();

        // Wrap the operation to return a boxed result
        let boxed_op: BoxedStoreOp = Box::new(move |db| {
            let result = op(db);
            Box::new(result) as BoxedResult
        });

        let operation = StoreOperation {
            op: boxed_op,
            response: response_tx,
        };

        self.sender
            .send(operation)
            .map_err(|_| DbExecutorError::ChannelClosed)?;

        let boxed_result = response_rx
            .await
            .map_err(|_| DbExecutorError::ChannelClosed)?;

        // Downcast the result back to the expected type
        let result = boxed_result
            .downcast::<Result<T, StoreError>>()
            .map_err(|_| DbExecutorError::TypeMismatch)?;

        result.map_err(DbExecutorError::Store)
    }
}

/// Errors that can occur when using the store executor
#[derive(Debug, thiserror::Error)]
pub enum DbExecutorError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("channel closed - executor may have shut down")]
    ChannelClosed,

    #[error("type mismatch in result - internal error")]
    TypeMismatch,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ActivityRecord;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_executor_add_and_get() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let executor = DbExecutor::new(db);

        let id = executor
            .run(|db| {
                db.add_activity(&ActivityRecord {
                    person: "Teacher".into(),
                    activity_name: "Chanting".into(),
                    ..Default::default()
                })
            })
            .await
            .unwrap();

        let fetched = executor
            .run(move |db| db.get_activity(&id))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(fetched.person, "Teacher");
    }

    #[tokio::test]
    async fn test_executor_independent_operations() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::open(&temp_dir.path().join("test.db")).unwrap();
        let executor = DbExecutor::new(db);

        let count_before: usize = executor
            .run(|db| Ok(db.list_activities()?.len()))
            .await
            .unwrap();
        assert_eq!(count_before, 0);

        executor
            .run(|db| db.add_activity(&ActivityRecord::default()).map(|_| ()))
            .await
            .unwrap();

        let count_after: usize = executor
            .run(|db| Ok(db.list_activities()?.len()))
            .await
            .unwrap();
        assert_eq!(count_after, 1);
    }
}

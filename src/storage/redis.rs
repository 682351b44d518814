//! A Redis compatible [`TaskStore`].
//!
//! # Redis Data Model
//!
//!```text
//! {
//!     "tasks": { // hash
//!         "EvaluationId_1": TaskRecord_1, // JSON encoded string
//!         "EvaluationId_2": TaskRecord_2
//!     }
//! }
//! ```
//!
//! The state checks of [`TaskStore::transition`] and [`TaskStore::remove_pending`] run inside
//! Lua scripts, so several evaluator processes can share one task table.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, AsyncCommands, IntoConnectionInfo, Script};
pub use redis::{RedisError, RedisResult};

use crate::{
    common::EvaluationId,
    storage::{
        traits::check_transition,
        StorageError,
        StorageResult,
        TaskCreate,
        TaskCreateError,
        TaskStore,
        TaskTransition,
        TaskTransitionError,
    },
    task::{StateKind, TaskRecord},
};

const TASKS: &str = "tasks";

#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore").finish()
    }
}

fn to_storage_err(e: RedisError) -> StorageError {
    anyhow::anyhow!(e)
}

impl RedisStore {
    /// Creates a new Redis task store.
    ///
    /// `url` to which Redis instance the client should connect to.
    /// The URL format is `redis://[<username>][:<passwd>@]<hostname>[:port][/<db>]`.
    ///
    /// The store uses a [`redis::aio::ConnectionManager`] that automatically reconnects
    /// if the connection is dropped.
    pub async fn new<T: IntoConnectionInfo>(url: T) -> Result<Self, RedisError> {
        let client = redis::Client::open(url)?;
        let connection = client.get_tokio_connection_manager().await?;
        Ok(Self { connection })
    }

    #[cfg(all(test, feature = "redis-tests"))]
    async fn flush_db(&mut self) -> RedisResult<()> {
        redis::cmd("FLUSHDB").query_async(&mut self.connection).await
    }
}

#[async_trait]
impl TaskStore for RedisStore {
    async fn create_task(
        &mut self,
        id: &EvaluationId,
        record: &TaskRecord,
    ) -> StorageResult<TaskCreate> {
        debug!("create task {}", id);
        let record = serde_json::to_string(record)?;
        // https://redis.io/commands/hsetnx
        // > Return value
        //   Integer reply, specifically:
        //   1 if field is a new field in the hash and value was set.
        //   0 if field already exists in the hash and no operation was performed.
        let created: bool = self
            .connection
            .hset_nx(TASKS, id.to_string(), record)
            .await
            .map_err(to_storage_err)?;
        Ok(TaskCreate(if created {
            Ok(())
        } else {
            Err(TaskCreateError::AlreadyExists)
        }))
    }

    async fn task(&mut self, id: &EvaluationId) -> StorageResult<Option<TaskRecord>> {
        let record: Option<String> = self
            .connection
            .hget(TASKS, id.to_string())
            .await
            .map_err(to_storage_err)?;
        match record {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    async fn transition(
        &mut self,
        id: &EvaluationId,
        from: StateKind,
        record: &TaskRecord,
    ) -> StorageResult<TaskTransition> {
        let checked = check_transition(from, record);
        if checked.is_err() {
            return Ok(checked);
        }
        debug!("move task {} from {} to {}", id, from, record.state.kind());
        let script = Script::new(
            r#"
                local current = redis.call("HGET", KEYS[1], ARGV[1])
                if not current then
                    return -1
                end

                if cjson.decode(current)["state"]["status"] ~= ARGV[2] then
                    return -2
                end

                redis.call("HSET", KEYS[1], ARGV[1], ARGV[3])
                return 0
            "#,
        );
        let outcome: i64 = script
            .key(TASKS)
            .arg(id.to_string())
            .arg(from.as_str())
            .arg(serde_json::to_string(record)?)
            .invoke_async(&mut self.connection)
            .await
            .map_err(to_storage_err)?;
        Ok(TaskTransition(match outcome {
            0 => Ok(()),
            -1 => Err(TaskTransitionError::UnknownTask),
            -2 => Err(TaskTransitionError::StateMismatch),
            other => {
                return Err(anyhow::anyhow!(
                    "unexpected transition script reply {}",
                    other
                ))
            }
        }))
    }

    async fn remove_pending(&mut self, id: &EvaluationId) -> StorageResult<bool> {
        let script = Script::new(
            r#"
                local current = redis.call("HGET", KEYS[1], ARGV[1])
                if current and cjson.decode(current)["state"]["status"] == "pending" then
                    return redis.call("HDEL", KEYS[1], ARGV[1])
                end
                return 0
            "#,
        );
        let removed: i64 = script
            .key(TASKS)
            .arg(id.to_string())
            .invoke_async(&mut self.connection)
            .await
            .map_err(to_storage_err)?;
        Ok(removed == 1)
    }

    async fn tasks(&mut self) -> StorageResult<Vec<(EvaluationId, TaskRecord)>> {
        // https://redis.io/commands/hgetall
        // > Return value
        //   Array reply: list of fields and their values stored in the hash, or an empty
        //   list when key does not exist.
        let reply: Vec<(String, String)> = self
            .connection
            .hgetall(TASKS)
            .await
            .map_err(to_storage_err)?;
        reply
            .into_iter()
            .map(|(id, record)| {
                let id = id
                    .parse::<EvaluationId>()
                    .map_err(|e| anyhow::anyhow!("invalid task id {}: {}", id, e))?;
                Ok((id, serde_json::from_str(&record)?))
            })
            .collect()
    }

    async fn is_ready(&mut self) -> StorageResult<()> {
        redis::cmd("PING")
            .query_async(&mut self.connection)
            .await
            .map_err(to_storage_err)
    }
}

// Needs a redis instance at `redis://127.0.0.1/`: `cargo test --features redis-tests`.
#[cfg(all(test, feature = "redis-tests"))]
pub(crate) mod tests {
    use serial_test::serial;

    use super::*;
    use crate::storage::tests::*;

    pub async fn init_store() -> RedisStore {
        let mut store = RedisStore::new("redis://127.0.0.1/").await.unwrap();
        store.flush_db().await.unwrap();
        store
    }

    #[tokio::test]
    #[serial]
    async fn integration_task_lifecycle() {
        task_lifecycle(init_store().await).await;
    }

    #[tokio::test]
    #[serial]
    async fn integration_create_task_is_single_flight() {
        create_task_is_single_flight(init_store().await).await;
    }

    #[tokio::test]
    #[serial]
    async fn integration_terminal_states_are_final() {
        terminal_states_are_final(init_store().await).await;
    }

    #[tokio::test]
    #[serial]
    async fn integration_remove_pending() {
        remove_pending(init_store().await).await;
    }

    #[tokio::test]
    #[serial]
    async fn integration_is_ready() {
        init_store().await.is_ready().await.unwrap();
    }
}

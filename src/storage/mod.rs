//! Storage backends of the two coordinators.
//!
//! The evaluator keeps its task records in a [`TaskStore`] and the received bundles in a
//! [`BundleStore`]; the developer keeps its uploads in an [`UploadStore`] and the received
//! results in a [`ResultStore`]. Every backend implements the traits it can serve:
//!
//! | backend         | traits                    |
//! | --------------- | ------------------------- |
//! | [`MemoryStore`] | all                       |
//! | [`FsStore`]     | all                       |
//! | [`RedisStore`]  | [`TaskStore`]             |

pub mod fs;
pub mod memory;
pub mod redis;
pub mod store;
pub mod traits;

pub use self::{
    fs::FsStore,
    memory::MemoryStore,
    redis::{RedisError, RedisStore},
    store::Store,
    traits::{
        BundleStore,
        ResultStore,
        StorageError,
        StorageResult,
        TaskCreate,
        TaskCreateError,
        TaskStore,
        TaskTransition,
        TaskTransitionError,
        UploadStore,
    },
};

#[cfg(test)]
pub(crate) mod tests;

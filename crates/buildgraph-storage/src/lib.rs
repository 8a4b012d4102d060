//! Temp storage: the cache that carries build products between nodes.
//!
//! Each node's outputs are described by manifests kept in two tiers: a local
//! directory on the build machine and an optional shared directory visible
//! to every agent. Files are packed into zip archives in shared storage and
//! extracted (then re-validated) on the machines that consume them.

pub mod archive;
pub mod duplicate;
pub mod manifest;
pub mod retry;
pub mod storage;

pub use duplicate::is_duplicate_build_product;
pub use manifest::{
    TempStorageBlock, TempStorageFile, TempStorageManifest, TempStorageTagManifest,
    TempStorageZipFile,
};
pub use retry::RetryPolicy;
pub use storage::{StorageOptions, TempStorage};

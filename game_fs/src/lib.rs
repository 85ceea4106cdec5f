//! Layered, archive-aware game filesystem.
//!
//! Resources are named by logical paths such as `sound/foo.wav` and resolved
//! against an ordered chain of search paths: host directories, PAK, WAD,
//! ZIP/PK3 and VPK archives, or a platform asset bundle. The first layer that
//! has a file serves it; writes go to the most recently mounted writable
//! directory.

#![forbid(unsafe_code)]

pub mod backend;
pub mod chain;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod filesystem;
pub mod flags;
pub mod handle;
pub mod logging;
pub mod mount_manifest;
pub mod path_policy;
pub mod pattern;

pub use backend::{AssetProvider, SearchPathBackend, SearchPathKind, StaticAssets};
pub use chain::{MountPosition, Resolved, SearchPath, SearchResult};
pub use config::FsConfig;
pub use error::{FsError, FsResult};
pub use filesystem::{copy, FindHandle, Filesystem, OpenMode};
pub use flags::SearchPathFlags;
pub use handle::FileHandle;

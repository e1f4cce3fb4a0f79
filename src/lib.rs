//! rtsync library
//!
//! Concurrent transfer engine for a remote artifact repository: upload,
//! download, server-side move/copy and delete of large match sets over a
//! bounded worker pool. Search results stream through disk-backed record
//! files, directory work is reduced before scheduling, and every file
//! transfer picks between a checksum skip, a bulk transfer and a split ranged
//! transfer.
//!
//! HTTP and query execution are collaborators: implement [`Transport`] and
//! [`Searcher`] and hand them to a [`ServiceContext`].

pub mod archive;
pub mod buffer;
pub mod checksum;
pub mod config;
pub mod context;
pub mod delete;
pub mod download;
pub mod error;
pub mod logger;
pub mod move_copy;
pub mod progress;
pub mod record;
pub mod reduce;
pub mod scheduler;
pub mod search;
pub mod stream;
pub mod summary;
pub mod symlink;
pub mod target;
pub mod transport;
pub mod upload;

pub use config::TransferConfig;
pub use context::ServiceContext;
pub use delete::{DeleteParams, DeleteService, PathsToDelete};
pub use download::{DownloadParams, DownloadService};
pub use error::TransferError;
pub use move_copy::{MoveCopyParams, MoveCopyService, MoveType};
pub use record::{ItemRecord, ItemType, Property};
pub use scheduler::CancelToken;
pub use search::{CommonParams, Searcher, SpecType};
pub use stream::RecordStream;
pub use summary::{OperationSummary, TransferTotals};
pub use transport::{Headers, Response, Transport};
pub use upload::{UploadParams, UploadService};

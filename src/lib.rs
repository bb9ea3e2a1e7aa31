//! Content-addressed indexing and conflict analysis for Paradox-style
//! mod ecosystems.
//!
//! The crate ingests a vanilla game directory plus ordered mod
//! directories, parses script and localization into typed artifacts, and
//! answers load-order questions: which file wins, which symbol wins, and
//! what a merged container looks like.

pub mod artifacts;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod parsing;
pub mod paths;
pub mod pool;
pub mod query;
pub mod queue;
pub mod registry;
pub mod resolve;
pub mod routing;
pub mod scan;
pub mod search;
pub mod store;
pub mod types;

pub use config::Settings;
pub use engine::{Engine, IngestReport, ParseBackend, ProcessStats};
pub use error::{ErrorClass, PoolError, RavenError, RavenResult};
pub use paths::VPath;
pub use queue::{BuildQueue, Daemon, EXIT_WRITER_EXISTS, PendingRefreshLog, WriterLock};
pub use registry::Registry;
pub use registry::playset::Playset;
pub use resolve::{ConflictReport, PolicyMatrix, Resolver};
pub use routing::{Envelope, RoutingTable};
pub use store::ContentStore;
pub use types::{BuildId, ContentHash, Cvid, FileId, FileKind, Fingerprint, ParserVersionId};

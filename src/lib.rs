//! Notes kept as plain text or `.knote` containers inside a private cloud
//! drive folder, indexed by a single `metadata.json` document.

pub mod attachments;
pub mod commands;
pub mod config;
pub mod container;
pub mod drive;
pub mod engine;
pub mod error;
pub mod local;
pub mod logging;
pub mod metadata;
pub mod notes;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod text_codec;

pub use commands::{Commands, NoteRequest, Response};
pub use config::Config;
pub use container::{Attachment, FileKind};
pub use drive::DriveStore;
pub use engine::{AreaInfo, EngineConfig, NoteEngine};
pub use error::{SyncError, SyncResult};
pub use metadata::{MetadataEntry, MetadataIndex, WriteStrategy};
pub use notes::{Mutation, NoteDraft};
pub use reconcile::{Note, Reconciliation, SkipReason, Skipped};
pub use remote::{MemoryStore, RemoteFile, RemoteStore};
pub use session::{OAuthSession, Session, StaticSession};

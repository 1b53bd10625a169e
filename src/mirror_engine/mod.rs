pub mod engine;
pub mod scanner;
pub mod types;

pub use engine::MirrorEngine;
pub use scanner::{count_files, scan, Inventory, ScanCount};
pub use types::{
    CopyDecision, CopyReason, DeletionCandidate, EntryKind, FileMetadata, MirrorEvent, MirrorPlan,
    MirrorReport,
};

//! A class path made of many roots overlaid into a single namespace.
//!
//! Roots are in-memory trees, zip archives or plain directories. Read-only
//! roots are absorbed into a concurrent path index (archives are scanned in
//! the background), so "does this path exist" can be answered without asking
//! every root in turn.

pub mod classpath;
pub mod config;
pub mod entry_path;
pub mod host_root;
pub(crate) mod index;
pub mod joined_root;
pub mod mem_root;
pub(crate) mod registry;
pub mod root;
pub mod scanner;
pub mod zip_root;

use std::io;

use thiserror::Error;

pub use classpath::{ClassPath, PathResult};
pub use config::ClassPathConfig;
pub use entry_path::{hash_str, normalize, EntryPath};
pub use host_root::HostRoot;
pub use joined_root::JoinedRoot;
pub use mem_root::MemoryRoot;
pub use root::{Root, RootKind, RootVisitor, WalkControl};
pub use scanner::ScanScheduler;
pub use zip_root::ZipRoot;

pub type Result<T> = std::result::Result<T, ClassPathError>;

/// Error type for external users
#[derive(Error, Debug)]
pub enum ClassPathError {
    /// Metadata was attached to a root of a class path that declared none
    #[error("cannot attach metadata to a root, this class path doesn't declare a metadata type")]
    MetadataNotDeclared,
    /// Metadata of the wrong type was attached to a root
    #[error("metadata type mismatch: expected {expected}")]
    MetadataTypeMismatch { expected: &'static str },
    /// The index disagreed with a brute-force lookup over every root.
    /// This is always a bug in the index.
    #[error("{operation}( {path} ) returned a different answer to the slow lookup!\n{report}")]
    Inconsistent {
        operation: &'static str,
        path: String,
        report: String,
    },
    /// Something failed when doing IO
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    /// An archive could not be opened or read
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

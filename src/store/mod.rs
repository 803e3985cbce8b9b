//! Content-addressable cache of component sources
//!
//! Source files are stored once per unique content digest and shared by
//! every component, run and source reference that resolves to the same
//! bytes. Workspaces receive hard links (or copies) of the stored files.

pub mod cas;
pub mod fileset;
pub mod filter;
pub mod index;
pub mod materialize;
pub mod provider;
pub mod source;

pub use cas::{GcCandidate, GcReport, Store, StoreStats};
pub use fileset::{CanonicalFileSet, FileEntry};
pub use filter::PathFilter;
pub use index::CacheObject;
pub use materialize::MaterializeReport;
pub use provider::{LocalSourceProvider, SourceProvider};
pub use source::{CachePolicy, SourceDescriptor};

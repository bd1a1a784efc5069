//! Recovery of damaged cross-reference data
//!
//! When the xref chain of a file cannot be read, the whole file is scanned
//! for `n g obj` headers and the table is rebuilt from what is found. The
//! result is best effort: objects that are present in the file are reachable
//! even if every xref section is lost, as long as a trailer (or at least a
//! catalog) survives.

pub mod xref_recovery;

pub use xref_recovery::{scan_object_headers, ObjectHeader, RecoveredXRef, RecoveryStats, XRefRecovery};

//! Rowlift Common Library
//!
//! Shared ambient concerns for the rowlift workspace. Currently this is the
//! centralized logging setup used by every binary; pipeline types live in
//! `rowlift-core`.

pub mod logging;

pub use logging::{init_logging, LogConfig};

//! Main application modules.
//!
//! This module provides shutdown handling and the statistics and summary
//! printing used by the main application.

pub mod shutdown;
pub mod statistics;

// Re-export public API
pub use shutdown::cancel_on_ctrl_c;
pub use statistics::{print_probe_statistics, print_report_summary};

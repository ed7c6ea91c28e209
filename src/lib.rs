//! IOCForge
//!
//! Extracts indicators of compromise from report-document tables and
//! verifies their reputation against multiple web lookup sources, some
//! automated and some requiring human judgment.

pub mod checker;
pub mod extract;
pub mod models;
pub mod report;
pub mod sources;
pub mod surface;

//! Moderation state machine and pending-shadow subsystem.

/// Status/moderation transitions for add/edit/delete/restore/report.
pub mod actions;
/// Pending shadow creation and resolution.
pub mod pending;

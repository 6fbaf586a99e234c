//! Entities for the engine configuration and notification tables
//!
//! Domain rows (mentees, laporan, ...) are handled dynamically as JSON records.

pub mod engine;
pub mod notification;

pub use engine::{
    NewFormUpdateLog, NotificationRule, PayloadTemplate, TablePermission, TableRelation, WorkflowRule,
};
pub use notification::Notification;

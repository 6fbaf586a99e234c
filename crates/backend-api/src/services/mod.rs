pub mod dedupe;
pub mod error;
pub mod fanout;
pub mod form_rules;
pub mod forms;
pub mod listing;
pub mod monitoring;
pub mod notification;
pub mod relations;
pub mod users;

#[cfg(test)]
pub mod test_utils;

pub use error::*;

pub mod auth;
pub mod forms;
pub mod health;
pub mod listing;
pub mod monitoring;
pub mod notifications;
pub mod users;

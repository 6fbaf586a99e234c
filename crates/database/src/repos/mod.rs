//! Database repository implementations

pub mod cache_repository;
pub mod engine_repository;
pub mod notification_repository;
pub mod record_repository;

pub use cache_repository::CacheRepository;
pub use engine_repository::EngineRepository;
pub use notification_repository::NotificationRepository;
pub use record_repository::RecordRepository;

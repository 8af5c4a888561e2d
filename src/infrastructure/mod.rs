pub mod block_repository;
pub mod config;
pub mod error;
pub mod identity_client;
pub mod logging;
pub mod mailer;
pub mod notification_repository;
pub mod storage;
pub mod user_repository;

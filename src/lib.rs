pub mod config;
pub mod docx;
pub mod error;
pub mod service;
pub mod store;
pub mod sweep;
pub mod transaction;

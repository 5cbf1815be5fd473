pub mod auth;
pub mod bot;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod wb;
pub mod web;

pub use config::AppConfig;
pub use error::{AppError, AppResult};

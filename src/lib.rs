pub mod api;
pub mod config;
pub mod db;
pub mod filter;

pub use self::config::Config;

//! Database module for tpl-spider
//!
//! Provides PostgreSQL operations on the shared spider_task table.

pub mod connection;
pub mod models;
pub mod spider_tasks;

pub use connection::{
    create_lazy_pool, create_pool, create_pool_from_env, database_url_from_env,
    validate_database_url, DbPool,
};
pub use models::*;

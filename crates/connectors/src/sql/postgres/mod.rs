pub mod adapter;
pub mod config;
pub mod encoder;
pub mod query;

mod metadata;
mod row;
mod session;
mod utils;

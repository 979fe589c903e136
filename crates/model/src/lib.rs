pub mod core;
pub mod errors;
pub mod filter;
pub mod partition;
pub mod records;
pub mod schema;

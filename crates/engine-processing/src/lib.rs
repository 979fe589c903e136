pub mod error;
pub mod extractor;
pub mod loader;
pub mod retry;
pub mod schema;
pub mod splitter;

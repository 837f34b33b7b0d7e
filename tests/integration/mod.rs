//! Integration tests for lesson generation

mod markdown_checks;
mod retrieval_cache;
mod run_store;
mod scenarios;
pub mod test_utils;
mod worker_pool;

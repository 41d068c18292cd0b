// See <https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html>

pub mod caches;
pub mod concurrency;
pub mod config;
pub mod failures;
pub mod lazy_values;
pub mod recursion;
pub mod utils;

pub use utils::*;

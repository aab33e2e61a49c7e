pub mod utils;

mod questions;

pub use utils::test_db as test_utils;

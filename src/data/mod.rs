pub mod batcher;
pub mod corpus;
pub mod fetch;
pub mod render;
pub mod split;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tokenizer;

pub use batcher::*;
pub use corpus::*;
pub use fetch::*;
pub use render::*;
pub use split::*;
pub use tokenizer::*;

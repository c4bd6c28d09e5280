#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_panics_doc,
    clippy::missing_errors_doc,
    clippy::doc_markdown,
    clippy::cast_possible_wrap,
    clippy::module_name_repetitions
)]

//! HellaSwag evaluation data pipeline.
//!
//! Fetches the benchmark splits once, streams their JSON-lines records and
//! renders each record into a padded `(4, max_len)` token matrix plus an
//! ending mask, ready for a language model to score the four candidates.

pub mod config;
pub mod data;

pub use config::HellaSwagConfig;
pub use data::{
    Corpus, Fetcher, Gpt2Tokenizer, HellaSwagBatch, HellaSwagBatcher, HttpTransport, Matrix,
    Record, Records, RenderedExample, Split, Tokenizer, render,
};

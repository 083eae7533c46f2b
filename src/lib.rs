//! Image ingestion for document publishing
//!
//! Takes the images a document references (local paths or remote URLs),
//! validates and compresses them, uploads them to a remote media store with
//! retries, and returns the media IDs and URLs that replace the document's
//! `IMG:<n>` placeholders.

pub mod batch;
pub mod error;
pub mod fetch;
pub mod image;
pub mod models;
pub mod processor;
pub mod store;

pub use error::{Error, Result};

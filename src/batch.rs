//! Ordinal bookkeeping for the images of one document.
//!
//! Each distinct reference gets the position of its first appearance,
//! starting at 1, which names its `IMG:<n>` placeholder in generated output.

use crate::models::{ImageReference, UploadResult};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

pub fn placeholder(ordinal: usize) -> String {
    format!("IMG:{}", ordinal)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchEntry {
    pub ordinal: usize,
    pub reference: ImageReference,
}

#[derive(Debug, Clone, Default)]
pub struct ImageBatch {
    entries: Vec<BatchEntry>,
}

impl ImageBatch {
    /// Parse and deduplicate references, keeping first-appearance order.
    pub fn collect<I, S>(references: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for raw in references {
            let reference = ImageReference::parse(raw.as_ref());
            if seen.insert(reference.clone()) {
                entries.push(BatchEntry {
                    ordinal: entries.len() + 1,
                    reference,
                });
            }
        }
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ordinal_of(&self, reference: &ImageReference) -> Option<usize> {
        self.entries
            .iter()
            .find(|entry| &entry.reference == reference)
            .map(|entry| entry.ordinal)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedImage {
    pub ordinal: usize,
    pub reference: ImageReference,
    pub error: String,
}

/// Outcome of a batch: uploads keyed by ordinal plus the images that were skipped.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub uploaded: BTreeMap<usize, UploadResult>,
    pub failed: Vec<FailedImage>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// `(IMG:<n>, remote_url)` pairs in ordinal order.
    pub fn placeholder_map(&self) -> Vec<(String, String)> {
        self.uploaded
            .iter()
            .map(|(ordinal, result)| (placeholder(*ordinal), result.remote_url.clone()))
            .collect()
    }
}

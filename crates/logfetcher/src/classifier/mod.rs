// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Vendor classification and field extraction for raw device logs.
//!
//! A [`Classifier`] walks a prioritized list of [`Dialect`]s and hands the
//! message to the first one whose marker matches. Messages no dialect claims
//! still produce a record of brand `unknown`, carrying only the raw text, the
//! origin host and the reported time, so they can be observed before being
//! filtered out by the consumer.
//!
//! ```text
//!   RawMessage ──> lowercase ──> Ruijie? ──> Forti? ──> Unknown
//!                                   │          │           │
//!                                   v          v           v
//!                                 NormalizedRecord (brand + fields)
//! ```

mod forti;
mod ruijie;

pub use forti::Forti;
pub use ruijie::Ruijie;

use crate::types::{Brand, NormalizedRecord, RawMessage};
use tracing::trace;

/// A vendor log grammar: a marker predicate plus a key=value extractor.
pub trait Dialect: Send + Sync {
    fn brand(&self) -> Brand;

    /// `lowered` is the message body, already lower-cased.
    fn matches(&self, lowered: &str) -> bool;

    fn extract(&self, raw: &RawMessage) -> NormalizedRecord;
}

/// Ordered set of dialects; the first match wins.
pub struct Classifier {
    dialects: Vec<Box<dyn Dialect>>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(vec![Box::new(Ruijie), Box::new(Forti)])
    }
}

impl std::fmt::Debug for Classifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.dialects.iter().map(|d| d.brand()))
            .finish()
    }
}

impl Classifier {
    #[must_use]
    pub fn new(dialects: Vec<Box<dyn Dialect>>) -> Self {
        Self { dialects }
    }

    /// Classifies and extracts a single message. Never fails.
    #[must_use]
    pub fn classify(&self, raw: &RawMessage) -> NormalizedRecord {
        let lowered = raw.message.to_lowercase();
        for dialect in &self.dialects {
            if dialect.matches(&lowered) {
                trace!("Message classified as {}", dialect.brand());
                return dialect.extract(raw);
            }
        }
        let mut record = NormalizedRecord::new(Brand::Unknown, raw);
        record.timestamp = raw.reported_at();
        record
    }
}

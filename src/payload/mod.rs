//! Tolerant extraction of numeric metrics from sensor JSON.
//!
//! Producers in the field disagree on key names and sometimes send numbers as
//! strings with a unit suffix. This module is the compatibility boundary that
//! absorbs those differences before anything reaches the cache.

pub mod aliases;
pub mod normalizer;

pub use aliases::FieldAliases;
pub use normalizer::{decode_payload, extract, extract_field, parse_object, Extraction};

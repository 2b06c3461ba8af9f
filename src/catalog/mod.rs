// src/catalog/mod.rs
//! Minimal bibliographic catalog record model and its serialisations.

pub mod record;
pub mod writer;

pub use record::{DataField, EditInstruction, EditKind, Field, Record, Subfield};
pub use writer::{Encoded, OutputKind, RecordWriter};

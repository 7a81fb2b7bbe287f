#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]

//! The HNSW graph, its payload-side filter engine, and the on-disk segment
//! format the collection layer snapshots it into.

pub mod error;
pub mod filter_engine;
pub mod hnsw;
pub mod payload_index;
pub mod persistence;

pub use error::{IndexError, Result};
pub use filter_engine::PlannedFilter;
pub use hnsw::{HnswIndex, NodeId};
pub use payload_index::{GeoPoint, PayloadIndex};
pub use persistence::{HnswSnapshot, SnapshotHeader};

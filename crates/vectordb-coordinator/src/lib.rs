#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! The DAG-based multi-leader write coordinator: every node accepts
//! writes locally, links them into a shared causal graph, and finalizes
//! them once enough descendant depth has accumulated to rule out a
//! reorg. Conflicting concurrent writes to the same key are detected and
//! resolved per a configurable strategy.

pub mod clock;
pub mod dag;
pub mod digest;
pub mod error;
pub mod vertex;

pub use clock::VectorClock;
pub use dag::{Coordinator, ResolutionStrategy, VertexStatus, DEFAULT_FINALIZATION_DEPTH};
pub use digest::{LogDigest, DIGEST_BUCKETS};
pub use error::{CoordinatorError, Result};
pub use vertex::{author_id_hex, vertex_id_hex, AuthorId, OperationPayload, Vertex, VertexId};

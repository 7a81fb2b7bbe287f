#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::future_not_send)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::type_complexity)]
#![allow(clippy::cast_sign_loss)]

//! Binds a vector store, payload index, and HNSW graph into a `Collection`,
//! and a `Collection`'s shards into a `CollectionManager` routed by a
//! consistent-hash ring and tracked by a DAG write coordinator.

pub mod collection;
pub mod digest;
pub mod error;
pub mod manager;
pub mod query;

pub use collection::{Collection, CollectionOptions, CollectionStats, Durability};
pub use error::CollectionError;
pub use manager::{CollectionCluster, CollectionManager};

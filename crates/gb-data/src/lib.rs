//! Data ingestion and artifact storage for GradBoost.
//!
//! - `loaders`: CSV/TSV/Parquet feature and label tables, id and feature lists
//! - `split`: train/test partition by held-out instance ids
//! - `storage`: model artifacts, per-repetition tables and the results log

pub mod loaders;
pub mod split;
pub mod storage;

pub use loaders::*;
pub use split::*;
pub use storage::*;

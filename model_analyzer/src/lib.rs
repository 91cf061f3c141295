//! Deterministic partitioning of a `ModelSpec` into `SubgraphDef`s given a
//! worker set and a preparation mode. Grounded in
//! `original_source/band/model_analyzer.cc`'s two-phase design: first derive
//! "unit subgraphs" (the indivisible scheduling grain every mode builds on),
//! then expand those into the `SubgraphDef`s a given preparation mode wants.

mod analyzer;
mod preparation;

pub use analyzer::{ModelAnalyzer, WorkerDescriptor};

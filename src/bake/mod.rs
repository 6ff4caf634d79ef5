//! Bake pipeline: material rewriting, teardown and the bake run itself.
//!
//! - `scratch`: cloning upstream subgraphs and the RAII scopes that undo them
//! - `group_expand`: flattening node groups inside cloned subgraphs
//! - `isolate`: the export graph synthesizer
//! - `preconditions`: checks that must pass before a run starts
//! - `orchestrator`: the bake run over objects and jobs
//! - `types`: bake targets, requests and reports

pub mod group_expand;
pub mod isolate;
pub mod orchestrator;
pub mod preconditions;
pub mod scratch;
pub mod types;

pub use isolate::{ExportNodes, IsolateOptions, isolate, prepare_export};
pub use orchestrator::Baker;
pub use preconditions::check_preconditions;
pub use scratch::{SamplesOverride, ScratchScope};
pub use types::{BakeKind, BakeReport, BakeRequest, BakeStatus, BakeTarget, BakedImage, SkipReason};

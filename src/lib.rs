//! terrapatch - batch-build Gaea terrain files with per-run JSON patches

pub mod bindings;
pub mod config;
pub mod document;
pub mod driver;
pub mod error;
pub mod output_dir;
pub mod patch;
pub mod replace;
pub mod runner;
pub mod variables;
pub mod walker;

pub use bindings::{collect_bindings, propagate, Binding, BindingSet, PropagationReport};
pub use config::Config;
pub use document::{Document, ValueKind};
pub use driver::{create_tool, BuildTool, DriverSettings, MockTool, RunDriver, RunSummary, SwarmTool};
pub use error::{FixSuggestion, PatchError};
pub use patch::{PatchOutcome, PatchReport, PatchSettings, Patcher, RunSpec};
pub use replace::{replace_all, update_all};
pub use runner::{BatchOptions, BatchRunner, RunRecord};
pub use variables::{Evaluation, Evaluator, VarValue, VariableTable};
pub use walker::{count_key, for_each_key, for_each_key_mut};

//! Per-run patch pipeline
//!
//! ```text
//! original ──clone──▶ Destination ──▶ PostBuildScript ──▶ Variables ──▶ Bindings ──▶ patched
//!                     (fatal)          (fatal)            (best effort)  (best effort)
//! ```
//!
//! Structural failures (type or count mismatch on the destination or hook
//! key) abort the run before anything reaches the build tool. Variable and
//! binding failures are logged, collected in the [`PatchReport`] and do not
//! stop the rest of the patch.

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;

use crate::bindings::{collect_bindings, propagate};
use crate::error::PatchError;
use crate::replace::{replace_all, update_all};
use crate::variables::{Evaluator, VariableTable};

pub const DESTINATION_KEY: &str = "Destination";
pub const POST_BUILD_KEY: &str = "PostBuildScript";
pub const VARIABLES_KEY: &str = "Variables";

/// Document keys and fixed values the patcher writes.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSettings {
    pub destination_key: String,
    pub post_build_key: String,
    /// Script body stamped into every post-build hook (no-op by default)
    pub post_build_script: String,
}

impl Default for PatchSettings {
    fn default() -> Self {
        Self {
            destination_key: DESTINATION_KEY.to_string(),
            post_build_key: POST_BUILD_KEY.to_string(),
            post_build_script: String::new(),
        }
    }
}

/// Inputs for one run.
#[derive(Debug, Clone, Default)]
pub struct RunSpec {
    /// Destination stamped into the document
    pub output_directory: String,
    /// Raw `name=expr` entries
    pub variable_assignments: Vec<String>,
}

/// What a patch pass changed and what it had to skip.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub destinations: usize,
    pub post_build_hooks: usize,
    /// `Variables` entries overwritten
    pub variables_written: usize,
    pub bindings_applied: usize,
    pub bindings_unbound: usize,
    /// Every recoverable failure, in the order it happened
    pub warnings: Vec<PatchError>,
}

/// Result of a successful patch pass.
#[derive(Debug)]
pub struct PatchOutcome {
    pub document: Value,
    pub variables: VariableTable,
    pub report: PatchReport,
}

/// Produces one patched document per run.
pub struct Patcher<R = StdRng> {
    settings: PatchSettings,
    evaluator: Evaluator<R>,
}

impl Patcher<StdRng> {
    pub fn new(settings: PatchSettings) -> Self {
        Self {
            settings,
            evaluator: Evaluator::new(),
        }
    }
}

impl<R: Rng> Patcher<R> {
    /// Patcher with a caller-supplied random source
    pub fn with_rng(settings: PatchSettings, rng: R) -> Self {
        Self {
            settings,
            evaluator: Evaluator::with_rng(rng),
        }
    }

    pub fn settings(&self) -> &PatchSettings {
        &self.settings
    }

    /// Patch a private copy of `original` for one run.
    ///
    /// Variables are evaluated fresh on every call.
    pub fn patch(&mut self, original: &Value, run: &RunSpec) -> Result<PatchOutcome, PatchError> {
        let mut document = original.clone();
        let mut report = PatchReport::default();

        report.destinations = replace_all(
            &mut document,
            &self.settings.destination_key,
            vec![Value::String(run.output_directory.clone())],
        )?;
        report.post_build_hooks = replace_all(
            &mut document,
            &self.settings.post_build_key,
            vec![Value::String(self.settings.post_build_script.clone())],
        )?;
        if report.destinations == 0 {
            tracing::warn!(
                key = %self.settings.destination_key,
                "no destination key in document; output location left to the file"
            );
        }

        let evaluation = self.evaluator.evaluate(&run.variable_assignments);
        report.warnings.extend(evaluation.failures);
        let variables = evaluation.table;

        report.variables_written = write_variables(&mut document, &variables);

        let binding_set = collect_bindings(&document);
        report.warnings.extend(binding_set.errors);
        let propagation = propagate(&mut document, &binding_set.bindings, &variables);
        report.bindings_applied = propagation.applied;
        report.bindings_unbound = propagation.unbound;
        report.warnings.extend(propagation.errors);

        tracing::info!(
            destinations = report.destinations,
            variables = report.variables_written,
            bindings = report.bindings_applied,
            warnings = report.warnings.len(),
            "document patched"
        );

        Ok(PatchOutcome {
            document,
            variables,
            report,
        })
    }
}

/// Overwrite existing entries of every `Variables` map with the evaluated
/// values (string form). Keys are never added or removed.
fn write_variables(doc: &mut Value, variables: &VariableTable) -> usize {
    let mut written = 0;
    update_all(doc, VARIABLES_KEY, |map, key| {
        let Some(Value::Object(entries)) = map.get_mut(key) else {
            return;
        };
        for (name, slot) in entries.iter_mut() {
            if let Some(value) = variables.get(name) {
                *slot = Value::String(value.to_string());
                written += 1;
            }
        }
    });
    written
}

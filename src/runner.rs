//! Batch runner
//!
//! Executes N builds strictly one after another:
//!
//! ```text
//! for each run:
//!   resolve output dir ──▶ patch (fresh variables) ──▶ persist ──▶ build ──▶ wait ──▶ cleanup
//! ```
//!
//! Every log line of a run is emitted inside a `run` span carrying the run
//! index, so the evaluator, propagator and driver need no logger of their
//! own. The first fatal error stops the batch.

use std::path::PathBuf;

use rand::rngs::StdRng;
use rand::Rng;
use serde_json::Value;

use crate::driver::{RunDriver, RunSummary};
use crate::error::PatchError;
use crate::output_dir::next_numbered;
use crate::patch::{PatchReport, Patcher, RunSpec};

/// What to run.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// File name of the source terrain (used for the temporary copy)
    pub terrain_name: String,
    /// Base output directory (absolute)
    pub output: PathBuf,
    pub runs: usize,
    /// Give each run its own numbered subdirectory of `output`
    pub increment: bool,
    pub variable_assignments: Vec<String>,
}

/// One completed run.
#[derive(Debug)]
pub struct RunRecord {
    /// 1-based
    pub index: usize,
    pub output_dir: PathBuf,
    pub report: PatchReport,
    pub summary: RunSummary,
}

pub struct BatchRunner<R = StdRng> {
    patcher: Patcher<R>,
    driver: RunDriver,
}

impl<R: Rng> BatchRunner<R> {
    pub fn new(patcher: Patcher<R>, driver: RunDriver) -> Self {
        Self { patcher, driver }
    }

    /// Run the whole batch against an immutable `original`.
    pub fn run(&mut self, original: &Value, options: &BatchOptions) -> Result<Vec<RunRecord>, PatchError> {
        if options.runs == 0 {
            return Err(PatchError::InvalidArgs {
                reason: "number of runs must be greater than 0".to_string(),
            });
        }

        let mut records = Vec::with_capacity(options.runs);
        for index in 1..=options.runs {
            let span = tracing::info_span!("run", index, output = tracing::field::Empty);
            let _enter = span.enter();

            let record = self.run_once(index, original, options)?;
            records.push(record);
        }
        Ok(records)
    }

    fn run_once(&mut self, index: usize, original: &Value, options: &BatchOptions) -> Result<RunRecord, PatchError> {
        let output_dir = if options.increment {
            next_numbered(&options.output)?
        } else {
            options.output.clone()
        };
        tracing::Span::current().record("output", tracing::field::display(output_dir.display()));
        tracing::info!("starting run {}/{}", index, options.runs);

        let spec = RunSpec {
            output_directory: output_dir.display().to_string(),
            variable_assignments: options.variable_assignments.clone(),
        };
        let outcome = self.patcher.patch(original, &spec)?;
        for (name, value) in &outcome.variables {
            tracing::info!(variable = %name, value = %value, "variable");
        }

        let summary = self
            .driver
            .execute(&outcome.document, &options.terrain_name, &output_dir)?;

        Ok(RunRecord {
            index,
            output_dir,
            report: outcome.report,
            summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{DriverSettings, MockTool};
    use crate::patch::PatchSettings;
    use rand::SeedableRng;
    use serde_json::json;
    use std::time::Duration;

    fn runner(temp_dir: PathBuf) -> (BatchRunner<StdRng>, std::sync::Arc<std::sync::Mutex<Vec<crate::driver::MockLaunch>>>) {
        let tool = MockTool::new("report.txt");
        let launches = tool.launches_handle();
        let driver = RunDriver::new(
            Box::new(tool),
            DriverSettings {
                temp_dir,
                marker_file: "report.txt".to_string(),
                poll_interval: Duration::from_millis(5),
                heartbeat: Duration::from_secs(60),
                timeout: Some(Duration::from_secs(5)),
                exit_grace: Duration::from_millis(10),
            },
        );
        let patcher = Patcher::with_rng(PatchSettings::default(), StdRng::seed_from_u64(11));
        (BatchRunner::new(patcher, driver), launches)
    }

    #[test]
    fn zero_runs_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runner, _) = runner(dir.path().join("temp"));
        let options = BatchOptions {
            terrain_name: "a.terrain".into(),
            output: dir.path().join("out"),
            runs: 0,
            increment: false,
            variable_assignments: vec![],
        };
        assert!(matches!(
            runner.run(&json!({}), &options),
            Err(PatchError::InvalidArgs { .. })
        ));
    }

    #[test]
    fn increment_gives_each_run_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runner, launches) = runner(dir.path().join("temp"));
        let out = dir.path().join("out");
        let options = BatchOptions {
            terrain_name: "a.terrain".into(),
            output: out.clone(),
            runs: 3,
            increment: true,
            variable_assignments: vec!["s=lambda: randint(0, 99)".into()],
        };
        let original = json!({"Build": {"Destination": ""}, "Variables": {"s": "0"}});

        let records = runner.run(&original, &options).unwrap();

        let dirs: Vec<_> = records.iter().map(|r| r.output_dir.clone()).collect();
        assert_eq!(dirs, vec![out.join("001"), out.join("002"), out.join("003")]);
        let launches = launches.lock().unwrap();
        for (launch, dir) in launches.iter().zip(&dirs) {
            assert_eq!(launch.document["Build"]["Destination"], dir.display().to_string());
        }
        assert_eq!(original["Build"]["Destination"], "");
    }

    #[test]
    fn fatal_patch_error_stops_before_build() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runner, launches) = runner(dir.path().join("temp"));
        let options = BatchOptions {
            terrain_name: "a.terrain".into(),
            output: dir.path().join("out"),
            runs: 2,
            increment: false,
            variable_assignments: vec![],
        };
        let err = runner.run(&json!({"Destination": false}), &options).unwrap_err();
        assert!(matches!(err, PatchError::TypeMismatch { .. }));
        assert!(launches.lock().unwrap().is_empty());
    }
}

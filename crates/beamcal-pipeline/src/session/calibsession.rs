//! Calibration session container.
//!
//! A session holds one problem's config, input, per-stage state, final output
//! and an audit log. Stage functions take the session by `&mut` and run their
//! body through [`CalibrationSession::run_stage`], which reports progress and
//! records success or failure in the log.

use anyhow::{anyhow, bail, Result};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use super::problem_type::{InvalidationPolicy, ProblemType};
use super::types::{LogEntry, SessionMetadata};
use crate::progress::ProgressObserver;

/// Mutable state container for one calibration problem.
///
/// ```no_run
/// use beamcal_pipeline::laser_rig::{run_calibration, LaserRigProblem};
/// use beamcal_pipeline::{CalibrationSession, DirectoryImageSource, LogProgress};
/// # fn main() -> anyhow::Result<()> {
/// # let input = unimplemented!();
/// let mut session = CalibrationSession::<LaserRigProblem>::new();
/// session.set_input(input)?;
/// let images = DirectoryImageSource::new("captures");
/// run_calibration(&mut session, &images, &mut LogProgress)?;
/// let export = session.export()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "P: ProblemType")]
pub struct CalibrationSession<P: ProblemType> {
    pub metadata: SessionMetadata,
    /// Always present; defaults until set.
    pub config: P::Config,
    input: Option<P::Input>,
    pub state: P::State,
    output: Option<P::Output>,
    pub log: Vec<LogEntry>,
}

impl<P: ProblemType> Default for CalibrationSession<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: ProblemType> CalibrationSession<P> {
    pub fn new() -> Self {
        Self {
            metadata: SessionMetadata::new(P::name(), P::schema_version()),
            config: P::Config::default(),
            input: None,
            state: P::State::default(),
            output: None,
            log: Vec::new(),
        }
    }

    pub fn with_description(description: impl Into<String>) -> Self {
        let mut session = Self::new();
        session.metadata.description = Some(description.into());
        session
    }

    pub fn with_input(input: P::Input) -> Result<Self> {
        let mut session = Self::new();
        session.set_input(input)?;
        Ok(session)
    }

    fn invalidate(&mut self, policy: InvalidationPolicy) {
        if policy.clear_state {
            self.state = P::State::default();
        }
        if policy.clear_output {
            self.output = None;
        }
    }

    /// Validate and store the input, then apply
    /// [`ProblemType::on_input_change`].
    pub fn set_input(&mut self, input: P::Input) -> Result<()> {
        P::validate_input(&input)?;
        self.invalidate(P::on_input_change());
        self.input = Some(input);
        self.metadata.touch();
        Ok(())
    }

    pub fn input(&self) -> Option<&P::Input> {
        self.input.as_ref()
    }

    pub fn require_input(&self) -> Result<&P::Input> {
        self.input.as_ref().ok_or_else(|| anyhow!("input not set"))
    }

    pub fn has_input(&self) -> bool {
        self.input.is_some()
    }

    /// Validate and store the config, then apply
    /// [`ProblemType::on_config_change`].
    pub fn set_config(&mut self, config: P::Config) -> Result<()> {
        P::validate_config(&config)?;
        self.invalidate(P::on_config_change());
        self.config = config;
        self.metadata.touch();
        Ok(())
    }

    /// Edit a copy of the config and store it through [`Self::set_config`].
    pub fn update_config(&mut self, f: impl FnOnce(&mut P::Config)) -> Result<()> {
        let mut config = self.config.clone();
        f(&mut config);
        self.set_config(config)
    }

    pub fn output(&self) -> Option<&P::Output> {
        self.output.as_ref()
    }

    pub fn require_output(&self) -> Result<&P::Output> {
        self.output
            .as_ref()
            .ok_or_else(|| anyhow!("output not computed"))
    }

    pub fn set_output(&mut self, output: P::Output) {
        self.output = Some(output);
        self.metadata.touch();
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn export(&self) -> Result<P::Export> {
        P::export(self.require_output()?, &self.config)
    }

    /// Input, config and their combination all pass validation.
    pub fn validate(&self) -> Result<()> {
        let input = self.require_input()?;
        P::validate_input(input)?;
        P::validate_config(&self.config)?;
        P::validate_input_config(input, &self.config)
    }

    pub fn log_success(&mut self, operation: impl Into<String>) {
        self.log.push(LogEntry::success(operation, None));
        self.metadata.touch();
    }

    pub fn log_success_with_notes(&mut self, operation: impl Into<String>, notes: impl Into<String>) {
        self.log
            .push(LogEntry::success(operation, Some(notes.into())));
        self.metadata.touch();
    }

    pub fn log_failure(&mut self, operation: impl Into<String>, error: impl Into<String>) {
        self.log.push(LogEntry::failure(operation, error));
        self.metadata.touch();
    }

    /// Run one pipeline stage.
    ///
    /// Reports `0.0` before `body` runs. On success the notes `body` returns
    /// are logged and `1.0` is reported; on failure the error chain is
    /// logged (session log and `log::error!`) and returned unchanged.
    pub fn run_stage(
        &mut self,
        stage: &str,
        progress: &mut dyn ProgressObserver,
        body: impl FnOnce(&mut Self, &mut dyn ProgressObserver) -> Result<String>,
    ) -> Result<()> {
        progress.report(stage, 0.0);
        let started = Instant::now();
        match body(self, &mut *progress) {
            Ok(notes) => {
                info!("{stage}: {notes}");
                self.log
                    .push(LogEntry::success(stage, Some(notes)).timed(started.elapsed()));
                self.metadata.touch();
                progress.report(stage, 1.0);
                Ok(())
            }
            Err(err) => {
                error!("{stage} failed: {err:#}");
                self.log
                    .push(LogEntry::failure(stage, format!("{err:#}")).timed(started.elapsed()));
                self.metadata.touch();
                Err(err)
            }
        }
    }

    /// Drop state and output, keeping input, config and the log.
    pub fn reset_computed(&mut self) {
        self.invalidate(InvalidationPolicy::CLEAR_COMPUTED);
        self.metadata.touch();
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Load a session, rejecting other problem types and newer schemas.
    pub fn from_json(json: &str) -> Result<Self> {
        let session: Self = serde_json::from_str(json)?;
        if session.metadata.problem_type != P::name() {
            bail!(
                "session is for problem '{}', expected '{}'",
                session.metadata.problem_type,
                P::name()
            );
        }
        if session.metadata.schema_version > P::schema_version() {
            bail!(
                "session schema version {} is newer than supported {}",
                session.metadata.schema_version,
                P::schema_version()
            );
        }
        Ok(session)
    }
}

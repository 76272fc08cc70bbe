//! The [`ProblemType`] trait: what a calibration session stores and how it
//! validates and exports it.

use anyhow::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// What a session discards when its input or config changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationPolicy {
    pub clear_state: bool,
    pub clear_output: bool,
}

impl InvalidationPolicy {
    pub const KEEP_ALL: Self = Self {
        clear_state: false,
        clear_output: false,
    };

    /// Drop every computed result; input and config survive.
    pub const CLEAR_COMPUTED: Self = Self {
        clear_state: true,
        clear_output: true,
    };
}

impl Default for InvalidationPolicy {
    fn default() -> Self {
        Self::KEEP_ALL
    }
}

/// A calibration problem run through a [`CalibrationSession`](super::CalibrationSession).
///
/// Step functions for the problem live next to its implementation and mutate
/// the session; this trait only fixes the data types and the hooks the
/// session calls itself.
pub trait ProblemType: Sized + 'static {
    type Config: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Input: Clone + Serialize + DeserializeOwned + Debug;
    /// Intermediate results of the individual stages.
    type State: Clone + Default + Serialize + DeserializeOwned + Debug;
    type Output: Clone + Serialize + DeserializeOwned + Debug;
    type Export: Clone + Serialize + DeserializeOwned + Debug;

    /// Stable identifier, stored in session metadata.
    fn name() -> &'static str;

    fn schema_version() -> u32 {
        1
    }

    fn validate_input(_input: &Self::Input) -> Result<()> {
        Ok(())
    }

    fn validate_config(_config: &Self::Config) -> Result<()> {
        Ok(())
    }

    /// Checks that need both input and config.
    fn validate_input_config(_input: &Self::Input, _config: &Self::Config) -> Result<()> {
        Ok(())
    }

    fn on_input_change() -> InvalidationPolicy {
        InvalidationPolicy::CLEAR_COMPUTED
    }

    fn on_config_change() -> InvalidationPolicy {
        InvalidationPolicy::KEEP_ALL
    }

    fn export(output: &Self::Output, config: &Self::Config) -> Result<Self::Export>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_keeps_everything() {
        assert_eq!(InvalidationPolicy::default(), InvalidationPolicy::KEEP_ALL);
        assert!(InvalidationPolicy::CLEAR_COMPUTED.clear_state);
        assert!(InvalidationPolicy::CLEAR_COMPUTED.clear_output);
    }
}

use thiserror::Error;

/// Failure taxonomy shared by extraction, bootstrap and solver stages.
///
/// Library code propagates these wrapped in `anyhow::Error`; callers that need
/// to branch on the kind use `err.downcast_ref::<CalibError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibError {
    /// Missing or inconsistent input detected before any solve starts.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The solver stopped on its iteration budget or a failed linear step.
    #[error("solver did not converge after {iterations} iterations (cost {final_cost:.6e})")]
    NotConverged { iterations: usize, final_cost: f64 },
    /// A residual evaluated to NaN or infinity.
    #[error("non-finite residual in observation {observation}")]
    NonFiniteResidual { observation: usize },
    /// Bootstrap reached a fixed point with objects it could not reach.
    #[error(
        "registration graph is disconnected: objects {objects:?} in captures {captures:?} could not be initialised"
    )]
    Disconnected {
        objects: Vec<usize>,
        captures: Vec<usize>,
    },
}

impl CalibError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        CalibError::InvalidInput(msg.into())
    }
}

/// Return early with [`CalibError::InvalidInput`] unless the condition holds.
///
/// Expands to `return Err(CalibError::InvalidInput(..).into())`, so it works in
/// functions returning either `Result<_, CalibError>` or `anyhow::Result<_>`.
#[macro_export]
macro_rules! ensure_input {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::CalibError::InvalidInput(format!($($arg)+)).into());
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check_len(values: &[f64]) -> anyhow::Result<usize> {
        ensure_input!(!values.is_empty(), "need at least one value");
        Ok(values.len())
    }

    #[test]
    fn ensure_input_wraps_into_anyhow() {
        let err = check_len(&[]).unwrap_err();
        let kind = err.downcast_ref::<CalibError>().expect("calib error");
        assert!(matches!(kind, CalibError::InvalidInput(msg) if msg.contains("at least one")));
        assert_eq!(check_len(&[1.0, 2.0]).unwrap(), 2);
    }

    #[test]
    fn disconnected_message_lists_members() {
        let err = CalibError::Disconnected {
            objects: vec![3, 5],
            captures: vec![1],
        };
        let msg = err.to_string();
        assert!(msg.contains("[3, 5]"));
        assert!(msg.contains("[1]"));
    }
}

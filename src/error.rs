use thiserror::Error;

/// Failure taxonomy of the optimization core.
///
/// None of these escape the controller as a panic or an uncaught error: the
/// solver and controller convert them into [`crate::optimizer::SolveOutcome`]
/// and [`crate::domain::OptimizationRecord`] values.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum MpcError {
    /// Iteration cap reached, infeasible region, or a failed QP subproblem
    #[error("solver did not converge: {0}")]
    SolverNonConvergence(String),

    /// Zero-length horizon, zero consumption or an empty forecast
    #[error("degenerate input: {0}")]
    DegenerateInput(String),

    /// Missing or malformed oracle response
    #[error("prediction oracle unavailable: {0}")]
    OracleUnavailable(String),

    /// Consecutive solver failures reached the configured limit
    #[error("{failures} consecutive optimization failures; controller faulted")]
    RepeatedFailure { failures: u32 },

    #[error("invalid forecast: {0}")]
    InvalidForecast(String),

    /// A command asked for something outside the configured envelope
    #[error("command rejected: {0}")]
    RejectedCommand(String),
}

impl MpcError {
    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            MpcError::SolverNonConvergence(_) => "solver_non_convergence",
            MpcError::DegenerateInput(_) => "degenerate_input",
            MpcError::OracleUnavailable(_) => "oracle_unavailable",
            MpcError::RepeatedFailure { .. } => "repeated_failure",
            MpcError::InvalidForecast(_) => "invalid_forecast",
            MpcError::RejectedCommand(_) => "rejected_command",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = MpcError::SolverNonConvergence("iteration limit reached".to_string());
        assert_eq!(
            error.to_string(),
            "solver did not converge: iteration limit reached"
        );

        let error = MpcError::RepeatedFailure { failures: 3 };
        assert_eq!(
            error.to_string(),
            "3 consecutive optimization failures; controller faulted"
        );
    }

    #[test]
    fn test_kinds() {
        assert_eq!(MpcError::RepeatedFailure { failures: 1 }.kind(), "repeated_failure");
        assert_eq!(MpcError::DegenerateInput("x".into()).kind(), "degenerate_input");
        assert_eq!(MpcError::RejectedCommand("x".into()).kind(), "rejected_command");
    }
}

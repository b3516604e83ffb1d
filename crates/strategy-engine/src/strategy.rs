use training_core::{BarSeries, ParameterVector, ProgressFn, Signal, TrainError};

use crate::space::ParameterSpace;

/// A rule-based signal generator. Implementations are deterministic
/// functions of the bar series and the parameter vector; the same inputs
/// always yield the same signals.
pub trait Strategy: Send + Sync {
    /// Registry name, e.g. "LIQUIDITY_SWEEP".
    fn name(&self) -> &'static str;

    /// The parameter space the optimizer searches for this strategy.
    fn parameter_space(&self) -> ParameterSpace;

    /// Worst-case warm-up length: the series must be at least this long for
    /// any parameter vector drawn from the space.
    fn min_bars(&self) -> usize;

    /// Emit exactly one signal per input bar (`side == None` where no
    /// setup). The progress callback, when given, is invoked at most ~100
    /// times over the scan and on the final bar.
    fn generate_signals(
        &self,
        series: &BarSeries,
        params: &ParameterVector,
        progress: Option<&ProgressFn<'_>>,
    ) -> Result<Vec<Signal>, TrainError>;
}

impl std::fmt::Debug for dyn Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Fetch a required parameter or fail the trial.
pub(crate) fn require(params: &ParameterVector, name: &str) -> Result<f64, TrainError> {
    params
        .get(name)
        .copied()
        .ok_or_else(|| TrainError::TrialError(format!("missing parameter '{name}'")))
}

/// Invoke the progress callback on stride boundaries and the final bar.
pub(crate) fn report_progress(progress: Option<&ProgressFn<'_>>, i: usize, total: usize) {
    if let Some(cb) = progress {
        let stride = training_core::progress_stride(total);
        if i % stride == 0 || i + 1 == total {
            cb(i + 1, total);
        }
    }
}

use training_core::TrainError;

use crate::capitulation::CapitulationReversal;
use crate::failed_breakdown::FailedBreakdown;
use crate::liquidity_sweep::LiquiditySweep;
use crate::strategy::Strategy;

/// The closed set of dispatchable strategies. No plugin loading; adding a
/// strategy means adding a variant here and in `create_strategy`.
pub const STRATEGY_NAMES: [&str; 3] = [
    "LIQUIDITY_SWEEP",
    "CAPITULATION_REVERSAL",
    "FAILED_BREAKDOWN",
];

/// Look a strategy up by its registry name. Unknown names are rejected with
/// the full valid set so a bad submission is diagnosable from the error
/// alone.
pub fn create_strategy(name: &str) -> Result<Box<dyn Strategy>, TrainError> {
    match name {
        "LIQUIDITY_SWEEP" => Ok(Box::new(LiquiditySweep)),
        "CAPITULATION_REVERSAL" => Ok(Box::new(CapitulationReversal)),
        "FAILED_BREAKDOWN" => Ok(Box::new(FailedBreakdown)),
        other => Err(TrainError::InvalidRequest(format!(
            "unknown strategy '{other}', valid strategies: {}",
            STRATEGY_NAMES.join(", ")
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_name_resolves() {
        for name in STRATEGY_NAMES {
            let strategy = create_strategy(name).unwrap();
            assert_eq!(strategy.name(), name);
            assert!(!strategy.parameter_space().is_empty());
            assert!(strategy.min_bars() > 0);
        }
    }

    #[test]
    fn unknown_name_lists_the_valid_set() {
        let err = create_strategy("FOOBAR").unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, TrainError::InvalidRequest(_)));
        for name in STRATEGY_NAMES {
            assert!(msg.contains(name), "error should name {name}: {msg}");
        }
    }

    #[test]
    fn spaces_have_numeric_axes_for_the_surrogate() {
        for name in STRATEGY_NAMES {
            let strategy = create_strategy(name).unwrap();
            assert!(strategy.parameter_space().has_numeric_axis());
        }
    }
}

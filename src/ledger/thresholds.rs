use serde::{Deserialize, Serialize};

use super::error::LedgerError;

/// Global warning/critical percentages applied to every tracked account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    pub warning_pct: u8,
    pub critical_pct: u8,
}

impl Thresholds {
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.warning_pct == 0 || self.warning_pct > 100 {
            return Err(LedgerError::InvalidThresholds(
                "warning percentage must be between 1 and 100".into(),
            ));
        }
        if self.critical_pct == 0 || self.critical_pct > 100 {
            return Err(LedgerError::InvalidThresholds(
                "critical percentage must be between 1 and 100".into(),
            ));
        }
        if self.warning_pct > self.critical_pct {
            return Err(LedgerError::InvalidThresholds(
                "warning percentage must not exceed critical percentage".into(),
            ));
        }
        Ok(())
    }
}

/// Current one-shot notification gates for an account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Latches {
    pub warning: bool,
    pub critical: bool,
}

impl Latches {
    pub fn cleared() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Decision {
    pub percent_used: f64,
    pub fire_warning: bool,
    pub fire_critical: bool,
}

impl Decision {
    fn silent(percent_used: f64) -> Self {
        Self {
            percent_used,
            fire_warning: false,
            fire_critical: false,
        }
    }
}

/// Pure threshold decision. A non-positive limit is the untracked sentinel
/// and never evaluates. Warning and critical are independent: a single
/// increment that jumps past both thresholds fires both.
pub fn evaluate(
    usage_bytes: i64,
    limit_bytes: i64,
    thresholds: Thresholds,
    latches: Latches,
) -> Decision {
    if limit_bytes <= 0 {
        return Decision::silent(0.0);
    }

    let percent_used = (usage_bytes as f64 / limit_bytes as f64) * 100.0;

    Decision {
        percent_used,
        fire_warning: percent_used >= f64::from(thresholds.warning_pct) && !latches.warning,
        fire_critical: percent_used >= f64::from(thresholds.critical_pct) && !latches.critical,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GIB: i64 = 1024 * 1024 * 1024;

    fn default_thresholds() -> Thresholds {
        Thresholds {
            warning_pct: 80,
            critical_pct: 95,
        }
    }

    #[test]
    fn untracked_limit_never_evaluates() {
        let decision = evaluate(500, 0, default_thresholds(), Latches::cleared());
        assert!(!decision.fire_warning);
        assert!(!decision.fire_critical);
        assert_eq!(decision.percent_used, 0.0);
    }

    #[test]
    fn below_warning_stays_silent() {
        let decision = evaluate(7 * GIB, 10 * GIB, default_thresholds(), Latches::cleared());
        assert!(!decision.fire_warning);
        assert!(!decision.fire_critical);
    }

    #[test]
    fn exact_warning_boundary_fires() {
        let decision = evaluate(8 * GIB, 10 * GIB, default_thresholds(), Latches::cleared());
        assert!(decision.fire_warning);
        assert!(!decision.fire_critical);
        assert!((decision.percent_used - 80.0).abs() < 0.01);
    }

    #[test]
    fn exact_critical_boundary_fires() {
        let usage = 9 * GIB + GIB / 2;
        let decision = evaluate(usage, 10 * GIB, default_thresholds(), Latches::cleared());
        assert!(decision.fire_critical);
        assert!((decision.percent_used - 95.0).abs() < 0.01);
    }

    #[test]
    fn single_jump_fires_both() {
        let decision = evaluate(10 * GIB, 10 * GIB, default_thresholds(), Latches::cleared());
        assert!(decision.fire_warning);
        assert!(decision.fire_critical);
    }

    #[test]
    fn set_latch_blocks_refire() {
        let latches = Latches {
            warning: true,
            critical: false,
        };
        let decision = evaluate(9 * GIB, 10 * GIB, default_thresholds(), latches);
        assert!(!decision.fire_warning);
        assert!(!decision.fire_critical);
    }

    #[test]
    fn critical_independent_of_warning_latch() {
        let latches = Latches {
            warning: true,
            critical: false,
        };
        let decision = evaluate(10 * GIB, 10 * GIB, default_thresholds(), latches);
        assert!(!decision.fire_warning);
        assert!(decision.fire_critical);
    }

    #[test]
    fn threshold_validation_rejects_inverted_pair() {
        let thresholds = Thresholds {
            warning_pct: 96,
            critical_pct: 95,
        };
        assert!(thresholds.validate().is_err());
    }
}

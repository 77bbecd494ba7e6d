//! Level scoring configuration and the pure scoring function.
//!
//! The stored JSON keeps `target_rules.wrong_penalty` loosely typed (a number for
//! `mode: "number"`, a formula name for `mode: "formula"`). It is decoded once into
//! [`WrongPenaltyRule`]; anything else is rejected at load time.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreRules {
    pub correct_points: i64,
    pub wrong_penalty: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormulaKind {
    /// Penalty grows by one per wrong answer: -1, -2, -3, ..
    Arithmetic,
    /// Penalty doubles per wrong answer: -1, -2, -4, ..
    Geometric,
    /// Wipes the accumulated target back to zero.
    Reset,
}

impl FormulaKind {
    fn as_str(self) -> &'static str {
        match self {
            FormulaKind::Arithmetic => "arithmetic",
            FormulaKind::Geometric => "geometric",
            FormulaKind::Reset => "reset",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrongPenaltyRule {
    Fixed(i64),
    Formula(FormulaKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetRules {
    pub correct_bonus: i64,
    pub wrong_penalty: WrongPenaltyRule,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawScoringConfig", into = "RawScoringConfig")]
pub struct ScoringConfig {
    pub score: ScoreRules,
    pub target: TargetRules,
}

#[derive(Debug, thiserror::Error)]
pub enum ScoringConfigError {
    #[error("unknown target mode {0:?}")]
    UnknownMode(String),
    #[error("target mode \"number\" needs an integer wrong_penalty, got {0}")]
    ExpectedInteger(serde_json::Value),
    #[error("target mode \"formula\" needs a formula name, got {0}")]
    ExpectedFormulaName(serde_json::Value),
    #[error("unknown target formula {0:?}")]
    UnknownFormula(String),
}

#[derive(Serialize, Deserialize)]
struct RawScoringConfig {
    score_rules: ScoreRules,
    target_rules: RawTargetRules,
}

#[derive(Serialize, Deserialize)]
struct RawTargetRules {
    correct_bonus: i64,
    mode: String,
    wrong_penalty: serde_json::Value,
}

impl TryFrom<RawScoringConfig> for ScoringConfig {
    type Error = ScoringConfigError;

    fn try_from(raw: RawScoringConfig) -> Result<Self, Self::Error> {
        let RawTargetRules {
            correct_bonus,
            mode,
            wrong_penalty,
        } = raw.target_rules;

        let rule = match mode.as_str() {
            "number" => match wrong_penalty.as_i64().or_else(|| whole_f64(&wrong_penalty)) {
                Some(v) => WrongPenaltyRule::Fixed(v),
                None => return Err(ScoringConfigError::ExpectedInteger(wrong_penalty)),
            },
            "formula" => {
                let name = wrong_penalty
                    .as_str()
                    .ok_or_else(|| ScoringConfigError::ExpectedFormulaName(wrong_penalty.clone()))?;
                let kind = match name {
                    "arithmetic" => FormulaKind::Arithmetic,
                    "geometric" => FormulaKind::Geometric,
                    "reset" => FormulaKind::Reset,
                    other => return Err(ScoringConfigError::UnknownFormula(other.to_string())),
                };
                WrongPenaltyRule::Formula(kind)
            }
            other => return Err(ScoringConfigError::UnknownMode(other.to_string())),
        };

        Ok(Self {
            score: raw.score_rules,
            target: TargetRules {
                correct_bonus,
                wrong_penalty: rule,
            },
        })
    }
}

// JSON writers sometimes emit `-3.0`; accept whole floats only.
fn whole_f64(v: &serde_json::Value) -> Option<i64> {
    v.as_f64()
        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
        .map(|f| f as i64)
}

impl From<ScoringConfig> for RawScoringConfig {
    fn from(cfg: ScoringConfig) -> Self {
        let (mode, wrong_penalty) = match cfg.target.wrong_penalty {
            WrongPenaltyRule::Fixed(v) => ("number", serde_json::Value::from(v)),
            WrongPenaltyRule::Formula(kind) => ("formula", serde_json::Value::from(kind.as_str())),
        };
        Self {
            score_rules: cfg.score,
            target_rules: RawTargetRules {
                correct_bonus: cfg.target.correct_bonus,
                mode: mode.to_string(),
                wrong_penalty,
            },
        }
    }
}

impl ScoringConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Score and target change produced by one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreDelta {
    pub score: i64,
    pub target: i64,
}

/// Deltas for one answer given the session's wrong answers and target accumulated so far.
pub fn score(
    is_correct: bool,
    cfg: &ScoringConfig,
    wrong_count_so_far: u64,
    target_so_far: i64,
) -> ScoreDelta {
    if is_correct {
        return ScoreDelta {
            score: cfg.score.correct_points,
            target: cfg.target.correct_bonus,
        };
    }

    let target = match cfg.target.wrong_penalty {
        WrongPenaltyRule::Fixed(v) => v,
        WrongPenaltyRule::Formula(FormulaKind::Arithmetic) => {
            let n = i64::try_from(wrong_count_so_far).unwrap_or(i64::MAX);
            -n.saturating_add(1)
        }
        WrongPenaltyRule::Formula(FormulaKind::Geometric) => {
            let exp = u32::try_from(wrong_count_so_far).unwrap_or(u32::MAX);
            -2i64.saturating_pow(exp)
        }
        WrongPenaltyRule::Formula(FormulaKind::Reset) => target_so_far.saturating_neg(),
    };

    ScoreDelta {
        score: cfg.score.wrong_penalty,
        target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(rule: WrongPenaltyRule) -> ScoringConfig {
        ScoringConfig {
            score: ScoreRules {
                correct_points: 10,
                wrong_penalty: -5,
            },
            target: TargetRules {
                correct_bonus: 1,
                wrong_penalty: rule,
            },
        }
    }

    #[test]
    fn correct_ignores_history() {
        let c = cfg(WrongPenaltyRule::Formula(FormulaKind::Reset));
        let expected = ScoreDelta { score: 10, target: 1 };
        for wrong in [0, 1, 7, 100] {
            for target in [-50, 0, 3, 999] {
                assert_eq!(score(true, &c, wrong, target), expected);
            }
        }
    }

    #[test]
    fn arithmetic_penalty_grows_by_one() {
        let c = cfg(WrongPenaltyRule::Formula(FormulaKind::Arithmetic));
        let targets: Vec<i64> = (0..4).map(|w| score(false, &c, w, 0).target).collect();
        assert_eq!(targets, vec![-1, -2, -3, -4]);
    }

    #[test]
    fn geometric_penalty_doubles() {
        let c = cfg(WrongPenaltyRule::Formula(FormulaKind::Geometric));
        let targets: Vec<i64> = (0..4).map(|w| score(false, &c, w, 0).target).collect();
        assert_eq!(targets, vec![-1, -2, -4, -8]);
        assert_eq!(score(false, &c, 200, 0).target, -i64::MAX);
    }

    #[test]
    fn reset_wipes_accumulated_target() {
        let c = cfg(WrongPenaltyRule::Formula(FormulaKind::Reset));
        assert_eq!(score(false, &c, 2, 7).target, -7);
        assert_eq!(score(false, &c, 0, 0).target, 0);
    }

    #[test]
    fn fixed_penalty_and_wrong_score() {
        let c = cfg(WrongPenaltyRule::Fixed(-3));
        assert_eq!(score(false, &c, 9, 9), ScoreDelta { score: -5, target: -3 });
    }

    #[test]
    fn decodes_both_penalty_shapes() {
        let number = ScoringConfig::from_json(
            r#"{"score_rules":{"correct_points":10,"wrong_penalty":-2},
                "target_rules":{"correct_bonus":1,"mode":"number","wrong_penalty":-1}}"#,
        )
        .unwrap();
        assert_eq!(number.target.wrong_penalty, WrongPenaltyRule::Fixed(-1));
        assert_eq!(number.score.wrong_penalty, -2);

        let formula = ScoringConfig::from_json(
            r#"{"score_rules":{"correct_points":10,"wrong_penalty":0},
                "target_rules":{"correct_bonus":2,"mode":"formula","wrong_penalty":"geometric"}}"#,
        )
        .unwrap();
        assert_eq!(
            formula.target.wrong_penalty,
            WrongPenaltyRule::Formula(FormulaKind::Geometric)
        );

        let float = ScoringConfig::from_json(
            r#"{"score_rules":{"correct_points":1,"wrong_penalty":0},
                "target_rules":{"correct_bonus":1,"mode":"number","wrong_penalty":-4.0}}"#,
        )
        .unwrap();
        assert_eq!(float.target.wrong_penalty, WrongPenaltyRule::Fixed(-4));
    }

    #[test]
    fn rejects_unrecognized_shapes() {
        let bad = [
            r#"{"score_rules":{"correct_points":1,"wrong_penalty":0},
                "target_rules":{"correct_bonus":1,"mode":"number","wrong_penalty":"reset"}}"#,
            r#"{"score_rules":{"correct_points":1,"wrong_penalty":0},
                "target_rules":{"correct_bonus":1,"mode":"formula","wrong_penalty":3}}"#,
            r#"{"score_rules":{"correct_points":1,"wrong_penalty":0},
                "target_rules":{"correct_bonus":1,"mode":"formula","wrong_penalty":"cubic"}}"#,
            r#"{"score_rules":{"correct_points":1,"wrong_penalty":0},
                "target_rules":{"correct_bonus":1,"mode":"sometimes","wrong_penalty":1}}"#,
            r#"{"score_rules":{"correct_points":1,"wrong_penalty":0},
                "target_rules":{"correct_bonus":1,"mode":"number","wrong_penalty":1.5}}"#,
            r#"{"score_rules":{"correct_points":1}}"#,
        ];
        for json in bad {
            assert!(ScoringConfig::from_json(json).is_err(), "accepted {json}");
        }
    }

    #[test]
    fn serializes_back_to_stored_shape() {
        let c = cfg(WrongPenaltyRule::Formula(FormulaKind::Arithmetic));
        let json = c.to_json().unwrap();
        assert!(json.contains(r#""mode":"formula""#));
        assert!(json.contains(r#""wrong_penalty":"arithmetic""#));
        assert_eq!(ScoringConfig::from_json(&json).unwrap(), c);
    }
}

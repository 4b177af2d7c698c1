use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    Lt,
    Gte,
}

/// One row of a tolerance table: when the condition holds for the
/// availability value, the row's stress applies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToleranceStep {
    pub condition: Condition,
    pub threshold: f64,
    pub stress: f64,
}

impl ToleranceStep {
    fn matches(&self, availability: f64) -> bool {
        match self.condition {
            Condition::Lt => availability < self.threshold,
            Condition::Gte => availability >= self.threshold,
        }
    }
}

/// Step function from resource availability to induced stress. Rows are
/// tried in order and the first match wins; no match means no stress.
#[derive(Debug, Clone, Copy)]
pub struct Tolerance<'a> {
    steps: &'a [ToleranceStep],
}

impl<'a> Tolerance<'a> {
    pub fn new(steps: &'a [ToleranceStep]) -> Self {
        Self { steps }
    }

    pub fn stress(&self, availability: f64) -> f64 {
        self.steps
            .iter()
            .find(|step| step.matches(availability))
            .map(|step| step.stress)
            .unwrap_or(0.0)
    }
}

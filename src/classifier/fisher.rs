use serde::{Deserialize, Serialize};

use super::Scorer;

/// Linear discriminant: `offset + Σ cᵢ·xᵢ`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FisherDiscriminant {
    pub method: String,
    pub inputs: Vec<String>,
    #[serde(default)]
    pub offset: f64,
    pub coefficients: Vec<f64>,
}

impl FisherDiscriminant {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.inputs.is_empty() {
            return Err("model declares no inputs".into());
        }
        if self.coefficients.len() != self.inputs.len() {
            return Err(format!(
                "{} coefficients for {} inputs",
                self.coefficients.len(),
                self.inputs.len()
            ));
        }
        if !self.offset.is_finite() || self.coefficients.iter().any(|c| !c.is_finite()) {
            return Err("non-finite coefficient".into());
        }
        Ok(())
    }
}

impl Scorer for FisherDiscriminant {
    fn name(&self) -> &str {
        &self.method
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn score(&self, features: &[f64]) -> f64 {
        assert_eq!(
            features.len(),
            self.coefficients.len(),
            "{}: feature vector length",
            self.method
        );
        self.offset
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * x)
                .sum::<f64>()
    }
}

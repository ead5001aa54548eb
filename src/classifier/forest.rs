use serde::{Deserialize, Serialize};

use super::Scorer;

/// How tree responses are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boosting {
    /// Weight-normalised vote: `Σ wᵢ·leafᵢ / Σ wᵢ`.
    Adaptive,
    /// `tanh(Σ wᵢ·leafᵢ)`.
    Gradient,
}

/// Node of a decision tree stored as a flat array; children always point to
/// a later index, so traversal terminates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    /// Go left when `features[feature] < threshold`, else right (NaN goes right).
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    #[serde(default = "unit_weight")]
    pub weight: f64,
    pub nodes: Vec<Node>,
}

fn unit_weight() -> f64 {
    1.0
}

impl Tree {
    fn respond(&self, features: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if features[*feature] < *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    fn check(&self, n_inputs: usize) -> Result<(), String> {
        if self.nodes.is_empty() {
            return Err("tree has no nodes".into());
        }
        if !self.weight.is_finite() {
            return Err(format!("tree weight {} is not finite", self.weight));
        }
        for (i, node) in self.nodes.iter().enumerate() {
            match node {
                Node::Leaf { value } if !value.is_finite() => {
                    return Err(format!("node {i}: leaf value is not finite"));
                }
                Node::Leaf { .. } => {}
                Node::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_inputs {
                        return Err(format!(
                            "node {i}: feature {feature} out of range ({n_inputs} inputs)"
                        ));
                    }
                    for child in [left, right] {
                        if *child <= i || *child >= self.nodes.len() {
                            return Err(format!("node {i}: child {child} is not a later node"));
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

/// Boosted decision-tree ensemble.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostedForest {
    pub method: String,
    pub inputs: Vec<String>,
    pub boosting: Boosting,
    pub trees: Vec<Tree>,
}

impl BoostedForest {
    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.trees.is_empty() {
            return Err("ensemble has no trees".into());
        }
        if self.inputs.is_empty() {
            return Err("model declares no inputs".into());
        }
        for (t, tree) in self.trees.iter().enumerate() {
            tree.check(self.inputs.len())
                .map_err(|e| format!("tree {t}: {e}"))?;
        }
        if self.boosting == Boosting::Adaptive && self.trees.iter().map(|t| t.weight).sum::<f64>() == 0.0
        {
            return Err("adaptive ensemble has zero total weight".into());
        }
        Ok(())
    }
}

impl Scorer for BoostedForest {
    fn name(&self) -> &str {
        &self.method
    }

    fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn score(&self, features: &[f64]) -> f64 {
        assert_eq!(
            features.len(),
            self.inputs.len(),
            "{}: feature vector length",
            self.method
        );
        let weighted: f64 = self
            .trees
            .iter()
            .map(|t| t.weight * t.respond(features))
            .sum();
        match self.boosting {
            Boosting::Adaptive => weighted / self.trees.iter().map(|t| t.weight).sum::<f64>(),
            Boosting::Gradient => weighted.tanh(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stump(feature: usize, threshold: f64, weight: f64) -> Tree {
        Tree {
            weight,
            nodes: vec![
                Node::Split {
                    feature,
                    threshold,
                    left: 1,
                    right: 2,
                },
                Node::Leaf { value: -1.0 },
                Node::Leaf { value: 1.0 },
            ],
        }
    }

    fn forest(boosting: Boosting) -> BoostedForest {
        BoostedForest {
            method: "BDT".into(),
            inputs: vec!["a".into(), "b".into()],
            boosting,
            trees: vec![stump(0, 1.0, 3.0), stump(1, 0.0, 1.0)],
        }
    }

    #[test]
    fn adaptive_vote_is_normalised() {
        let f = forest(Boosting::Adaptive);
        assert!(f.validate().is_ok());
        assert_eq!(f.score(&[2.0, 1.0]), 1.0);
        assert_eq!(f.score(&[0.0, -1.0]), -1.0);
        assert_eq!(f.score(&[2.0, -1.0]), 0.5);
    }

    #[test]
    fn gradient_uses_tanh() {
        let f = forest(Boosting::Gradient);
        assert!((f.score(&[2.0, -1.0]) - 2.0f64.tanh()).abs() < 1e-12);
    }

    #[test]
    fn backward_child_is_rejected() {
        let mut f = forest(Boosting::Adaptive);
        f.trees[0].nodes[0] = Node::Split {
            feature: 0,
            threshold: 0.0,
            left: 0,
            right: 2,
        };
        assert!(f.validate().unwrap_err().contains("not a later node"));
    }

    #[test]
    fn parses_from_json() {
        let json = r#"{
            "method": "BDTG",
            "inputs": ["x"],
            "boosting": "gradient",
            "trees": [{"nodes": [
                {"feature": 0, "threshold": 0.5, "left": 1, "right": 2},
                {"value": -0.3},
                {"value": 0.4}
            ]}]
        }"#;
        let f: BoostedForest = serde_json::from_str(json).unwrap();
        assert_eq!(f.trees[0].weight, 1.0);
        assert!((f.score(&[0.9]) - 0.4f64.tanh()).abs() < 1e-12);
    }

    #[test]
    #[should_panic(expected = "feature vector length")]
    fn wrong_arity_panics() {
        forest(Boosting::Adaptive).score(&[1.0]);
    }
}

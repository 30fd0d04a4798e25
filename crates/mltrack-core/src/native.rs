//! Native model implementations behind the `sklearn` and `pytorch` flavors.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrackingError};

/// Anything that maps feature rows to one prediction per row.
pub trait Predict: Send + Sync {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>>;
}

/// Linear model as fitted by scikit-learn's linear estimators.
///
/// `coef` has one row per output. With `classes` set it classifies:
/// a single output row is a binary decision function (`> 0` selects
/// `classes[1]`), several rows are one-vs-rest scores (argmax wins).
/// Without `classes` it is a regression on the first output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coef: Vec<Vec<f64>>,
    pub intercept: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<f64>>,
}

impl LinearModel {
    pub fn regressor(coef: Vec<f64>, intercept: f64) -> Self {
        Self {
            coef: vec![coef],
            intercept: vec![intercept],
            classes: None,
        }
    }

    pub fn classifier(coef: Vec<Vec<f64>>, intercept: Vec<f64>, classes: Vec<f64>) -> Self {
        Self {
            coef,
            intercept,
            classes: Some(classes),
        }
    }

    pub fn n_features(&self) -> usize {
        self.coef.first().map_or(0, Vec::len)
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.n_features();
        if n == 0 {
            return Err(invalid("linear model has no coefficients"));
        }
        if self.coef.iter().any(|row| row.len() != n) {
            return Err(invalid("linear model coefficient rows differ in length"));
        }
        if self.intercept.len() != self.coef.len() {
            return Err(invalid("linear model needs one intercept per coefficient row"));
        }
        if let Some(classes) = &self.classes {
            let expected = if self.coef.len() == 1 { 2 } else { self.coef.len() };
            if classes.len() != expected {
                return Err(invalid(&format!(
                    "linear model expects {expected} classes, found {}",
                    classes.len()
                )));
            }
        }
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        check_width(self.n_features(), row)?;
        let scores: Vec<f64> = self
            .coef
            .iter()
            .zip(&self.intercept)
            .map(|(w, b)| dot(w, row) + b)
            .collect();
        Ok(match &self.classes {
            None => scores[0],
            Some(classes) if scores.len() == 1 => classes[usize::from(scores[0] > 0.0)],
            Some(classes) => classes[argmax(&scores)],
        })
    }
}

impl Predict for LinearModel {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Identity,
    Relu,
    Sigmoid,
    Tanh,
}

impl Activation {
    fn apply(self, x: f64) -> f64 {
        match self {
            Activation::Identity => x,
            Activation::Relu => x.max(0.0),
            Activation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            Activation::Tanh => x.tanh(),
        }
    }
}

/// Fully connected layer; `weights` is `out x in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn inputs(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| self.activation.apply(dot(w, input) + b))
            .collect()
    }
}

/// Feed-forward network of dense layers, the torch `nn.Sequential` of `nn.Linear`s.
///
/// A single output unit is returned as-is; several are reduced to the argmax index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequentialModel {
    pub layers: Vec<DenseLayer>,
}

impl SequentialModel {
    pub fn validate(&self) -> Result<()> {
        let first = self
            .layers
            .first()
            .ok_or_else(|| invalid("sequential model has no layers"))?;
        let mut width = first.inputs();
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.is_empty() || layer.inputs() != width {
                return Err(invalid(&format!("layer {i} does not accept {width} inputs")));
            }
            if layer.weights.iter().any(|row| row.len() != width) {
                return Err(invalid(&format!("layer {i} has ragged weights")));
            }
            if layer.bias.len() != layer.weights.len() {
                return Err(invalid(&format!("layer {i} needs one bias per output")));
            }
            width = layer.weights.len();
        }
        Ok(())
    }

    fn predict_row(&self, row: &[f64]) -> Result<f64> {
        let inputs = self.layers.first().map_or(0, DenseLayer::inputs);
        check_width(inputs, row)?;
        let output = self
            .layers
            .iter()
            .fold(row.to_vec(), |acc, layer| layer.forward(&acc));
        Ok(match output.len() {
            1 => output[0],
            _ => argmax(&output) as f64,
        })
    }
}

impl Predict for SequentialModel {
    fn predict(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        rows.iter().map(|row| self.predict_row(row)).collect()
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold((0, f64::NEG_INFINITY), |best, (i, &v)| if v > best.1 { (i, v) } else { best })
        .0
}

fn check_width(expected: usize, row: &[f64]) -> Result<()> {
    if row.len() != expected {
        return Err(TrackingError::ShapeMismatch {
            expected,
            actual: row.len(),
        });
    }
    Ok(())
}

fn invalid(msg: &str) -> TrackingError {
    TrackingError::InvalidParameter(msg.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_regression_and_classification() {
        let reg = LinearModel::regressor(vec![2.0, -1.0], 0.5);
        assert_eq!(reg.predict(&[vec![1.0, 1.0]]).unwrap(), vec![1.5]);

        let binary = LinearModel::classifier(vec![vec![1.0]], vec![0.0], vec![0.0, 1.0]);
        assert_eq!(binary.predict(&[vec![-3.0], vec![3.0]]).unwrap(), vec![0.0, 1.0]);

        let multi = LinearModel::classifier(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]],
            vec![0.0, 0.0, 0.0],
            vec![10.0, 20.0, 30.0],
        );
        assert_eq!(multi.predict(&[vec![0.0, 5.0]]).unwrap(), vec![20.0]);
    }

    #[test]
    fn wrong_feature_count_is_rejected() {
        let reg = LinearModel::regressor(vec![1.0, 1.0], 0.0);
        assert!(matches!(
            reg.predict(&[vec![1.0]]),
            Err(TrackingError::ShapeMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn sequential_forward_pass() {
        let model = SequentialModel {
            layers: vec![
                DenseLayer {
                    weights: vec![vec![1.0, -1.0], vec![-1.0, 1.0]],
                    bias: vec![0.0, 0.0],
                    activation: Activation::Relu,
                },
                DenseLayer {
                    weights: vec![vec![1.0, 2.0]],
                    bias: vec![0.5],
                    activation: Activation::Identity,
                },
            ],
        };
        model.validate().unwrap();
        // relu([3, -3]) = [3, 0] -> 3 + 0 + 0.5
        assert_eq!(model.predict(&[vec![3.0, 0.0]]).unwrap(), vec![3.5]);
    }

    #[test]
    fn mismatched_layers_fail_validation() {
        let model = SequentialModel {
            layers: vec![
                DenseLayer { weights: vec![vec![1.0, 1.0]], bias: vec![0.0], activation: Activation::Identity },
                DenseLayer { weights: vec![vec![1.0, 1.0]], bias: vec![0.0], activation: Activation::Identity },
            ],
        };
        assert!(model.validate().is_err());
    }
}

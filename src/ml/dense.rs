//! Dense feed-forward policy network (CPU-only).
//!
//! Serves both model shapes used by the engine:
//! - two-score predictors (sigmoid class activations)
//! - wager policies (signed tanh output, one or two units)
//!
//! Networks are read-only after construction; breeding always returns a new
//! network, so a single instance can be evaluated from many threads.

use rand::Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{DuelbetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Linear,
    Relu,
    Tanh,
    Sigmoid,
}

impl Default for Activation {
    fn default() -> Self {
        Self::Linear
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Weights shape: [out_dim][in_dim]
    pub weights: Vec<Vec<f64>>,
    /// Bias shape: [out_dim]
    pub bias: Vec<f64>,
    #[serde(default)]
    pub activation: Activation,
}

impl DenseLayer {
    fn in_dim(&self) -> usize {
        self.weights.first().map(|r| r.len()).unwrap_or(0)
    }

    fn out_dim(&self) -> usize {
        self.weights.len()
    }

    fn random<R: Rng + ?Sized>(in_dim: usize, out_dim: usize, activation: Activation, rng: &mut R) -> Self {
        let weights = (0..out_dim)
            .map(|_| (0..in_dim).map(|_| StandardNormal.sample(rng)).collect())
            .collect();
        let bias = (0..out_dim).map(|_| StandardNormal.sample(rng)).collect();
        Self {
            weights,
            bias,
            activation,
        }
    }
}

/// Shape of a freshly initialized network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkShape {
    pub input_dim: usize,
    /// Hidden layer widths followed by the output width
    pub layout: Vec<usize>,
    pub hidden_activation: Activation,
    pub output_activation: Activation,
}

impl NetworkShape {
    pub fn output_dim(&self) -> usize {
        self.layout.last().copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseNetwork {
    /// Expected input dimension.
    pub input_dim: usize,

    pub layers: Vec<DenseLayer>,

    /// Optional free-form metadata (score, generation, tier, ...).
    #[serde(default)]
    pub metadata: serde_json::Value,
}

impl DenseNetwork {
    /// Random network with N(0, 1) weights and biases
    pub fn random<R: Rng + ?Sized>(shape: &NetworkShape, rng: &mut R) -> Self {
        let mut layers = Vec::with_capacity(shape.layout.len());
        let mut in_dim = shape.input_dim;
        for (idx, &out_dim) in shape.layout.iter().enumerate() {
            let activation = if idx + 1 == shape.layout.len() {
                shape.output_activation
            } else {
                shape.hidden_activation
            };
            layers.push(DenseLayer::random(in_dim, out_dim, activation, rng));
            in_dim = out_dim;
        }
        Self {
            input_dim: shape.input_dim,
            layers,
            metadata: serde_json::Value::Null,
        }
    }

    /// Load a policy saved as JSON, rejecting malformed shapes
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let raw = std::fs::read(path.as_ref())?;
        let net: Self = serde_json::from_slice(&raw)?;
        net.validate()?;
        Ok(net)
    }

    /// Every layer must consume the previous layer's output and hold only
    /// finite parameters
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(DuelbetError::InvalidPolicy(msg));
        if self.input_dim == 0 || self.layers.is_empty() {
            return invalid(format!(
                "empty network ({} inputs, {} layers)",
                self.input_dim,
                self.layers.len()
            ));
        }

        let mut width = self.input_dim;
        for (idx, layer) in self.layers.iter().enumerate() {
            let rows_ok = layer.weights.iter().all(|row| row.len() == width);
            if layer.out_dim() == 0 || layer.bias.len() != layer.out_dim() || !rows_ok {
                return invalid(format!(
                    "layer {} is not {} -> {} with one bias per unit",
                    idx,
                    width,
                    layer.out_dim()
                ));
            }
            let finite = layer
                .weights
                .iter()
                .flatten()
                .chain(&layer.bias)
                .all(|v| v.is_finite());
            if !finite {
                return invalid(format!("layer {} has non-finite parameters", idx));
            }
            width = layer.out_dim();
        }
        Ok(())
    }

    pub fn output_dim(&self) -> usize {
        self.layers.last().map(|l| l.out_dim()).unwrap_or(0)
    }

    /// Number of trainable parameters (weights and biases)
    pub fn param_count(&self) -> usize {
        self.layers
            .iter()
            .map(|l| l.out_dim() * l.in_dim() + l.bias.len())
            .sum()
    }

    pub fn forward(&self, input: &[f64]) -> Result<Vec<f64>> {
        if input.len() != self.input_dim {
            return Err(DuelbetError::DimensionMismatch {
                layout: "input",
                vector_width: input.len(),
                policy_width: self.input_dim,
            });
        }
        Ok(self.propagate(input))
    }

    /// Hot-path evaluation.
    ///
    /// Callers check widths once up front (`FeatureLayout::check`); a mismatch
    /// here is a programming error.
    pub fn evaluate(&self, input: &[f64]) -> Vec<f64> {
        assert_eq!(
            input.len(),
            self.input_dim,
            "feature vector width does not match policy input width"
        );
        self.propagate(input)
    }

    fn propagate(&self, input: &[f64]) -> Vec<f64> {
        let mut x: Vec<f64> = input.to_vec();

        for layer in &self.layers {
            let y: Vec<f64> = layer
                .weights
                .iter()
                .zip(&layer.bias)
                .map(|(row, bias)| {
                    let sum = row.iter().zip(&x).fold(*bias, |acc, (w, v)| acc + w * v);
                    apply_activation(sum, layer.activation)
                })
                .collect();
            x = y;
        }

        x
    }

    /// Blend two parents into a new child.
    ///
    /// Every weight and bias becomes `(w1 + w2)/2 + z*sigma*(w1 - w2)/2` with
    /// `z ~ N(0, 1)`, so identical parents produce an identical child and
    /// distant parents explore more.
    pub fn crossover<R: Rng + ?Sized>(&self, other: &Self, sigma: f64, rng: &mut R) -> Result<Self> {
        if self.input_dim != other.input_dim || self.layers.len() != other.layers.len() {
            return Err(DuelbetError::InvalidPolicy(
                "crossover parents have different shapes".to_string(),
            ));
        }

        let mut blend = |w1: f64, w2: f64| -> f64 {
            let z: f64 = StandardNormal.sample(rng);
            (w1 + w2) / 2.0 + z * sigma * (w1 - w2) / 2.0
        };

        let mut layers = Vec::with_capacity(self.layers.len());
        for (idx, (l1, l2)) in self.layers.iter().zip(&other.layers).enumerate() {
            if l1.out_dim() != l2.out_dim() || l1.in_dim() != l2.in_dim() {
                return Err(DuelbetError::InvalidPolicy(format!(
                    "crossover parents differ at layer[{idx}]"
                )));
            }
            let weights = l1
                .weights
                .iter()
                .zip(&l2.weights)
                .map(|(r1, r2)| r1.iter().zip(r2).map(|(&a, &b)| blend(a, b)).collect())
                .collect();
            let bias = l1
                .bias
                .iter()
                .zip(&l2.bias)
                .map(|(&a, &b)| blend(a, b))
                .collect();
            layers.push(DenseLayer {
                weights,
                bias,
                activation: l1.activation,
            });
        }

        Ok(Self {
            input_dim: self.input_dim,
            layers,
            metadata: serde_json::Value::Null,
        })
    }

    /// Compact `+0.123 -1.020 ...` dump of every parameter for debug logs
    pub fn fmt_params(&self) -> String {
        let mut words = Vec::with_capacity(self.param_count());
        for layer in &self.layers {
            for (row, bias) in layer.weights.iter().zip(&layer.bias) {
                words.extend(row.iter().map(|w| format!("{w:+.3}")));
                words.push(format!("{bias:+.3}"));
            }
        }
        words.join(" ")
    }
}

fn apply_activation(x: f64, act: Activation) -> f64 {
    match act {
        Activation::Linear => x,
        Activation::Relu => x.max(0.0),
        Activation::Tanh => x.tanh(),
        Activation::Sigmoid => sigmoid(x),
    }
}

/// Logistic function without overflow for large |x|
fn sigmoid(x: f64) -> f64 {
    let e = (-x.abs()).exp();
    if x >= 0.0 {
        1.0 / (1.0 + e)
    } else {
        e / (1.0 + e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn shape() -> NetworkShape {
        NetworkShape {
            input_dim: 3,
            layout: vec![4, 2],
            hidden_activation: Activation::Sigmoid,
            output_activation: Activation::Tanh,
        }
    }

    /// Two-score predictor favoring whichever side has the larger first input
    fn predictor() -> DenseNetwork {
        DenseNetwork {
            input_dim: 2,
            layers: vec![DenseLayer {
                weights: vec![vec![3.0, 0.0], vec![-3.0, 0.0]],
                bias: vec![0.0, 0.0],
                activation: Activation::Sigmoid,
            }],
            metadata: serde_json::Value::Null,
        }
    }

    #[test]
    fn predictor_scores_are_complementary() {
        let net = predictor();
        net.validate().unwrap();

        let even = net.forward(&[0.0, 1.0]).unwrap();
        assert!((even[0] - 0.5).abs() < 1e-12 && (even[1] - 0.5).abs() < 1e-12);

        let ahead = net.forward(&[1.0, 0.0]).unwrap();
        assert!(ahead[0] > 0.9);
        assert!((ahead[0] + ahead[1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sigmoid_survives_extreme_inputs() {
        assert_eq!(sigmoid(-1000.0), 0.0);
        assert_eq!(sigmoid(1000.0), 1.0);
    }

    #[test]
    fn rejects_broken_shapes() {
        let mut net = predictor();
        net.layers[0].weights[1].push(1.0);
        assert!(matches!(net.validate(), Err(DuelbetError::InvalidPolicy(_))));

        let mut net = predictor();
        net.layers[0].bias[0] = f64::NAN;
        assert!(net.validate().is_err());

        let mut net = predictor();
        net.layers.clear();
        assert!(net.validate().is_err());
    }

    #[test]
    fn loads_saved_policy() {
        let net = predictor();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), serde_json::to_vec(&net).unwrap()).unwrap();
        assert_eq!(DenseNetwork::from_file(file.path()).unwrap(), net);

        std::fs::write(file.path(), b"{\"input_dim\":0,\"layers\":[]}").unwrap();
        assert!(DenseNetwork::from_file(file.path()).is_err());
    }

    #[test]
    fn random_network_matches_shape() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = DenseNetwork::random(&shape(), &mut rng);
        net.validate().unwrap();
        assert_eq!(net.output_dim(), 2);
        assert_eq!(net.param_count(), 3 * 4 + 4 + 4 * 2 + 2);
        let out = net.evaluate(&[0.1, -0.2, 0.3]);
        assert!(out.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn forward_rejects_wrong_width() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = DenseNetwork::random(&shape(), &mut rng);
        // shape() takes three inputs
        assert!(matches!(
            net.forward(&[1.0]),
            Err(DuelbetError::DimensionMismatch {
                vector_width: 1,
                policy_width: 3,
                ..
            })
        ));
    }

    #[test]
    #[should_panic(expected = "feature vector width")]
    fn evaluate_asserts_width() {
        let mut rng = StdRng::seed_from_u64(7);
        let net = DenseNetwork::random(&shape(), &mut rng);
        net.evaluate(&[1.0, 2.0]);
    }

    #[test]
    fn crossover_of_identical_parents_is_identity() {
        let mut rng = StdRng::seed_from_u64(11);
        let parent = DenseNetwork::random(&shape(), &mut rng);
        let child = parent.crossover(&parent, 5.0, &mut rng).unwrap();
        assert_eq!(child.layers, parent.layers);
    }

    #[test]
    fn crossover_without_noise_averages() {
        let mut rng = StdRng::seed_from_u64(11);
        let p1 = DenseNetwork::random(&shape(), &mut rng);
        let p2 = DenseNetwork::random(&shape(), &mut rng);
        let child = p1.crossover(&p2, 0.0, &mut rng).unwrap();
        let w = child.layers[0].weights[1][2];
        let expected = (p1.layers[0].weights[1][2] + p2.layers[0].weights[1][2]) / 2.0;
        assert!((w - expected).abs() < 1e-12);
        // parents untouched
        assert_ne!(p1.layers, child.layers);
    }

    #[test]
    fn crossover_rejects_mismatched_parents() {
        let mut rng = StdRng::seed_from_u64(3);
        let p1 = DenseNetwork::random(&shape(), &mut rng);
        let mut other = shape();
        other.layout = vec![4, 4, 2];
        let p2 = DenseNetwork::random(&other, &mut rng);
        assert!(p1.crossover(&p2, 1.0, &mut rng).is_err());
    }
}

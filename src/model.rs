use anyhow::{anyhow, Result};
use std::str::FromStr;

/// A gradient-boosted binary classifier parsed from the LightGBM text dump
/// stored alongside the training result. Scoring happens in-process; the
/// engine owns the parsed model for the duration of one run.
#[derive(Debug)]
pub struct GbdtModel {
    trees: Vec<GbdtTree>,
    feature_count: usize,
    sigmoid: f64,
}

#[derive(Debug)]
struct GbdtTree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
    shrinkage: f64,
}

impl GbdtTree {
    fn from_lines(lines: &mut std::iter::Peekable<std::str::Lines<'_>>) -> Result<Self> {
        let mut num_leaves: Option<usize> = None;
        let mut split_features = Vec::new();
        let mut thresholds = Vec::new();
        let mut left_child = Vec::new();
        let mut right_child = Vec::new();
        let mut leaf_values = Vec::new();
        let mut shrinkage = 1.0;

        while let Some(peeked) = lines.peek() {
            if peeked.starts_with("Tree=") {
                break;
            }
            let Some(line) = lines.next().map(str::trim) else {
                break;
            };

            if line.starts_with("num_leaves=") {
                num_leaves = Some(parse_value(line, "num_leaves=")?);
            } else if line.starts_with("split_feature=") {
                split_features = parse_array(line, "split_feature=")?;
            } else if line.starts_with("threshold=") {
                thresholds = parse_array(line, "threshold=")?;
            } else if line.starts_with("left_child=") {
                left_child = parse_array(line, "left_child=")?;
            } else if line.starts_with("right_child=") {
                right_child = parse_array(line, "right_child=")?;
            } else if line.starts_with("leaf_value=") {
                leaf_values = parse_array(line, "leaf_value=")?;
            } else if line.starts_with("shrinkage=") {
                shrinkage = parse_value(line, "shrinkage=")?;
            }
        }

        let internal_nodes = split_features.len();
        if thresholds.len() != internal_nodes
            || left_child.len() != internal_nodes
            || right_child.len() != internal_nodes
        {
            return Err(anyhow!(
                "GBDT tree definition invalid: split/child/threshold length mismatch"
            ));
        }

        let declared_leaves = num_leaves.unwrap_or(leaf_values.len());
        if declared_leaves != leaf_values.len() {
            return Err(anyhow!(
                "GBDT tree leaf count mismatch: expected {declared_leaves}, found {}",
                leaf_values.len()
            ));
        }

        Ok(Self {
            split_features,
            thresholds,
            left_child,
            right_child,
            leaf_values,
            shrinkage,
        })
    }

    fn predict(&self, features: &[f64]) -> f64 {
        let mut node_idx = 0usize;
        loop {
            let feature_idx = self
                .split_features
                .get(node_idx)
                .copied()
                .unwrap_or_default();
            let threshold = self.thresholds.get(node_idx).copied().unwrap_or(0.0);
            let feature_value = *features.get(feature_idx).unwrap_or(&0.0);
            let child = if feature_value <= threshold {
                self.left_child.get(node_idx).copied().unwrap_or(-1)
            } else {
                self.right_child.get(node_idx).copied().unwrap_or(-1)
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default()
                    * self.shrinkage;
            }

            node_idx = child as usize;
        }
    }
}

impl GbdtModel {
    pub fn from_model_text(text: &str) -> Result<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(anyhow!("GBDT model text was empty"));
        }

        let mut lines = trimmed.lines().peekable();
        let mut trees = Vec::new();
        let mut max_feature_idx: Option<usize> = None;
        let mut sigmoid = 1.0;

        while let Some(line) = lines.next() {
            let trimmed_line = line.trim();
            if trimmed_line.is_empty() {
                continue;
            }

            if trimmed_line.starts_with("objective=") {
                if !trimmed_line.contains("binary") {
                    return Err(anyhow!(
                        "only binary-objective GBDT models are supported (found: {})",
                        trimmed_line
                    ));
                }
                sigmoid = extract_sigmoid(trimmed_line);
            } else if trimmed_line.starts_with("max_feature_idx=") {
                max_feature_idx = Some(parse_value(trimmed_line, "max_feature_idx=")?);
            }

            if trimmed_line.starts_with("Tree=") {
                trees.push(GbdtTree::from_lines(&mut lines)?);
            }
        }

        if trees.is_empty() {
            return Err(anyhow!("GBDT model contained no trees"));
        }

        let inferred_max_feature = trees
            .iter()
            .flat_map(|tree| tree.split_features.iter())
            .copied()
            .max()
            .unwrap_or(0);
        let feature_count = max_feature_idx
            .map(|idx| idx + 1)
            .unwrap_or(inferred_max_feature + 1);

        Ok(Self {
            trees,
            feature_count,
            sigmoid,
        })
    }

    /// Probability of the positive class for one feature vector, or `None`
    /// when the vector is shorter than the model's feature space.
    pub fn predict_probability(&self, features: &[f64]) -> Option<f64> {
        if features.len() < self.feature_count || self.trees.is_empty() {
            return None;
        }

        let raw_score: f64 = self.trees.iter().map(|tree| tree.predict(features)).sum();
        let logit = raw_score * self.sigmoid;
        Some((1.0 / (1.0 + (-logit).exp())).clamp(0.0, 1.0))
    }

    pub fn num_features(&self) -> usize {
        self.feature_count
    }
}

fn parse_value<T>(line: &str, prefix: &str) -> Result<T>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.trim()
        .parse::<T>()
        .map_err(|err| anyhow!("Failed to parse value for {prefix} from \"{line}\": {err}"))
}

fn parse_array<T>(line: &str, prefix: &str) -> Result<Vec<T>>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    let raw = line
        .strip_prefix(prefix)
        .ok_or_else(|| anyhow!("Expected prefix {prefix}"))?;
    raw.split_whitespace()
        .map(|token| {
            token
                .parse::<T>()
                .map_err(|err| anyhow!("Failed to parse value {token} for {prefix}: {err}"))
        })
        .collect()
}

fn extract_sigmoid(objective_line: &str) -> f64 {
    objective_line
        .split_whitespace()
        .find_map(|token| token.strip_prefix("sigmoid:"))
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .unwrap_or(1.0)
}

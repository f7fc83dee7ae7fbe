//! Client-facing reward specification and its canonical fingerprint.

use serde::{Deserialize, Serialize};
use serde_json::Map;

use crate::error::RewardError;

/// Reduction operator applied over a vector of weighted primitive outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combinator {
    /// Sigma w_i * f_i
    Additive,
    /// Pi f_i ^ w_i
    Multiplicative,
    /// min over w_i * f_i
    Min,
    /// max over w_i * f_i
    Max,
    /// (Pi max(f_i, 1e-8) ^ w_i) ^ (1/n)
    Geometric,
}

impl Default for Combinator {
    fn default() -> Self {
        Self::Multiplicative
    }
}

impl Combinator {
    /// Folds per-primitive outputs `values` (already paired with `weights`) into a scalar.
    pub fn reduce(self, values: &[f64], weights: &[f64]) -> f64 {
        let n = values.len();
        if n == 0 {
            return 0.0;
        }
        match self {
            Self::Additive => values
                .iter()
                .zip(weights)
                .map(|(f, w)| w * f)
                .sum(),
            Self::Multiplicative => values
                .iter()
                .zip(weights)
                .map(|(f, w)| f.max(0.0).powf(*w))
                .product(),
            Self::Min => values
                .iter()
                .zip(weights)
                .map(|(f, w)| w * f)
                .fold(f64::INFINITY, f64::min),
            Self::Max => values
                .iter()
                .zip(weights)
                .map(|(f, w)| w * f)
                .fold(f64::NEG_INFINITY, f64::max),
            Self::Geometric => {
                let product: f64 = values
                    .iter()
                    .zip(weights)
                    .map(|(f, w)| f.max(1e-8).powf(*w))
                    .product();
                product.powf(1.0 / n as f64)
            }
        }
    }
}

/// One primitive entry in a reward specification, exactly as received on the wire:
/// a name plus a free-form parameter object. `id` is a client-assigned sequence id
/// used for `update_reward`'s by-index addressing; it is stripped before fingerprinting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardPrimitiveSpec {
    /// Registered primitive name.
    pub name: String,
    /// Client-assigned sequence id; not part of the cache fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Parameter name -> scalar/bool/string/vector value.
    #[serde(flatten)]
    pub params: Map<String, serde_json::Value>,
}

/// An ordered list of primitives, a parallel list of weights, and a combinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardSpec {
    /// Primitive entries, in client-supplied order.
    pub rewards: Vec<RewardPrimitiveSpec>,
    /// Weight per primitive; `weights.len() == rewards.len()`.
    pub weights: Vec<f64>,
    /// Reduction operator.
    #[serde(default, rename = "combinationType")]
    pub combinator: Combinator,
}

impl RewardSpec {
    /// The empty specification, treated by the dispatcher as an implicit
    /// `clean_rewards` (see §8 boundary behavior).
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }

    /// Validates the length invariant `len(rewards) == len(weights)`.
    pub fn validate_shape(&self) -> Result<(), RewardError> {
        if self.rewards.len() != self.weights.len() {
            return Err(RewardError::LengthMismatch {
                primitives: self.rewards.len(),
                weights: self.weights.len(),
            });
        }
        Ok(())
    }

    /// The default "idle-stand" specification computed once at cold start.
    pub fn idle_stand() -> Self {
        let mut params = Map::new();
        params.insert("move_speed".into(), serde_json::json!(0.0));
        params.insert("stand_height".into(), serde_json::json!(1.4));
        Self {
            rewards: vec![RewardPrimitiveSpec {
                name: "move-ego".into(),
                id: None,
                params,
            }],
            weights: vec![1.0],
            combinator: Combinator::Additive,
        }
    }

    /// Canonical fingerprint used as the cache key (§3, §4.2, §8).
    ///
    /// Per-primitive parameter keys are already canonically ordered because
    /// `serde_json::Map` serializes as a `BTreeMap` by default (no
    /// `preserve_order` feature enabled anywhere in this workspace); `id`
    /// fields are stripped by `CanonicalPrimitive`'s shape.
    pub fn fingerprint(&self) -> String {
        #[derive(Serialize)]
        struct CanonicalPrimitive<'a> {
            name: &'a str,
            params: &'a Map<String, serde_json::Value>,
        }
        #[derive(Serialize)]
        struct Canonical<'a> {
            rewards: Vec<CanonicalPrimitive<'a>>,
            weights: &'a [f64],
            combinator: Combinator,
        }
        let canonical = Canonical {
            rewards: self
                .rewards
                .iter()
                .map(|r| CanonicalPrimitive {
                    name: &r.name,
                    params: &r.params,
                })
                .collect(),
            weights: &self.weights,
            combinator: self.combinator,
        };
        // `to_string` on a structure whose only maps are BTreeMaps is
        // deterministic; unwrap_used is denied workspace-wide so fall back to
        // an empty-object string on the (unreachable in practice) error path.
        serde_json::to_string(&canonical).unwrap_or_default()
    }
}

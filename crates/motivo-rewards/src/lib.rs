//! Reward primitive registry (C1): a closed catalog of named parameterized
//! scalar functions over a physics snapshot, plus the reward specification
//! type and its canonical fingerprint used for context caching.

mod error;
mod registry;
mod snapshot;
mod spec;

pub use error::RewardError;
pub use registry::{
    AxisMargin, AxisTargets, Behavioral, BodyPart, BodyPartTarget, Primitive, PositionReward,
    Standard, TargetAxis,
};
pub use snapshot::PhysicsSnapshot;
pub use spec::{Combinator, RewardPrimitiveSpec, RewardSpec};

/// A compiled reward specification: resolved primitives with their weights and combinator.
#[derive(Debug, Clone)]
pub struct CompiledReward {
    /// Resolved, typed primitives in spec order.
    pub primitives: Vec<Primitive>,
    /// Weight per primitive (parallel to `primitives`).
    pub weights: Vec<f64>,
    /// Reduction operator.
    pub combinator: Combinator,
}

impl CompiledReward {
    /// Validates and compiles every primitive in `spec` against the registry.
    pub fn compile(spec: &RewardSpec) -> Result<Self, RewardError> {
        spec.validate_shape()?;
        let primitives = spec
            .rewards
            .iter()
            .map(Primitive::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            primitives,
            weights: spec.weights.clone(),
            combinator: spec.combinator,
        })
    }

    /// Evaluates every primitive against `snapshot` and folds the result via the combinator.
    pub fn evaluate(&self, snapshot: &PhysicsSnapshot) -> f64 {
        if self.primitives.is_empty() {
            return 0.0;
        }
        let values: Vec<f64> = self
            .primitives
            .iter()
            .map(|p| p.compute(snapshot))
            .collect();
        self.combinator.reduce(&values, &self.weights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn evaluate_is_always_finite(move_speed in -5.0_f64..5.0, stand_height in 0.0_f64..2.0) {
            let mut params = serde_json::Map::new();
            params.insert("move_speed".into(), serde_json::json!(move_speed));
            params.insert("stand_height".into(), serde_json::json!(stand_height));
            let spec = RewardSpec {
                rewards: vec![RewardPrimitiveSpec { name: "move-ego".into(), id: None, params }],
                weights: vec![1.0],
                combinator: Combinator::Additive,
            };
            let compiled = CompiledReward::compile(&spec).expect("move-ego is known");
            let snapshot = PhysicsSnapshot {
                qpos: vec![0.0, 0.0, 1.0],
                qvel: vec![0.0; 6],
                body_positions: Default::default(),
                pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
                ctrl: vec![],
            };
            let value = compiled.evaluate(&snapshot);
            prop_assert!(value.is_finite());
        }
    }
}

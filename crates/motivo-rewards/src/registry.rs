//! Closed catalog of reward primitives (§4.1).
//!
//! Each primitive is a tagged variant with a `compute` method over a
//! [`PhysicsSnapshot`], rather than dynamic dispatch on a class name — the
//! replacement [`Primitive::compile`] validates parameters once, up front,
//! instead of failing lazily on first evaluation.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::RewardError;
use crate::snapshot::PhysicsSnapshot;
use crate::spec::RewardPrimitiveSpec;

fn sigmoid(x: f64, margin: f64) -> f64 {
    if margin <= 0.0 {
        return if x.abs() < 1e-6 { 1.0 } else { 0.0 };
    }
    1.0 / (1.0 + (x.abs() / margin).powi(2))
}

fn target_reward(value: f64, target: f64, tolerance: f64) -> f64 {
    sigmoid(value - target, tolerance.max(1e-6))
}

fn param<T: for<'de> Deserialize<'de>>(
    params: &Map<String, Value>,
    key: &str,
    default: T,
) -> T {
    params
        .get(key)
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or(default)
}

/// A body part addressable by the body-part-target and general-position primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BodyPart {
    /// Head body.
    Head,
    /// Pelvis / root body.
    Pelvis,
    /// Left hand.
    LeftHand,
    /// Right hand.
    RightHand,
    /// Left foot.
    LeftFoot,
    /// Right foot.
    RightFoot,
}

impl BodyPart {
    fn body_name(self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Pelvis => "pelvis",
            Self::LeftHand => "left_hand",
            Self::RightHand => "right_hand",
            Self::LeftFoot => "left_foot",
            Self::RightFoot => "right_foot",
        }
    }
}

/// Which axis of a body position a target reward is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAxis {
    /// World-frame Z (height).
    Height,
    /// Lateral (X) distance from the reference body.
    Lateral,
    /// Forward (Y) distance from the reference body.
    Forward,
}

/// A single named movement/pose archetype with a small numeric parameter set.
#[derive(Debug, Clone, PartialEq)]
pub enum Standard {
    /// `move-ego`: move at a target speed while holding a stand height.
    MoveEgo { move_speed: f64, stand_height: f64 },
    /// Jump to a target apex height.
    Jump { height: f64 },
    /// Rotate about the vertical axis at a target angular velocity.
    Rotation { angular_velocity: f64 },
    /// Crawl on all fours.
    Crawl,
    /// Lie flat on the ground.
    LieDown,
    /// Sit posture.
    Sit,
    /// Side split posture.
    Split,
    /// Generic locomotion at a target speed and heading.
    Locomotion { speed: f64, direction: f64 },
    /// Raise both arms overhead.
    ArmsRaise,
    /// Inverted headstand posture.
    Headstand,
    /// Stand upright in place.
    StayUpright,
}

impl Standard {
    fn compile(name: &str, params: &Map<String, Value>) -> Option<Self> {
        Some(match name {
            "move-ego" => Self::MoveEgo {
                move_speed: param(params, "move_speed", 0.0),
                stand_height: param(params, "stand_height", 1.4),
            },
            "jump" => Self::Jump {
                height: param(params, "height", 1.0),
            },
            "rotation" => Self::Rotation {
                angular_velocity: param(params, "angular_velocity", 1.0),
            },
            "crawl" => Self::Crawl,
            "lie-down" => Self::LieDown,
            "sit" => Self::Sit,
            "split" => Self::Split,
            "locomotion" => Self::Locomotion {
                speed: param(params, "speed", 1.0),
                direction: param(params, "direction", 0.0),
            },
            "arms-raise" => Self::ArmsRaise,
            "headstand" => Self::Headstand,
            "stay-upright" => Self::StayUpright,
            _ => return None,
        })
    }

    fn compute(&self, s: &PhysicsSnapshot) -> f64 {
        match self {
            Self::MoveEgo {
                move_speed,
                stand_height,
            } => {
                let speed_term = target_reward(s.forward_speed(), *move_speed, 0.5);
                let height_term = target_reward(s.root_height(), *stand_height, 0.2);
                (speed_term * height_term).sqrt()
            }
            Self::Jump { height } => target_reward(s.root_height(), *height, 0.3),
            Self::Rotation { angular_velocity } => {
                let yaw_rate = s.qvel.get(5).copied().unwrap_or(0.0);
                target_reward(yaw_rate, *angular_velocity, 0.5)
            }
            Self::Crawl => target_reward(s.root_height(), 0.3, 0.15),
            Self::LieDown => target_reward(s.root_height(), 0.1, 0.1),
            Self::Sit => target_reward(s.root_height(), 0.5, 0.15),
            Self::Split => {
                let lf = s.body("left_foot").unwrap_or_default();
                let rf = s.body("right_foot").unwrap_or_default();
                let spread = (lf[0] - rf[0]).abs();
                target_reward(spread, 1.2, 0.3)
            }
            Self::Locomotion { speed, direction } => {
                let vx = s.qvel.first().copied().unwrap_or(0.0);
                let vy = s.qvel.get(1).copied().unwrap_or(0.0);
                let forward = vx * direction.cos() + vy * direction.sin();
                target_reward(forward, *speed, 0.5)
            }
            Self::ArmsRaise => {
                let lh = s.body("left_hand").unwrap_or_default();
                let rh = s.body("right_hand").unwrap_or_default();
                let head = s.body("head").unwrap_or_default();
                let avg_hand_z = (lh[2] + rh[2]) / 2.0;
                target_reward(avg_hand_z, head[2] + 0.1, 0.3)
            }
            Self::Headstand => {
                let head = s.body("head").unwrap_or_default();
                let pelvis = s.body("pelvis").unwrap_or_default();
                target_reward(head[2] - pelvis[2], -0.3, 0.3)
            }
            Self::StayUpright => {
                let up = s.pelvis_rotation[2][2];
                sigmoid(1.0 - up, 0.3)
            }
        }
    }
}

/// Body-part distance-to-target primitive (§4.1 "body-part targets").
#[derive(Debug, Clone, PartialEq)]
pub struct BodyPartTarget {
    part: BodyPart,
    axis: TargetAxis,
    target: f64,
    tolerance: f64,
}

impl BodyPartTarget {
    fn compile(name: &str, params: &Map<String, Value>) -> Option<Self> {
        let (part, axis) = match name {
            "head-height" => (BodyPart::Head, TargetAxis::Height),
            "pelvis-height" => (BodyPart::Pelvis, TargetAxis::Height),
            "left-hand-height" => (BodyPart::LeftHand, TargetAxis::Height),
            "right-hand-height" => (BodyPart::RightHand, TargetAxis::Height),
            "left-hand-lateral-distance" => (BodyPart::LeftHand, TargetAxis::Lateral),
            "right-hand-lateral-distance" => (BodyPart::RightHand, TargetAxis::Lateral),
            "left-hand-forward-distance" => (BodyPart::LeftHand, TargetAxis::Forward),
            "right-hand-forward-distance" => (BodyPart::RightHand, TargetAxis::Forward),
            "left-foot-height" => (BodyPart::LeftFoot, TargetAxis::Height),
            "right-foot-height" => (BodyPart::RightFoot, TargetAxis::Height),
            "left-foot-lateral-distance" => (BodyPart::LeftFoot, TargetAxis::Lateral),
            "right-foot-lateral-distance" => (BodyPart::RightFoot, TargetAxis::Lateral),
            "left-foot-forward-distance" => (BodyPart::LeftFoot, TargetAxis::Forward),
            "right-foot-forward-distance" => (BodyPart::RightFoot, TargetAxis::Forward),
            _ => return None,
        };
        Some(Self {
            part,
            axis,
            target: param(params, "target", 0.0),
            tolerance: param(params, "tolerance", 0.15),
        })
    }

    fn compute(&self, s: &PhysicsSnapshot) -> f64 {
        let pos = s.body(self.part.body_name()).unwrap_or_default();
        let pelvis = s.body("pelvis").unwrap_or_default();
        let value = match self.axis {
            TargetAxis::Height => pos[2],
            TargetAxis::Lateral => pos[0] - pelvis[0],
            TargetAxis::Forward => pos[1] - pelvis[1],
        };
        target_reward(value, self.target, self.tolerance)
    }
}

/// A behavioral composite reward (§4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavioral {
    /// Standing posture and ground contact.
    Standing,
    /// Upright torso orientation.
    Upright,
    /// Center-of-mass balance over the support polygon.
    Balance,
    /// Left/right limb symmetry.
    Symmetry,
    /// Low control effort.
    EnergyEfficiency,
    /// Small control magnitude (alias of energy efficiency with a tighter margin).
    SmallControl,
}

impl Behavioral {
    fn compile(name: &str) -> Option<Self> {
        Some(match name {
            "standing" => Self::Standing,
            "upright" => Self::Upright,
            "balance" => Self::Balance,
            "symmetry" => Self::Symmetry,
            "energy-efficiency" => Self::EnergyEfficiency,
            "small-control" => Self::SmallControl,
            _ => return None,
        })
    }

    fn compute(&self, s: &PhysicsSnapshot) -> f64 {
        match self {
            Self::Standing => target_reward(s.root_height(), 1.4, 0.25),
            Self::Upright => sigmoid(1.0 - s.pelvis_rotation[2][2], 0.25),
            Self::Balance => {
                let lf = s.body("left_foot").unwrap_or_default();
                let rf = s.body("right_foot").unwrap_or_default();
                let pelvis = s.body("pelvis").unwrap_or_default();
                let support_center = [(lf[0] + rf[0]) / 2.0, (lf[1] + rf[1]) / 2.0];
                let offset = ((pelvis[0] - support_center[0]).powi(2)
                    + (pelvis[1] - support_center[1]).powi(2))
                .sqrt();
                sigmoid(offset, 0.2)
            }
            Self::Symmetry => {
                let lh = s.body("left_hand").unwrap_or_default();
                let rh = s.body("right_hand").unwrap_or_default();
                let lf = s.body("left_foot").unwrap_or_default();
                let rf = s.body("right_foot").unwrap_or_default();
                let hand_diff = (lh[2] - rh[2]).abs();
                let foot_diff = (lf[2] - rf[2]).abs();
                sigmoid(hand_diff + foot_diff, 0.2)
            }
            Self::EnergyEfficiency | Self::SmallControl => {
                let tolerance = if matches!(self, Self::SmallControl) {
                    0.1
                } else {
                    0.3
                };
                let magnitude: f64 = s.ctrl.iter().map(|c| c * c).sum::<f64>().sqrt();
                sigmoid(magnitude, tolerance)
            }
        }
    }
}

/// Per-axis target margin for the general position reward.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct AxisMargin {
    /// Target value on this axis.
    pub target: f64,
    /// Sigmoid margin width.
    #[serde(default = "default_margin")]
    pub margin: f64,
    /// Relative weight of this axis within the body's term.
    #[serde(default = "default_weight")]
    pub weight: f64,
}

fn default_margin() -> f64 {
    0.15
}
fn default_weight() -> f64 {
    1.0
}

/// Per-body axis-wise target triple.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct AxisTargets {
    /// X-axis target.
    #[serde(default)]
    pub x: Option<AxisMargin>,
    /// Y-axis target.
    #[serde(default)]
    pub y: Option<AxisMargin>,
    /// Z-axis target.
    #[serde(default)]
    pub z: Option<AxisMargin>,
}

/// General position reward: a dictionary of body name to axis-wise targets (§4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct PositionReward {
    targets: Vec<(String, AxisTargetsStored)>,
    local_frame: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct AxisTargetsStored {
    x: Option<(f64, f64, f64)>,
    y: Option<(f64, f64, f64)>,
    z: Option<(f64, f64, f64)>,
}

impl PositionReward {
    fn compile(params: &Map<String, Value>) -> Result<Self, String> {
        let targets_value = params
            .get("targets")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let parsed: std::collections::BTreeMap<String, AxisTargets> =
            serde_json::from_value(targets_value).map_err(|e| e.to_string())?;
        let local_frame = param(params, "local_frame", false);
        let targets = parsed
            .into_iter()
            .map(|(body, axes)| {
                let to_tuple = |m: Option<AxisMargin>| m.map(|m| (m.target, m.margin, m.weight));
                (
                    body,
                    AxisTargetsStored {
                        x: to_tuple(axes.x),
                        y: to_tuple(axes.y),
                        z: to_tuple(axes.z),
                    },
                )
            })
            .collect();
        Ok(Self {
            targets,
            local_frame,
        })
    }

    fn compute(&self, s: &PhysicsSnapshot) -> f64 {
        if self.targets.is_empty() {
            return 1.0;
        }
        let mut total = 0.0;
        let mut count = 0.0;
        for (body, axes) in &self.targets {
            let world = s.body(body).unwrap_or_default();
            let point = if self.local_frame {
                s.to_local_frame(world)
            } else {
                world
            };
            for (value, axis) in [(point[0], axes.x), (point[1], axes.y), (point[2], axes.z)] {
                if let Some((target, margin, weight)) = axis {
                    total += weight * sigmoid(value - target, margin);
                    count += weight;
                }
            }
        }
        if count <= 0.0 {
            1.0
        } else {
            total / count
        }
    }
}

/// A single compiled, typed reward primitive ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// Standard movement/pose archetype.
    Standard(Standard),
    /// Body-part distance-to-target.
    BodyPart(BodyPartTarget),
    /// Behavioral composite.
    Behavioral(Behavioral),
    /// General multi-body position reward.
    Position(PositionReward),
}

impl Primitive {
    /// Resolves and validates a wire-level primitive spec against the closed catalog.
    ///
    /// Unknown names are a hard validation failure; there is no silent fallback.
    pub fn compile(spec: &RewardPrimitiveSpec) -> Result<Self, RewardError> {
        if spec.name == "position" {
            return PositionReward::compile(&spec.params)
                .map(Primitive::Position)
                .map_err(|message| RewardError::InvalidParams {
                    name: spec.name.clone(),
                    message,
                });
        }
        if let Some(standard) = Standard::compile(&spec.name, &spec.params) {
            return Ok(Primitive::Standard(standard));
        }
        if let Some(target) = BodyPartTarget::compile(&spec.name, &spec.params) {
            return Ok(Primitive::BodyPart(target));
        }
        if let Some(behavioral) = Behavioral::compile(&spec.name) {
            return Ok(Primitive::Behavioral(behavioral));
        }
        Err(RewardError::UnknownPrimitive(spec.name.clone()))
    }

    /// Evaluates this primitive against a snapshot, returning a value in `[0, 1]`.
    pub fn compute(&self, snapshot: &PhysicsSnapshot) -> f64 {
        let raw = match self {
            Self::Standard(p) => p.compute(snapshot),
            Self::BodyPart(p) => p.compute(snapshot),
            Self::Behavioral(p) => p.compute(snapshot),
            Self::Position(p) => p.compute(snapshot),
        };
        raw.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::RewardPrimitiveSpec;

    fn snapshot() -> PhysicsSnapshot {
        PhysicsSnapshot {
            qpos: vec![0.0, 0.0, 1.4],
            qvel: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            body_positions: [
                ("pelvis", [0.0, 0.0, 1.0]),
                ("head", [0.0, 0.0, 1.7]),
                ("left_hand", [0.2, 0.0, 1.2]),
                ("right_hand", [-0.2, 0.0, 1.2]),
                ("left_foot", [0.1, 0.0, 0.0]),
                ("right_foot", [-0.1, 0.0, 0.0]),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect(),
            pelvis_rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            ctrl: vec![0.0; 4],
        }
    }

    #[test]
    fn unknown_primitive_is_rejected() {
        let spec = RewardPrimitiveSpec {
            name: "does-not-exist".into(),
            id: None,
            params: Map::new(),
        };
        assert!(matches!(
            Primitive::compile(&spec),
            Err(RewardError::UnknownPrimitive(_))
        ));
    }

    #[test]
    fn stay_upright_is_high_for_vertical_pelvis() {
        let spec = RewardPrimitiveSpec {
            name: "stay-upright".into(),
            id: None,
            params: Map::new(),
        };
        let primitive = Primitive::compile(&spec).expect("known primitive");
        let value = primitive.compute(&snapshot());
        assert!(value > 0.9, "expected near 1.0, got {value}");
    }

    #[test]
    fn position_reward_empty_targets_is_neutral() {
        let spec = RewardPrimitiveSpec {
            name: "position".into(),
            id: None,
            params: Map::new(),
        };
        let primitive = Primitive::compile(&spec).expect("position compiles with no targets");
        assert_eq!(primitive.compute(&snapshot()), 1.0);
    }
}

//! 关键帧类型
//!
//! 每种关键帧实现 `Interpolate`：自身为前一帧，`next` 为后一帧，
//! 插值曲线取自后一帧。

use std::sync::Arc;

use glam::{Quat, Vec3};

use super::bezier_curve::{BezierCurve, Curve};

/// 关键帧插值
pub trait Interpolate: Clone {
    type Output: Copy;

    /// 关键帧自身的值
    fn value(&self) -> Self::Output;

    /// `t` ∈ [0, 1] 为两帧之间的归一化时间
    fn interpolate(&self, next: &Self, t: f32) -> Self::Output;

    /// 是否为静止姿态（单关键帧且为静止值时视为静态通道）
    fn is_rest(&self) -> bool {
        false
    }
}

#[inline]
fn ease(curve: &Option<Arc<BezierCurve>>, t: f32) -> f32 {
    match curve {
        Some(curve) => curve.value(t),
        None => t,
    }
}

#[inline]
fn lerp_f32(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// 逐分量线性插值
#[inline]
fn lerp_element_wise(a: Vec3, b: Vec3, t: Vec3) -> Vec3 {
    a + (b - a) * t
}

// ============================================================================
// 骨骼
// ============================================================================

/// 骨骼采样结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSample {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for BoneSample {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl BoneSample {
    #[inline]
    pub fn blend(&self, other: &Self, rate: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, rate),
            rotation: self.rotation.slerp(other.rotation, rate),
        }
    }
}

/// 骨骼关键帧的四条曲线（None 表示线性）
#[derive(Debug, Clone, Default)]
pub struct BoneCurves {
    pub x: Option<Arc<BezierCurve>>,
    pub y: Option<Arc<BezierCurve>>,
    pub z: Option<Arc<BezierCurve>>,
    pub rotation: Option<Arc<BezierCurve>>,
}

#[derive(Debug, Clone)]
pub struct BoneKeyframe {
    pub translation: Vec3,
    pub rotation: Quat,
    pub curves: BoneCurves,
}

impl BoneKeyframe {
    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            curves: BoneCurves::default(),
        }
    }
}

impl Interpolate for BoneKeyframe {
    type Output = BoneSample;

    fn value(&self) -> BoneSample {
        BoneSample {
            translation: self.translation,
            rotation: self.rotation,
        }
    }

    fn interpolate(&self, next: &Self, t: f32) -> BoneSample {
        let amounts = Vec3::new(
            ease(&next.curves.x, t),
            ease(&next.curves.y, t),
            ease(&next.curves.z, t),
        );
        BoneSample {
            translation: lerp_element_wise(self.translation, next.translation, amounts),
            rotation: self
                .rotation
                .slerp(next.rotation, ease(&next.curves.rotation, t)),
        }
    }

    fn is_rest(&self) -> bool {
        self.translation.abs_diff_eq(Vec3::ZERO, 1e-6)
            && self.rotation.abs_diff_eq(Quat::IDENTITY, 1e-6)
    }
}

// ============================================================================
// Morph
// ============================================================================

/// Morph 权重（线性插值）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphKeyframe {
    pub weight: f32,
}

impl Interpolate for MorphKeyframe {
    type Output = f32;

    fn value(&self) -> f32 {
        self.weight
    }

    fn interpolate(&self, next: &Self, t: f32) -> f32 {
        lerp_f32(self.weight, next.weight, t)
    }

    fn is_rest(&self) -> bool {
        self.weight == 0.0
    }
}

// ============================================================================
// 相机
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSample {
    /// 到注视点的距离（MMD 中为负数）
    pub distance: f32,
    /// 注视点
    pub position: Vec3,
    /// 欧拉角（弧度）
    pub angles: Vec3,
    /// 视角（度）
    pub fov: f32,
    pub perspective: bool,
}

#[derive(Debug, Clone, Default)]
pub struct CameraCurves {
    pub x: Option<Arc<BezierCurve>>,
    pub y: Option<Arc<BezierCurve>>,
    pub z: Option<Arc<BezierCurve>>,
    pub rotation: Option<Arc<BezierCurve>>,
    pub distance: Option<Arc<BezierCurve>>,
    pub fov: Option<Arc<BezierCurve>>,
}

#[derive(Debug, Clone)]
pub struct CameraKeyframe {
    pub sample: CameraSample,
    pub curves: CameraCurves,
}

impl Interpolate for CameraKeyframe {
    type Output = CameraSample;

    fn value(&self) -> CameraSample {
        self.sample
    }

    fn interpolate(&self, next: &Self, t: f32) -> CameraSample {
        let (a, b) = (&self.sample, &next.sample);
        let curves = &next.curves;
        let amounts = Vec3::new(ease(&curves.x, t), ease(&curves.y, t), ease(&curves.z, t));
        CameraSample {
            distance: lerp_f32(a.distance, b.distance, ease(&curves.distance, t)),
            position: lerp_element_wise(a.position, b.position, amounts),
            angles: a.angles.lerp(b.angles, ease(&curves.rotation, t)),
            fov: lerp_f32(a.fov, b.fov, ease(&curves.fov, t)),
            // 透视开关不插值
            perspective: a.perspective,
        }
    }
}

// ============================================================================
// 光源
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightKeyframe {
    pub color: Vec3,
    pub direction: Vec3,
}

impl Interpolate for LightKeyframe {
    type Output = LightKeyframe;

    fn value(&self) -> LightKeyframe {
        *self
    }

    fn interpolate(&self, next: &Self, t: f32) -> LightKeyframe {
        LightKeyframe {
            color: self.color.lerp(next.color, t),
            direction: self.direction.lerp(next.direction, t),
        }
    }
}

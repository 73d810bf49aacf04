//! 骨骼系统
//!
//! - BoneLink: 单个骨骼节点
//! - BoneSet: 管理骨骼层次结构和每帧变换
//! - IkSolver: IK 求解器

mod bone_link;
mod bone_set;
mod ik_solver;

pub use bone_link::{
    AppendConfig, BoneBehavior, BoneDef, BoneFlags, BoneKind, BoneLink, RenderHint,
};
pub use bone_set::{BoneSet, CENTER_BONE_NAME};
pub use ik_solver::{IkChain, IkLink, IkOutcome, IkSolver};

use glam::{Mat4, Quat, Vec3};

// ============================================================================
// 公共类型定义
// ============================================================================

/// 骨骼变换数据
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoneTransform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Default for BoneTransform {
    fn default() -> Self {
        Self {
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl BoneTransform {
    /// 转换为 4x4 矩阵
    #[inline]
    pub fn to_matrix(&self) -> Mat4 {
        Mat4::from_rotation_translation(self.rotation, self.translation)
    }

    /// 线性 / 球面插值
    #[inline]
    pub fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            translation: self.translation.lerp(other.translation, t),
            rotation: self.rotation.slerp(other.rotation, t),
        }
    }
}

// ============================================================================
// 类型别名
// ============================================================================

/// Bone 别名
pub type Bone = BoneLink;

/// BoneManager 别名
pub type BoneManager = BoneSet;

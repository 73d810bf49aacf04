//! 刚体 / 约束定义（仅数据，求解交给外部物理引擎）

use glam::Vec3;

use crate::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RigidBodyShape {
    Sphere = 0,
    Box = 1,
    Capsule = 2,
}

impl TryFrom<u8> for RigidBodyShape {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sphere),
            1 => Ok(Self::Box),
            2 => Ok(Self::Capsule),
            _ => Err(DecodeError::InvalidData(format!(
                "invalid rigid body shape {}",
                value
            ))),
        }
    }
}

/// 刚体模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsMode {
    /// 跟随骨骼（运动学）
    FollowBone = 0,
    /// 物理驱动
    Physics = 1,
    /// 物理旋转 + 骨骼位置
    PhysicsWithBone = 2,
}

impl PhysicsMode {
    /// 是否由物理驱动骨骼
    #[inline]
    pub fn is_dynamic(self) -> bool {
        self != PhysicsMode::FollowBone
    }
}

impl TryFrom<u8> for PhysicsMode {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::FollowBone),
            1 => Ok(Self::Physics),
            2 => Ok(Self::PhysicsWithBone),
            _ => Err(DecodeError::InvalidData(format!(
                "invalid rigid body mode {}",
                value
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RigidBodyDef {
    pub name: String,
    /// 所属骨骼（None 表示挂在中心骨骼上）
    pub bone_index: Option<usize>,
    pub group: u8,
    /// 不碰撞的组位掩码
    pub group_mask: u16,
    pub shape: RigidBodyShape,
    pub size: Vec3,
    /// 相对骨骼的位置
    pub position: Vec3,
    /// 欧拉角（弧度）
    pub rotation: Vec3,
    pub mass: f32,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub restitution: f32,
    pub friction: f32,
    pub mode: PhysicsMode,
}

/// 6DOF 弹簧约束
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintDef {
    pub name: String,
    pub rigid_body_a: usize,
    pub rigid_body_b: usize,
    pub position: Vec3,
    pub rotation: Vec3,
    pub position_min: Vec3,
    pub position_max: Vec3,
    pub rotation_min: Vec3,
    pub rotation_max: Vec3,
    pub position_spring: Vec3,
    pub rotation_spring: Vec3,
}

/// Z 轴翻转（左手 → 右手）
pub(crate) fn flip_position(v: Vec3) -> Vec3 {
    Vec3::new(v.x, v.y, -v.z)
}

/// 欧拉角在 Z 翻转下：绕 X / Y 的旋转反号
pub(crate) fn flip_euler(v: Vec3) -> Vec3 {
    Vec3::new(-v.x, -v.y, v.z)
}

//! 物理桥接
//!
//! 求解器本身在外部实现，这里只约定骨骼变换的交接：
//! join_world → 每帧 [step_simulation（同步运动学刚体并步进）→ read_bone_transforms] → leave_world

use glam::Mat4;

use crate::model::{ConstraintDef, RigidBodyDef};
use crate::Result;

/// 外部物理引擎接口
pub trait PhysicsBridge: Send {
    /// 创建刚体和约束，`bone_world` 为初始姿态的骨骼全局变换
    fn join_world(
        &mut self,
        bodies: &[RigidBodyDef],
        constraints: &[ConstraintDef],
        bone_world: &[Mat4],
    ) -> Result<()>;

    /// 移除本模型的所有刚体和约束
    fn leave_world(&mut self);

    /// 同步 FollowBone 刚体到 `bone_world`，然后步进 `dt` 秒
    fn step_simulation(&mut self, dt: f32, bone_world: &[Mat4]);

    /// 动态刚体驱动的骨骼全局变换（骨骼索引，变换）
    fn read_bone_transforms(&self) -> &[(usize, Mat4)];
}

//! 骨骼节点
//!
//! BoneLink 是骨骼系统的核心单元，每个 BoneLink 代表骨骼层次中的一个节点。
//! 静态数据在解码后不变，动态数据每帧由动作 / IK / 物理依次写入。

use bitflags::bitflags;
use glam::{Mat4, Quat, Vec3};

// ============================================================================
// 骨骼类型
// ============================================================================

/// PMD 骨骼类型（封闭集合，对应类型 ID 0-9）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoneKind {
    /// 旋转
    Rotate,
    /// 旋转 + 移动
    RotateMove,
    /// IK 目标（IK 链要追踪的位置）
    IkDestination,
    Unknown,
    /// 受 IK 影响
    UnderIk,
    /// 旋转影响下（复制来源骨骼旋转）
    UnderRotate,
    /// IK 末端
    IkTarget,
    /// 不显示
    NoDisplay,
    /// 扭转（旋转限制在骨骼轴上）
    Twist,
    /// 旋转联动（尾骨骼按系数跟随）
    FollowRotate,
}

/// 渲染 / 编辑提示
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderHint {
    Normal,
    Movable,
    IkHandle,
    Hidden,
}

/// 类型行为表项
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoneBehavior {
    /// 可以作为 IK 链接被 IK 旋转
    pub ik_eligible: bool,
    /// 在没有 IK / 物理干预时是否可独立编辑
    pub motion_independent_default: bool,
    pub render_hint: RenderHint,
}

impl BoneKind {
    pub fn from_id(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::Rotate,
            1 => Self::RotateMove,
            2 => Self::IkDestination,
            3 => Self::Unknown,
            4 => Self::UnderIk,
            5 => Self::UnderRotate,
            6 => Self::IkTarget,
            7 => Self::NoDisplay,
            8 => Self::Twist,
            9 => Self::FollowRotate,
            _ => return None,
        })
    }

    pub fn id(self) -> u8 {
        match self {
            Self::Rotate => 0,
            Self::RotateMove => 1,
            Self::IkDestination => 2,
            Self::Unknown => 3,
            Self::UnderIk => 4,
            Self::UnderRotate => 5,
            Self::IkTarget => 6,
            Self::NoDisplay => 7,
            Self::Twist => 8,
            Self::FollowRotate => 9,
        }
    }

    /// 类型 → 行为
    pub fn behavior(self) -> BoneBehavior {
        let (ik_eligible, motion_independent_default, render_hint) = match self {
            Self::Rotate => (true, true, RenderHint::Normal),
            Self::RotateMove => (true, true, RenderHint::Movable),
            Self::IkDestination => (false, true, RenderHint::IkHandle),
            Self::Unknown => (true, true, RenderHint::Hidden),
            Self::UnderIk => (true, false, RenderHint::Normal),
            Self::UnderRotate => (false, false, RenderHint::Hidden),
            Self::IkTarget => (false, false, RenderHint::Hidden),
            Self::NoDisplay => (true, true, RenderHint::Hidden),
            Self::Twist => (true, true, RenderHint::Normal),
            Self::FollowRotate => (true, true, RenderHint::Normal),
        };
        BoneBehavior {
            ik_eligible,
            motion_independent_default,
            render_hint,
        }
    }
}

// ============================================================================
// 骨骼标志
// ============================================================================

bitflags! {
    /// 骨骼标志位
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct BoneFlags: u32 {
        /// 可旋转
        const ROTATABLE = 1 << 0;
        /// 可移动
        const MOVABLE = 1 << 1;
        /// 是 IK 目标骨骼
        const IK = 1 << 2;
        /// 附加旋转
        const APPEND_ROTATE = 1 << 3;
        /// 固定轴（扭转骨骼）
        const FIXED_AXIS = 1 << 6;
        /// IK 启用（作为 IK 链接时设置）
        const IK_ENABLED = 1 << 9;
        /// 是某条 IK 链的链接
        const IK_LINK = 1 << 10;
        /// 由物理驱动
        const SIMULATED = 1 << 11;
        /// 无 IK / 物理干预，可直接编辑
        const MOTION_INDEPENDENT = 1 << 12;
    }
}

// ============================================================================
// 附加变换配置
// ============================================================================

/// 附加旋转配置
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AppendConfig {
    /// 来源骨骼索引
    pub source: usize,
    /// 旋转比率
    pub rate: f32,
}

/// 解码阶段的骨骼原始数据（第一阶段）
#[derive(Clone, Debug, PartialEq)]
pub struct BoneDef {
    pub name: String,
    pub english_name: Option<String>,
    pub parent: Option<usize>,
    pub tail: Option<usize>,
    pub kind: BoneKind,
    /// PMD 的 IK 字段：UnderRotate 为来源骨骼，FollowRotate 为百分比系数
    pub ik_field: u16,
    /// 头部位置（模型空间）
    pub position: Vec3,
}

impl BoneDef {
    pub fn new(name: impl Into<String>, parent: Option<usize>, position: Vec3) -> Self {
        Self {
            name: name.into(),
            english_name: None,
            parent,
            tail: None,
            kind: BoneKind::Rotate,
            ik_field: 0,
            position,
        }
    }
}

// ============================================================================
// 骨骼节点
// ============================================================================

/// 骨骼节点
///
/// - 静态数据：骨骼的固有属性（名称、父子关系、类型等）
/// - 动态数据：每帧更新的变换状态
/// - 变换计算：local_to_world = parent.local_to_world * local_to_parent
#[derive(Clone, Debug)]
pub struct BoneLink {
    // ========================================
    // 静态数据（初始化后不变）
    // ========================================
    /// 骨骼名称
    pub name: String,

    /// 英文名（可选）
    pub english_name: Option<String>,

    /// 骨骼内部索引
    pub(crate) internal_id: usize,

    /// 父骨骼索引
    pub parent_index: Option<usize>,

    /// 尾骨骼索引
    pub tail_index: Option<usize>,

    /// 骨骼类型
    pub kind: BoneKind,

    /// 骨骼标志
    pub flags: BoneFlags,

    /// 初始位置（模型空间）
    pub initial_position: Vec3,

    /// 相对于父骨骼的偏移（第二阶段计算）
    pub body_shift: Vec3,

    /// 逆绑定矩阵（用于蒙皮）
    pub inverse_init: Mat4,

    /// 附加旋转配置
    pub append_config: Option<AppendConfig>,

    /// 固定轴方向（扭转骨骼）
    pub fixed_axis: Vec3,

    // ========================================
    // 动态数据（每帧更新）
    // ========================================
    /// 动画平移
    pub animation_translate: Vec3,

    /// 动画旋转
    pub animation_rotate: Quat,

    /// IK 旋转
    pub ik_rotate: Quat,

    /// 附加旋转（计算结果）
    pub append_rotate: Quat,

    /// 本地变换矩阵
    pub local_to_parent: Mat4,

    /// 全局变换矩阵
    pub local_to_world: Mat4,

    /// 物理回写的全局变换（仅本帧有效）
    pub(crate) physics_world: Option<Mat4>,
}

impl BoneLink {
    /// 创建新骨骼
    pub fn new(name: String) -> Self {
        Self {
            name,
            english_name: None,
            internal_id: 0,
            parent_index: None,
            tail_index: None,
            kind: BoneKind::Rotate,
            flags: BoneFlags::ROTATABLE,
            initial_position: Vec3::ZERO,
            body_shift: Vec3::ZERO,
            inverse_init: Mat4::IDENTITY,
            append_config: None,
            fixed_axis: Vec3::X,
            animation_translate: Vec3::ZERO,
            animation_rotate: Quat::IDENTITY,
            ik_rotate: Quat::IDENTITY,
            append_rotate: Quat::IDENTITY,
            local_to_parent: Mat4::IDENTITY,
            local_to_world: Mat4::IDENTITY,
            physics_world: None,
        }
    }

    /// 从解码数据创建（第一阶段，不解析父链）
    pub fn from_def(def: &BoneDef, index: usize) -> Self {
        let mut flags = BoneFlags::ROTATABLE;
        match def.kind {
            BoneKind::RotateMove | BoneKind::IkDestination => flags.insert(BoneFlags::MOVABLE),
            BoneKind::Twist => flags.insert(BoneFlags::FIXED_AXIS),
            _ => {}
        }
        if def.kind == BoneKind::IkDestination {
            flags.insert(BoneFlags::IK);
        }

        let mut bone = Self::new(def.name.clone());
        bone.english_name = def.english_name.clone();
        bone.internal_id = index;
        bone.parent_index = def.parent;
        bone.tail_index = def.tail;
        bone.kind = def.kind;
        bone.flags = flags;
        bone.initial_position = def.position;
        bone.inverse_init = Mat4::from_translation(-def.position);
        bone
    }

    // ========================================
    // 访问器
    // ========================================

    /// 骨骼索引
    #[inline]
    pub fn link_id(&self) -> usize {
        self.internal_id
    }

    /// 父骨骼索引
    #[inline]
    pub fn parent_id(&self) -> Option<usize> {
        self.parent_index
    }

    /// 是否为根骨骼
    #[inline]
    pub fn is_root(&self) -> bool {
        self.parent_index.is_none()
    }

    /// 获取世界位置
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.local_to_world.col(3).truncate()
    }

    /// 获取世界旋转
    #[inline]
    pub fn rotation(&self) -> Quat {
        Quat::from_mat4(&self.local_to_world)
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 重置动画状态
    #[inline]
    pub fn reset_animation(&mut self) {
        self.animation_translate = Vec3::ZERO;
        self.animation_rotate = Quat::IDENTITY;
        self.ik_rotate = Quat::IDENTITY;
        self.append_rotate = Quat::IDENTITY;
    }

    /// 动画旋转（扭转骨骼只保留绕固定轴的分量）
    pub fn effective_animation_rotate(&self) -> Quat {
        if !self.flags.contains(BoneFlags::FIXED_AXIS) {
            return self.animation_rotate;
        }
        let q = self.animation_rotate;
        let axis = self.fixed_axis;
        let projected = axis * q.xyz().dot(axis);
        let twist = Quat::from_xyzw(projected.x, projected.y, projected.z, q.w);
        if twist.length_squared() < 1e-12 {
            Quat::IDENTITY
        } else {
            twist.normalize()
        }
    }

    /// 计算本地变换 (local_to_parent)
    ///
    /// 变换顺序：
    /// 1. 平移 = body_shift + animation_translate
    /// 2. 旋转 = ik_rotate * animation_rotate * append_rotate
    pub fn compute_local_transform(&mut self) {
        let translate = self.body_shift + self.animation_translate;

        let mut rotation = self.effective_animation_rotate();
        if self.flags.contains(BoneFlags::IK_ENABLED) {
            rotation = self.ik_rotate * rotation;
        }
        if self.flags.contains(BoneFlags::APPEND_ROTATE) {
            rotation = rotation * self.append_rotate;
        }

        self.local_to_parent = Mat4::from_rotation_translation(rotation, translate);
    }

    /// 本地旋转（IK + 动画 + 附加）
    pub fn local_rotation(&self) -> Quat {
        let mut rotation = self.effective_animation_rotate();
        if self.flags.contains(BoneFlags::IK_ENABLED) {
            rotation = self.ik_rotate * rotation;
        }
        if self.flags.contains(BoneFlags::APPEND_ROTATE) {
            rotation = rotation * self.append_rotate;
        }
        rotation
    }

    /// 获取蒙皮矩阵
    /// skinning_matrix = local_to_world * inverse_init
    #[inline]
    pub fn get_skinning_matrix(&self) -> Mat4 {
        self.local_to_world * self.inverse_init
    }

    /// 获取全局变换
    #[inline]
    pub fn global_transform(&self) -> Mat4 {
        self.local_to_world
    }

    /// 获取本地变换
    #[inline]
    pub fn local_transform(&self) -> Mat4 {
        self.local_to_parent
    }

    // ========================================
    // 标志检查方法
    // ========================================

    #[inline]
    pub fn is_movable(&self) -> bool {
        self.flags.contains(BoneFlags::MOVABLE)
    }

    #[inline]
    pub fn is_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK)
    }

    #[inline]
    pub fn is_append_rotate(&self) -> bool {
        self.flags.contains(BoneFlags::APPEND_ROTATE)
    }

    /// 本帧由物理接管
    #[inline]
    pub fn is_simulated(&self) -> bool {
        self.flags.contains(BoneFlags::SIMULATED)
    }

    #[inline]
    pub fn is_motion_independent(&self) -> bool {
        self.flags.contains(BoneFlags::MOTION_INDEPENDENT)
    }

    #[inline]
    pub fn enable_ik(&self) -> bool {
        self.flags.contains(BoneFlags::IK_ENABLED)
    }

    #[inline]
    pub fn set_enable_ik(&mut self, enabled: bool) {
        self.flags.set(BoneFlags::IK_ENABLED, enabled);
    }
}

impl Default for BoneLink {
    fn default() -> Self {
        Self::new(String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_ids_round_trip_and_reject_unknown() {
        for id in 0..10u8 {
            let kind = BoneKind::from_id(id);
            assert_eq!(kind.map(BoneKind::id), Some(id));
        }
        assert_eq!(BoneKind::from_id(10), None);
    }

    #[test]
    fn behavior_table() {
        assert!(!BoneKind::IkTarget.behavior().ik_eligible);
        assert!(!BoneKind::UnderIk.behavior().motion_independent_default);
        assert_eq!(BoneKind::NoDisplay.behavior().render_hint, RenderHint::Hidden);
        assert_eq!(
            BoneKind::IkDestination.behavior().render_hint,
            RenderHint::IkHandle
        );
    }

    #[test]
    fn local_transform_order() {
        let mut bone = BoneLink::new("腕".into());
        bone.body_shift = Vec3::new(1.0, 0.0, 0.0);
        bone.animation_translate = Vec3::new(0.0, 2.0, 0.0);
        bone.animation_rotate = Quat::from_rotation_z(0.5);
        bone.compute_local_transform();
        let (_, rotation, translation) = bone.local_to_parent.to_scale_rotation_translation();
        assert!(translation.abs_diff_eq(Vec3::new(1.0, 2.0, 0.0), 1e-6));
        assert!(rotation.abs_diff_eq(Quat::from_rotation_z(0.5), 1e-6));
    }

    #[test]
    fn twist_keeps_only_axis_component() {
        let mut bone = BoneLink::new("腕捩".into());
        bone.flags.insert(BoneFlags::FIXED_AXIS);
        bone.fixed_axis = Vec3::X;
        bone.animation_rotate = Quat::from_rotation_x(0.4) * Quat::from_rotation_y(0.3);
        let twist = bone.effective_animation_rotate();
        let (axis, angle) = twist.to_axis_angle();
        assert!(axis.abs_diff_eq(Vec3::X, 1e-4));
        assert!(angle > 0.0);
    }
}

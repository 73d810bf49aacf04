//! 骨骼集合 - 管理骨骼层次结构
//!
//! 构建分两阶段：
//! 1. 原始数据逐个转为 BoneLink（此时父链可能尚未完整）
//! 2. 全部加载后检查环、计算相对父骨骼的偏移、拓扑排序
//!
//! 每帧更新顺序：本地变换 → 全局变换（拓扑序）→ IK → 附加旋转 → 物理回写 → 最终全局变换

use glam::{Mat4, Quat, Vec3};

use super::bone_link::{AppendConfig, BoneDef, BoneFlags, BoneKind, BoneLink};
use super::ik_solver::{IkChain, IkOutcome, IkSolver};
use crate::logging::LogSink;
use crate::model::names::NameTable;
use crate::DecodeError;

/// 中心骨骼名
pub const CENTER_BONE_NAME: &str = "センター";

/// 骨骼集合
#[derive(Clone, Debug)]
pub struct BoneSet {
    bones: Vec<BoneLink>,
    names: NameTable,
    /// 子骨骼索引缓存
    children: Vec<Vec<usize>>,
    /// 父骨骼先于子骨骼的顺序
    transform_order: Vec<usize>,
    /// 需要附加旋转的骨骼（拓扑序）
    append_order: Vec<usize>,
    ik_solvers: Vec<IkSolver>,
    center_bone: Option<usize>,
}

impl BoneSet {
    /// 两阶段构建
    pub fn build(
        defs: Vec<BoneDef>,
        chains: Vec<IkChain>,
        sink: &dyn LogSink,
    ) -> Result<Self, DecodeError> {
        let count = defs.len();

        // 第一阶段：原始数据
        let mut bones: Vec<BoneLink> = defs
            .iter()
            .enumerate()
            .map(|(i, def)| BoneLink::from_def(def, i))
            .collect();

        for (i, bone) in bones.iter_mut().enumerate() {
            if let Some(parent) = bone.parent_index {
                if parent >= count || parent == i {
                    sink.warn(&format!(
                        "bone '{}' has invalid parent {}, treated as root",
                        bone.name, parent
                    ));
                    bone.parent_index = None;
                }
            }
            if matches!(bone.tail_index, Some(t) if t >= count) {
                bone.tail_index = None;
            }
        }

        // 第二阶段：环检测
        Self::reject_cycles(&bones)?;

        // 偏移依赖完整父链
        for i in 0..count {
            let parent_pos = bones[i]
                .parent_index
                .map(|p| bones[p].initial_position)
                .unwrap_or(Vec3::ZERO);
            bones[i].body_shift = bones[i].initial_position - parent_pos;
        }

        let mut children = vec![Vec::new(); count];
        for (i, bone) in bones.iter().enumerate() {
            if let Some(parent) = bone.parent_index {
                children[parent].push(i);
            }
        }

        let transform_order = Self::topological_order(&bones, &children);

        // 附加旋转与扭转轴
        for (i, def) in defs.iter().enumerate() {
            match def.kind {
                BoneKind::UnderRotate => {
                    let source = def.ik_field as usize;
                    if source < count && source != i {
                        bones[i].append_config = Some(AppendConfig { source, rate: 1.0 });
                        bones[i].flags.insert(BoneFlags::APPEND_ROTATE);
                    }
                }
                BoneKind::FollowRotate => {
                    if let Some(tail) = bones[i].tail_index {
                        if tail != i {
                            bones[tail].append_config = Some(AppendConfig {
                                source: i,
                                rate: def.ik_field as f32 * 0.01,
                            });
                            bones[tail].flags.insert(BoneFlags::APPEND_ROTATE);
                        }
                    }
                }
                BoneKind::Twist => {
                    if let Some(tail) = bones[i].tail_index {
                        let axis = bones[tail].initial_position - bones[i].initial_position;
                        if axis.length_squared() > 1e-12 {
                            bones[i].fixed_axis = axis.normalize();
                        }
                    }
                }
                _ => {}
            }
        }

        let append_order = Self::append_order(&bones, &transform_order);

        // IK 链：引用越界的链丢弃
        let mut ik_solvers = Vec::with_capacity(chains.len());
        for chain in chains {
            let in_range = chain.target_bone < count
                && chain.effector_bone < count
                && chain.links.iter().all(|l| l.bone_index < count);
            if !in_range {
                sink.warn(&format!(
                    "IK chain for bone {} references bones out of range, dropped",
                    chain.target_bone
                ));
                continue;
            }
            for link in &chain.links {
                bones[link.bone_index].flags.insert(BoneFlags::IK_LINK);
            }
            ik_solvers.push(IkSolver::new(chain));
        }

        let (names, duplicates) = NameTable::build(bones.iter().map(|b| b.name.as_str()));
        for (i, name) in duplicates {
            sink.debug(&format!("duplicate bone name '{}' at {}, keeping first", name, i));
        }

        let center_bone = names
            .get(CENTER_BONE_NAME)
            .or(if count > 0 { Some(0) } else { None });

        let mut set = Self {
            bones,
            names,
            children,
            transform_order,
            append_order,
            ik_solvers,
            center_bone,
        };
        set.compute_motion_independence();
        set.update_transforms();
        Ok(set)
    }

    /// 沿父链行走，步数超过骨骼数即为环
    fn reject_cycles(bones: &[BoneLink]) -> Result<(), DecodeError> {
        let count = bones.len();
        for start in 0..count {
            let mut current = bones[start].parent_index;
            let mut steps = 0;
            while let Some(p) = current {
                steps += 1;
                if steps > count {
                    return Err(DecodeError::CyclicBoneHierarchy { bone: start });
                }
                current = bones[p].parent_index;
            }
        }
        Ok(())
    }

    fn topological_order(bones: &[BoneLink], children: &[Vec<usize>]) -> Vec<usize> {
        let mut order = Vec::with_capacity(bones.len());
        let mut stack: Vec<usize> = (0..bones.len())
            .rev()
            .filter(|&i| bones[i].parent_index.is_none())
            .collect();
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(children[i].iter().rev().copied());
        }
        order
    }

    /// 附加骨骼排序：来源骨骼本身也是附加骨骼时先于跟随者
    ///
    /// 来源链成环时在环上截断。
    fn append_order(bones: &[BoneLink], transform_order: &[usize]) -> Vec<usize> {
        let mut order = Vec::new();
        let mut visited = vec![false; bones.len()];
        let mut chain = Vec::new();
        for &i in transform_order {
            let mut cur = i;
            while !visited[cur] {
                visited[cur] = true;
                let Some(config) = bones[cur].append_config else {
                    break;
                };
                chain.push(cur);
                cur = config.source;
            }
            order.extend(chain.drain(..).rev());
        }
        order
    }

    /// 标记由物理驱动的骨骼（动态刚体所在骨骼）
    pub fn mark_simulated(&mut self, indices: &[usize]) {
        for &i in indices {
            if let Some(bone) = self.bones.get_mut(i) {
                bone.flags.insert(BoneFlags::SIMULATED);
            }
        }
        self.compute_motion_independence();
    }

    /// 自身及所有祖先都不受 IK / 物理控制时为 true
    fn compute_motion_independence(&mut self) {
        for &i in &self.transform_order {
            let bone = &self.bones[i];
            let own = bone.kind.behavior().motion_independent_default
                && !bone.flags.intersects(BoneFlags::IK_LINK | BoneFlags::SIMULATED);
            let parent_ok = bone
                .parent_index
                .map(|p| self.bones[p].is_motion_independent())
                .unwrap_or(true);
            self.bones[i]
                .flags
                .set(BoneFlags::MOTION_INDEPENDENT, own && parent_ok);
        }
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn bone_count(&self) -> usize {
        self.bones.len()
    }

    #[inline]
    pub fn bones(&self) -> &[BoneLink] {
        &self.bones
    }

    #[inline]
    pub fn get_bone(&self, index: usize) -> Option<&BoneLink> {
        self.bones.get(index)
    }

    #[inline]
    pub fn get_bone_mut(&mut self, index: usize) -> Option<&mut BoneLink> {
        self.bones.get_mut(index)
    }

    /// 通过名称查找骨骼（重名时为第一个）
    #[inline]
    pub fn find_bone_by_name(&self, name: &str) -> Option<usize> {
        self.names.get(name)
    }

    #[inline]
    pub fn center_bone(&self) -> Option<usize> {
        self.center_bone
    }

    #[inline]
    pub fn children(&self, index: usize) -> &[usize] {
        self.children.get(index).map(Vec::as_slice).unwrap_or(&[])
    }

    #[inline]
    pub fn ik_solvers(&self) -> &[IkSolver] {
        &self.ik_solvers
    }

    /// 启用 / 禁用 IK 链（按目标骨骼）
    pub fn set_ik_enabled(&mut self, target_bone: usize, enabled: bool) -> bool {
        let mut found = false;
        for solver in &mut self.ik_solvers {
            if solver.chain.target_bone == target_bone {
                solver.enabled = enabled;
                found = true;
            }
        }
        found
    }

    // ========================================
    // 动画写入
    // ========================================

    /// 设置动画平移（物理骨骼不写入）
    pub fn set_bone_translation(&mut self, index: usize, translation: Vec3) {
        if let Some(bone) = self.bones.get_mut(index) {
            if !bone.is_simulated() {
                bone.animation_translate = translation;
            }
        }
    }

    /// 设置动画旋转（物理骨骼不写入）
    pub fn set_bone_rotation(&mut self, index: usize, rotation: Quat) {
        if let Some(bone) = self.bones.get_mut(index) {
            if !bone.is_simulated() {
                bone.animation_rotate = rotation;
            }
        }
    }

    /// 重置所有动画状态
    pub fn reset_animation(&mut self) {
        for bone in &mut self.bones {
            bone.reset_animation();
        }
    }

    /// 帧开始：清除上一帧的 IK 与物理结果
    pub fn begin_update(&mut self) {
        for bone in &mut self.bones {
            bone.ik_rotate = Quat::IDENTITY;
            bone.append_rotate = Quat::IDENTITY;
            bone.physics_world = None;
        }
    }

    // ========================================
    // 变换计算
    // ========================================

    /// 按拓扑序计算本地和全局变换
    pub fn update_transforms(&mut self) {
        for &i in &self.transform_order {
            self.bones[i].compute_local_transform();
            self.bones[i].local_to_world = self.parent_world(i) * self.bones[i].local_to_parent;
        }
    }

    #[inline]
    fn parent_world(&self, index: usize) -> Mat4 {
        self.bones[index]
            .parent_index
            .map(|p| self.bones[p].local_to_world)
            .unwrap_or(Mat4::IDENTITY)
    }

    /// 按文件顺序求解所有 IK 链
    pub fn solve_ik(&mut self, epsilon: f32) -> Vec<IkOutcome> {
        let mut outcomes = Vec::with_capacity(self.ik_solvers.len());
        for solver in &self.ik_solvers {
            outcomes.push(solver.solve(&mut self.bones, &self.children, epsilon));
        }
        outcomes
    }

    /// 附加旋转（第二遍，只处理有附加配置的骨骼）
    pub fn update_append_transforms(&mut self) {
        for idx in 0..self.append_order.len() {
            let i = self.append_order[idx];
            let Some(config) = self.bones[i].append_config else {
                continue;
            };
            // 来源的旋转包含它自己的附加旋转
            let source = self.bones[config.source].local_rotation();
            let rotation = Quat::IDENTITY.slerp(source, config.rate);
            self.bones[i].append_rotate = rotation;
            self.bones[i].compute_local_transform();
            IkSolver::update_global_transform_recursive(&mut self.bones, &self.children, i);
        }
    }

    /// 物理回写；返回被丢弃的条目数
    pub fn apply_physics_transforms(&mut self, transforms: &[(usize, Mat4)], sink: &dyn LogSink) -> usize {
        let mut dropped = 0;
        for &(index, world) in transforms {
            match self.bones.get_mut(index) {
                Some(bone) if bone.is_simulated() => bone.physics_world = Some(world),
                _ => {
                    dropped += 1;
                    sink.warn(&format!(
                        "simulation desync: transform for unknown bone {} dropped",
                        index
                    ));
                }
            }
        }
        dropped
    }

    /// 最终全局变换（自上而下）
    ///
    /// 物理骨骼的全局变换来自物理，本地变换由父骨骼反推，
    /// 保证每根骨骼都满足 world = parent_world * local。
    pub fn finalize_transforms(&mut self) {
        for idx in 0..self.transform_order.len() {
            let i = self.transform_order[idx];
            let parent_world = self.parent_world(i);
            match self.bones[i].physics_world {
                Some(world) => {
                    self.bones[i].local_to_parent = parent_world.inverse() * world;
                    self.bones[i].local_to_world = world;
                }
                None => {
                    self.bones[i].local_to_world = parent_world * self.bones[i].local_to_parent;
                }
            }
        }
    }

    /// 所有骨骼全局变换
    pub fn world_transforms(&self) -> Vec<Mat4> {
        self.bones.iter().map(|b| b.local_to_world).collect()
    }

    pub fn skinning_matrices(&self) -> Vec<Mat4> {
        let mut out = Vec::with_capacity(self.bones.len());
        self.skinning_matrices_into(&mut out);
        out
    }

    /// 写入蒙皮矩阵（复用缓冲区）
    pub fn skinning_matrices_into(&self, out: &mut Vec<Mat4>) {
        out.clear();
        out.extend(self.bones.iter().map(BoneLink::get_skinning_matrix));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{MemorySink, NullSink};
    use crate::skeleton::IkLink;

    fn chain_defs() -> Vec<BoneDef> {
        vec![
            BoneDef::new("全ての親", None, Vec3::ZERO),
            BoneDef::new("センター", Some(0), Vec3::new(0.0, 8.0, 0.0)),
            BoneDef::new("上半身", Some(1), Vec3::new(0.0, 10.0, 0.0)),
            BoneDef::new("首", Some(2), Vec3::new(0.0, 14.0, 0.0)),
        ]
    }

    fn assert_composition_law(set: &BoneSet) {
        for bone in set.bones() {
            let parent = bone
                .parent_index
                .and_then(|p| set.get_bone(p))
                .map(|p| p.local_to_world)
                .unwrap_or(Mat4::IDENTITY);
            let expected = parent * bone.local_to_parent;
            assert!(
                bone.local_to_world.abs_diff_eq(expected, 1e-4),
                "bone {} breaks world = parent * local",
                bone.name
            );
        }
    }

    #[test]
    fn offsets_are_relative_to_parent() {
        let set = BoneSet::build(chain_defs(), vec![], &NullSink).expect("skeleton");
        assert_eq!(set.get_bone(2).map(|b| b.body_shift), Some(Vec3::new(0.0, 2.0, 0.0)));
        assert_eq!(set.get_bone(3).map(|b| b.position()), Some(Vec3::new(0.0, 14.0, 0.0)));
        assert_eq!(set.center_bone(), Some(1));
    }

    #[test]
    fn parent_after_child_in_array_still_composes() {
        let defs = vec![
            BoneDef::new("child", Some(1), Vec3::new(0.0, 3.0, 0.0)),
            BoneDef::new("parent", None, Vec3::new(0.0, 1.0, 0.0)),
        ];
        let mut set = BoneSet::build(defs, vec![], &NullSink).expect("skeleton");
        set.set_bone_rotation(1, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2));
        set.update_transforms();
        let child = set.get_bone(0).map(|b| b.position()).unwrap_or(Vec3::NAN);
        assert!(child.abs_diff_eq(Vec3::new(-2.0, 1.0, 0.0), 1e-5), "{:?}", child);
        assert_composition_law(&set);
        // 名称回退：没有センター时使用第一根骨骼
        assert_eq!(set.center_bone(), Some(0));
    }

    #[test]
    fn cycles_are_rejected() {
        let defs = vec![
            BoneDef::new("a", Some(2), Vec3::ZERO),
            BoneDef::new("b", Some(0), Vec3::ZERO),
            BoneDef::new("c", Some(1), Vec3::ZERO),
        ];
        let err = BoneSet::build(defs, vec![], &NullSink).err();
        assert!(matches!(err, Some(DecodeError::CyclicBoneHierarchy { .. })));
    }

    #[test]
    fn invalid_parent_becomes_root_with_warning() {
        let sink = MemorySink::new();
        let defs = vec![BoneDef::new("a", Some(7), Vec3::ZERO)];
        let set = BoneSet::build(defs, vec![], &sink).expect("skeleton");
        assert!(set.get_bone(0).map(BoneLink::is_root).unwrap_or(false));
        assert_eq!(sink.warning_count(), 1);
    }

    #[test]
    fn under_rotate_copies_source_rotation() {
        let mut defs = chain_defs();
        let mut follower = BoneDef::new("目戻", Some(3), Vec3::new(0.0, 15.0, 0.0));
        follower.kind = BoneKind::UnderRotate;
        follower.ik_field = 2;
        defs.push(follower);

        let mut set = BoneSet::build(defs, vec![], &NullSink).expect("skeleton");
        let rotation = Quat::from_rotation_y(0.3);
        set.set_bone_rotation(2, rotation);
        set.update_transforms();
        set.update_append_transforms();
        let append = set.get_bone(4).map(|b| b.append_rotate).unwrap_or(Quat::NAN);
        assert!(append.abs_diff_eq(rotation, 1e-6));
        set.finalize_transforms();
        assert_composition_law(&set);
    }

    #[test]
    fn chained_append_inherits_source_append() {
        let mut defs = chain_defs();
        // 4 跟随 5，5 跟随上半身；数组顺序与依赖顺序相反
        let mut outer = BoneDef::new("右腕捩", Some(3), Vec3::new(1.0, 14.0, 0.0));
        outer.kind = BoneKind::UnderRotate;
        outer.ik_field = 5;
        let mut inner = BoneDef::new("右肩C", Some(3), Vec3::new(0.5, 14.0, 0.0));
        inner.kind = BoneKind::UnderRotate;
        inner.ik_field = 2;
        defs.push(outer);
        defs.push(inner);

        let mut set = BoneSet::build(defs, vec![], &NullSink).expect("skeleton");
        let body = Quat::from_rotation_y(0.3);
        let own = Quat::from_rotation_x(0.2);
        set.set_bone_rotation(2, body);
        set.set_bone_rotation(5, own);
        set.update_transforms();
        set.update_append_transforms();

        let inner_append = set.get_bone(5).map(|b| b.append_rotate).unwrap_or(Quat::NAN);
        assert!(inner_append.abs_diff_eq(body, 1e-5));
        let outer_append = set.get_bone(4).map(|b| b.append_rotate).unwrap_or(Quat::NAN);
        assert!(outer_append.abs_diff_eq(own * body, 1e-5), "{:?}", outer_append);
        set.finalize_transforms();
        assert_composition_law(&set);
    }

    #[test]
    fn follow_rotate_drives_tail_with_rate() {
        let mut defs = chain_defs();
        defs[2].kind = BoneKind::FollowRotate;
        defs[2].ik_field = 50;
        defs[2].tail = Some(3);
        let mut set = BoneSet::build(defs, vec![], &NullSink).expect("skeleton");
        set.set_bone_rotation(2, Quat::from_rotation_x(0.8));
        set.update_transforms();
        set.update_append_transforms();
        let append = set.get_bone(3).map(|b| b.append_rotate).unwrap_or(Quat::NAN);
        assert!(append.abs_diff_eq(Quat::from_rotation_x(0.4), 1e-5));
    }

    #[test]
    fn motion_independence_follows_ik_and_physics() {
        let mut defs = chain_defs();
        defs.push(BoneDef::new("左ひざ", Some(1), Vec3::new(1.0, 4.0, 0.0)));
        defs.push(BoneDef::new("左足首", Some(4), Vec3::new(1.0, 1.0, 0.0)));
        let mut goal = BoneDef::new("左足ＩＫ", Some(0), Vec3::new(1.0, 1.0, 0.0));
        goal.kind = BoneKind::IkDestination;
        defs.push(goal);
        let chain = IkChain {
            target_bone: 6,
            effector_bone: 5,
            iterations: 10,
            limit_angle: 1.0,
            links: vec![IkLink::free(4)],
        };
        let mut set = BoneSet::build(defs, vec![chain], &NullSink).expect("skeleton");
        let independent = |set: &BoneSet, i: usize| {
            set.get_bone(i).map(BoneLink::is_motion_independent).unwrap_or(false)
        };
        assert!(independent(&set, 2));
        assert!(!independent(&set, 4));
        assert!(!independent(&set, 5));
        assert!(independent(&set, 6));

        set.mark_simulated(&[2]);
        assert!(!independent(&set, 2));
        assert!(!independent(&set, 3));
    }

    #[test]
    fn physics_readback_keeps_composition_and_drops_unknown() {
        let sink = MemorySink::new();
        let mut set = BoneSet::build(chain_defs(), vec![], &NullSink).expect("skeleton");
        set.mark_simulated(&[3]);
        set.begin_update();
        set.set_bone_rotation(3, Quat::from_rotation_x(1.0));
        set.update_transforms();

        let physics = Mat4::from_rotation_translation(
            Quat::from_rotation_z(0.2),
            Vec3::new(0.5, 14.0, 0.0),
        );
        let dropped = set.apply_physics_transforms(&[(3, physics), (1, Mat4::IDENTITY), (99, Mat4::IDENTITY)], &sink);
        assert_eq!(dropped, 2);
        assert_eq!(sink.warning_count(), 2);

        set.finalize_transforms();
        // 物理骨骼不会被动作覆盖
        assert_eq!(set.get_bone(3).map(|b| b.animation_rotate), Some(Quat::IDENTITY));
        assert!(set
            .get_bone(3)
            .map(|b| b.local_to_world.abs_diff_eq(physics, 1e-5))
            .unwrap_or(false));
        assert_composition_law(&set);
    }
}

//! IK 求解器（CCD）
//!
//! - 每次迭代从靠近末端的链接向根部依次旋转
//! - 单次旋转角度受链的角度限制约束
//! - 支持单轴模式（膝盖等）
//! - 距离小于 epsilon 提前结束，否则在迭代上限处停止，保留最佳姿态

use glam::{Mat4, Quat, Vec3};

use super::bone_link::{BoneFlags, BoneLink};

// ============================================================================
// IK 配置
// ============================================================================

/// IK 链接信息
#[derive(Clone, Debug, PartialEq)]
pub struct IkLink {
    /// 链接骨骼索引
    pub bone_index: usize,
    /// 是否有角度限制
    pub has_limits: bool,
    /// 角度下限 (弧度)
    pub limit_min: Vec3,
    /// 角度上限 (弧度)
    pub limit_max: Vec3,
}

impl IkLink {
    pub fn free(bone_index: usize) -> Self {
        Self {
            bone_index,
            has_limits: false,
            limit_min: Vec3::ZERO,
            limit_max: Vec3::ZERO,
        }
    }

    /// 只能绕 X 轴旋转的链接（膝盖）
    pub fn hinge_x(bone_index: usize, min: f32, max: f32) -> Self {
        Self {
            bone_index,
            has_limits: true,
            limit_min: Vec3::new(min, 0.0, 0.0),
            limit_max: Vec3::new(max, 0.0, 0.0),
        }
    }
}

/// IK 链
#[derive(Clone, Debug, PartialEq)]
pub struct IkChain {
    /// 目标骨骼（末端要到达的位置）
    pub target_bone: usize,
    /// 末端骨骼
    pub effector_bone: usize,
    /// 迭代次数
    pub iterations: u32,
    /// 单次迭代角度限制（弧度）
    pub limit_angle: f32,
    /// IK 链接列表（靠近末端的在前）
    pub links: Vec<IkLink>,
}

/// 单条链的求解结果
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IkOutcome {
    pub iterations: u32,
    pub distance: f32,
    pub converged: bool,
    pub skipped: bool,
}

impl IkOutcome {
    fn skipped() -> Self {
        Self {
            iterations: 0,
            distance: 0.0,
            converged: false,
            skipped: true,
        }
    }
}

/// 求解轴类型
#[derive(Clone, Copy, Debug, PartialEq)]
enum SolveAxis {
    X,
    Y,
    Z,
}

// ============================================================================
// IK 求解器
// ============================================================================

/// IK 求解器
#[derive(Clone, Debug)]
pub struct IkSolver {
    pub chain: IkChain,
    /// 是否启用
    pub enabled: bool,
}

impl IkSolver {
    /// 创建新的 IK 求解器
    pub fn new(chain: IkChain) -> Self {
        Self {
            chain,
            enabled: true,
        }
    }

    /// 求解 IK
    ///
    /// 末端骨骼被物理接管时整条链跳过。
    pub fn solve(
        &self,
        bones: &mut [BoneLink],
        children_cache: &[Vec<usize>],
        epsilon: f32,
    ) -> IkOutcome {
        if !self.enabled {
            return IkOutcome::skipped();
        }

        let goal_idx = self.chain.target_bone;
        let effector_idx = self.chain.effector_bone;
        if goal_idx >= bones.len() || effector_idx >= bones.len() {
            return IkOutcome::skipped();
        }
        if bones[effector_idx].is_simulated() {
            return IkOutcome::skipped();
        }

        // 单轴模式下的累积角度
        let mut plane_angles = vec![0.0f32; self.chain.links.len()];
        let mut best_rotations = vec![Quat::IDENTITY; self.chain.links.len()];

        // 初始化 IK 链骨骼
        for link in &self.chain.links {
            if let Some(bone) = bones.get_mut(link.bone_index) {
                if bone.is_simulated() {
                    continue;
                }
                bone.ik_rotate = Quat::IDENTITY;
                bone.flags |= BoneFlags::IK_ENABLED;
                bone.compute_local_transform();
                Self::update_global_transform_recursive(bones, children_cache, link.bone_index);
            }
        }

        let mut best_distance = Self::distance(bones, goal_idx, effector_idx);
        if best_distance < epsilon {
            return IkOutcome {
                iterations: 0,
                distance: best_distance,
                converged: true,
                skipped: false,
            };
        }

        let mut iterations = 0;
        for iteration in 0..self.chain.iterations {
            iterations = iteration + 1;
            self.solve_iteration(bones, children_cache, iteration, &mut plane_angles);

            let distance = Self::distance(bones, goal_idx, effector_idx);
            if distance < best_distance {
                best_distance = distance;
                for (i, link) in self.chain.links.iter().enumerate() {
                    if let Some(bone) = bones.get(link.bone_index) {
                        best_rotations[i] = bone.ik_rotate;
                    }
                }
                if distance < epsilon {
                    break;
                }
            } else {
                // 不再改善：恢复最佳结果并退出
                self.restore(bones, children_cache, &best_rotations);
                break;
            }
        }

        IkOutcome {
            iterations,
            distance: best_distance,
            converged: best_distance < epsilon,
            skipped: false,
        }
    }

    fn restore(&self, bones: &mut [BoneLink], children_cache: &[Vec<usize>], best: &[Quat]) {
        for (i, link) in self.chain.links.iter().enumerate() {
            if link.bone_index < bones.len() && !bones[link.bone_index].is_simulated() {
                bones[link.bone_index].ik_rotate = best[i];
                bones[link.bone_index].compute_local_transform();
                Self::update_global_transform_recursive(bones, children_cache, link.bone_index);
            }
        }
    }

    #[inline]
    fn distance(bones: &[BoneLink], goal_idx: usize, effector_idx: usize) -> f32 {
        (bones[goal_idx].position() - bones[effector_idx].position()).length()
    }

    /// 单次迭代求解
    fn solve_iteration(
        &self,
        bones: &mut [BoneLink],
        children_cache: &[Vec<usize>],
        iteration: u32,
        plane_angles: &mut [f32],
    ) {
        let goal_pos = bones[self.chain.target_bone].position();
        let limit_angle = self.chain.limit_angle;

        for (chain_idx, link) in self.chain.links.iter().enumerate() {
            let link_idx = link.bone_index;
            if link_idx >= bones.len()
                || link_idx == self.chain.effector_bone
                || bones[link_idx].is_simulated()
            {
                continue;
            }

            // 检查是否使用单轴模式
            if link.has_limits {
                if let Some(axis) = Self::detect_plane_solve_axis(link) {
                    self.solve_plane(
                        bones,
                        children_cache,
                        goal_pos,
                        iteration,
                        link,
                        axis,
                        &mut plane_angles[chain_idx],
                    );
                    continue;
                }
            }

            // 通用 3 轴求解
            let effector_pos = bones[self.chain.effector_bone].position();
            let inv_link = bones[link_idx].local_to_world.inverse();

            let effector_vec = inv_link.transform_point3(effector_pos).normalize_or_zero();
            let goal_vec = inv_link.transform_point3(goal_pos).normalize_or_zero();

            if effector_vec.length_squared() < 1e-8 || goal_vec.length_squared() < 1e-8 {
                continue;
            }

            let dot = effector_vec.dot(goal_vec).clamp(-1.0, 1.0);
            let angle = dot.acos();
            if angle.to_degrees() < 1e-3 {
                continue;
            }

            let angle = angle.min(limit_angle);
            let axis = effector_vec.cross(goal_vec).normalize_or_zero();
            if axis.length_squared() < 1e-8 {
                continue;
            }

            let delta_rot = Quat::from_axis_angle(axis, angle);
            let animation = bones[link_idx].effective_animation_rotate();
            let chain_rot = bones[link_idx].ik_rotate * animation * delta_rot;

            bones[link_idx].ik_rotate = (chain_rot * animation.inverse()).normalize();
            bones[link_idx].compute_local_transform();
            Self::update_global_transform_recursive(bones, children_cache, link_idx);
        }
    }

    /// 单轴求解（膝盖等关节）
    #[allow(clippy::too_many_arguments)]
    fn solve_plane(
        &self,
        bones: &mut [BoneLink],
        children_cache: &[Vec<usize>],
        goal_pos: Vec3,
        iteration: u32,
        link: &IkLink,
        solve_axis: SolveAxis,
        plane_angle: &mut f32,
    ) {
        let (limit_min, limit_max, rotate_axis) = match solve_axis {
            SolveAxis::X => (link.limit_min.x, link.limit_max.x, Vec3::X),
            SolveAxis::Y => (link.limit_min.y, link.limit_max.y, Vec3::Y),
            SolveAxis::Z => (link.limit_min.z, link.limit_max.z, Vec3::Z),
        };
        let link_idx = link.bone_index;

        let effector_pos = bones[self.chain.effector_bone].position();
        let inv_link = bones[link_idx].local_to_world.inverse();
        let effector_vec = inv_link.transform_point3(effector_pos).normalize_or_zero();
        let goal_vec = inv_link.transform_point3(goal_pos).normalize_or_zero();

        if effector_vec.length_squared() < 1e-8 || goal_vec.length_squared() < 1e-8 {
            return;
        }

        let dot = effector_vec.dot(goal_vec).clamp(-1.0, 1.0);
        let angle = dot.acos().min(self.chain.limit_angle);

        // 测试两个方向
        let rot_pos = Quat::from_axis_angle(rotate_axis, angle);
        let rot_neg = Quat::from_axis_angle(rotate_axis, -angle);
        let dot_pos = (rot_pos * effector_vec).dot(goal_vec);
        let dot_neg = (rot_neg * effector_vec).dot(goal_vec);

        let mut new_angle = *plane_angle;
        if dot_pos > dot_neg {
            new_angle += angle;
        } else {
            new_angle -= angle;
        }

        // 第 0 次迭代：超出范围时尝试反向
        if iteration == 0 && (new_angle < limit_min || new_angle > limit_max) {
            if -new_angle > limit_min && -new_angle < limit_max {
                new_angle = -new_angle;
            } else {
                let half = (limit_min + limit_max) * 0.5;
                if (half - new_angle).abs() > (half + new_angle).abs() {
                    new_angle = -new_angle;
                }
            }
        }

        new_angle = new_angle.clamp(limit_min, limit_max);
        *plane_angle = new_angle;

        // 更新 IK 旋转
        let animation = bones[link_idx].effective_animation_rotate();
        bones[link_idx].ik_rotate = Quat::from_axis_angle(rotate_axis, new_angle) * animation.inverse();
        bones[link_idx].compute_local_transform();
        Self::update_global_transform_recursive(bones, children_cache, link_idx);
    }

    /// 检测是否应使用单轴模式
    fn detect_plane_solve_axis(link: &IkLink) -> Option<SolveAxis> {
        let active = |min: f32, max: f32| min != 0.0 || max != 0.0;
        let x = active(link.limit_min.x, link.limit_max.x);
        let y = active(link.limit_min.y, link.limit_max.y);
        let z = active(link.limit_min.z, link.limit_max.z);

        match (x, y, z) {
            (true, false, false) => Some(SolveAxis::X),
            (false, true, false) => Some(SolveAxis::Y),
            (false, false, true) => Some(SolveAxis::Z),
            _ => None,
        }
    }

    /// 递归更新全局变换
    pub(crate) fn update_global_transform_recursive(
        bones: &mut [BoneLink],
        children_cache: &[Vec<usize>],
        idx: usize,
    ) {
        if idx >= bones.len() {
            return;
        }

        let parent_global = match bones[idx].parent_index {
            Some(parent) if parent < bones.len() => bones[parent].local_to_world,
            _ => Mat4::IDENTITY,
        };
        bones[idx].local_to_world = parent_global * bones[idx].local_to_parent;

        if let Some(children) = children_cache.get(idx) {
            for &child_idx in children {
                Self::update_global_transform_recursive(bones, children_cache, child_idx);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skeleton::bone_link::BoneDef;
    use crate::skeleton::BoneSet;
    use std::f32::consts::PI;

    /// 根 → 上臂(长 1) → 前臂(长 1) → 手，外加一个独立的目标骨骼
    fn two_link_arm(goal: Vec3, iterations: u32) -> BoneSet {
        let defs = vec![
            BoneDef::new("root", None, Vec3::ZERO),
            BoneDef::new("upper", Some(0), Vec3::ZERO),
            BoneDef::new("lower", Some(1), Vec3::new(1.0, 0.0, 0.0)),
            BoneDef::new("hand", Some(2), Vec3::new(2.0, 0.0, 0.0)),
            BoneDef::new("goal", Some(0), goal),
        ];
        let chain = IkChain {
            target_bone: 4,
            effector_bone: 3,
            iterations,
            limit_angle: PI,
            links: vec![IkLink::free(2), IkLink::free(1)],
        };
        BoneSet::build(defs, vec![chain], &crate::logging::NullSink).expect("valid skeleton")
    }

    #[test]
    fn reachable_target_converges() {
        let goal = Vec3::new(1.0, 1.0, 0.0);
        let mut set = two_link_arm(goal, 40);
        set.update_transforms();
        let outcomes = set.solve_ik(1e-3);
        assert_eq!(outcomes.len(), 1);
        let outcome = outcomes[0];
        assert!(outcome.converged, "{:?}", outcome);
        assert!(outcome.iterations <= 40);
        let hand = set.get_bone(3).map(|b| b.position()).unwrap_or(Vec3::NAN);
        assert!(hand.distance(goal) < 1e-3);
    }

    #[test]
    fn unreachable_target_stops_bounded() {
        let goal = Vec3::new(10.0, 5.0, 0.0);
        let mut set = two_link_arm(goal, 15);
        set.update_transforms();
        let outcome = set.solve_ik(1e-4)[0];
        assert!(!outcome.converged);
        assert!(outcome.iterations <= 15);
        assert!(outcome.distance.is_finite());
        for i in 1..=2 {
            let q = set.get_bone(i).map(|b| b.ik_rotate).unwrap_or(Quat::NAN);
            assert!(q.is_finite());
            assert!((q.length() - 1.0).abs() < 1e-4);
        }
        // 手臂伸直指向目标方向，距离为 |goal| - 2
        let expected = goal.length() - 2.0;
        assert!((outcome.distance - expected).abs() < 0.05, "{:?}", outcome);
    }

    #[test]
    fn simulated_effector_skips_chain() {
        let mut set = two_link_arm(Vec3::new(1.0, 1.0, 0.0), 40);
        set.mark_simulated(&[3]);
        set.update_transforms();
        let outcome = set.solve_ik(1e-3)[0];
        assert!(outcome.skipped);
        let lower = set.get_bone(2).map(|b| b.ik_rotate).unwrap_or(Quat::NAN);
        assert_eq!(lower, Quat::IDENTITY);
    }

    #[test]
    fn hinge_link_respects_limits() {
        let defs = vec![
            BoneDef::new("hip", None, Vec3::new(0.0, 2.0, 0.0)),
            BoneDef::new("knee", Some(0), Vec3::new(0.0, 1.0, 0.0)),
            BoneDef::new("ankle", Some(1), Vec3::ZERO),
            BoneDef::new("goal", None, Vec3::new(0.0, 1.0, 0.8)),
        ];
        let chain = IkChain {
            target_bone: 3,
            effector_bone: 2,
            iterations: 30,
            limit_angle: 0.5,
            links: vec![IkLink::hinge_x(1, -PI, -0.002), IkLink::free(0)],
        };
        let mut set = BoneSet::build(defs, vec![chain], &crate::logging::NullSink)
            .expect("valid skeleton");
        set.update_transforms();
        set.solve_ik(1e-3);

        let knee = set.get_bone(1).map(|b| b.ik_rotate).unwrap_or(Quat::NAN);
        let (axis, angle) = knee.to_axis_angle();
        // 只绕 X 轴
        assert!(axis.y.abs() < 1e-4 && axis.z.abs() < 1e-4, "{:?}", axis);
        assert!(angle <= PI + 1e-4);
    }
}

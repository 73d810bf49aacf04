//! 模型实例
//!
//! 每帧流程：
//! 1. 动作写入骨骼 / Morph
//! 2. 本地 → 全局变换，IK，附加旋转
//! 3. 物理步进并回写物理骨骼
//! 4. 自上而下的最终全局变换
//! 5. Morph 顶点与矩阵写入 `PoseBuffer`

use std::sync::Arc;

use glam::{Mat4, Vec3};

use super::PoseBuffer;
use crate::animation::{Motion, MotionEvent, MotionEventListener, MotionManager, MotionOptions, PlayerHandle};
use crate::config::EngineConfig;
use crate::logging::LogSink;
use crate::model::ModelData;
use crate::morph::MorphManager;
use crate::physics::PhysicsBridge;
use crate::skeleton::{BoneSet, IkOutcome};
use crate::{ReferenceError, Result};

pub struct ModelInstance {
    name: String,
    data: ModelData,
    rest_positions: Vec<Vec3>,
    motions: MotionManager,
    physics: Option<Box<dyn PhysicsBridge>>,
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
    /// 模型根偏移（REPOSITION 动作累积）
    root_offset: Vec3,
    pose: PoseBuffer,
    ik_outcomes: Vec<IkOutcome>,
}

impl std::fmt::Debug for ModelInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelInstance")
            .field("name", &self.name)
            .field("bones", &self.data.skeleton.bone_count())
            .field("morphs", &self.data.morphs.morph_count())
            .field("motions", &self.motions.len())
            .field("physics", &self.physics.is_some())
            .field("root_offset", &self.root_offset)
            .finish()
    }
}

impl ModelInstance {
    pub fn new(name: impl Into<String>, mut data: ModelData, config: &EngineConfig, sink: Arc<dyn LogSink>) -> Self {
        data.morphs.set_weight_epsilon(config.morph_weight_epsilon);
        let rest_positions = data.rest_positions();
        let mut instance = Self {
            name: name.into(),
            data,
            rest_positions,
            motions: MotionManager::new(config),
            physics: None,
            config: config.clone(),
            sink,
            root_offset: Vec3::ZERO,
            pose: PoseBuffer::default(),
            ik_outcomes: Vec::new(),
        };
        instance.publish_pose();
        instance
    }

    /// 加入物理世界（使用当前姿态作为初始变换）
    pub fn attach_physics(&mut self, mut bridge: Box<dyn PhysicsBridge>) -> Result<()> {
        let world = self.data.skeleton.world_transforms();
        bridge.join_world(&self.data.rigid_bodies, &self.data.constraints, &world)?;
        if let Some(mut old) = self.physics.replace(bridge) {
            old.leave_world();
        }
        self.sink.debug(&format!(
            "model '{}' joined physics world with {} rigid bodies",
            self.name,
            self.data.rigid_bodies.len()
        ));
        Ok(())
    }

    /// 离开物理世界并删除所有动作（卸载前调用）
    pub fn detach(&mut self) -> Vec<MotionEvent> {
        if let Some(mut bridge) = self.physics.take() {
            bridge.leave_world();
        }
        self.motions.clear();
        self.motions.drain_events()
    }

    // ========================================
    // 访问器
    // ========================================

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn model(&self) -> &ModelData {
        &self.data
    }

    #[inline]
    pub fn skeleton(&self) -> &BoneSet {
        &self.data.skeleton
    }

    #[inline]
    pub fn morphs(&self) -> &MorphManager {
        &self.data.morphs
    }

    #[inline]
    pub fn motions(&self) -> &MotionManager {
        &self.motions
    }

    #[inline]
    pub fn root_offset(&self) -> Vec3 {
        self.root_offset
    }

    pub fn set_root_offset(&mut self, offset: Vec3) {
        self.root_offset = offset;
    }

    #[inline]
    pub fn pose(&self) -> &PoseBuffer {
        &self.pose
    }

    /// 上一帧各 IK 链的求解结果
    #[inline]
    pub fn ik_outcomes(&self) -> &[IkOutcome] {
        &self.ik_outcomes
    }

    /// 按名称查找骨骼
    pub fn find_bone(&self, name: &str) -> Result<usize> {
        self.data.skeleton.find_bone_by_name(name).ok_or_else(|| {
            self.sink.warn(&format!("bone '{}' not found in '{}'", name, self.name));
            ReferenceError::BoneNotFound(name.to_string()).into()
        })
    }

    /// 按目标骨骼名启用 / 禁用 IK
    pub fn set_ik_enabled(&mut self, bone_name: &str, enabled: bool) -> Result<()> {
        let index = self.find_bone(bone_name)?;
        if !self.data.skeleton.set_ik_enabled(index, enabled) {
            self.sink.warn(&format!("bone '{}' has no IK chain", bone_name));
            return Err(ReferenceError::BoneNotFound(bone_name.to_string()).into());
        }
        Ok(())
    }

    // ========================================
    // 动作
    // ========================================

    pub fn add_motion(&mut self, alias: &str, motion: Arc<Motion>, options: MotionOptions) -> Result<PlayerHandle> {
        Ok(self.motions.add_motion(
            alias,
            motion,
            options,
            &self.data.skeleton,
            &self.data.morphs,
            self.sink.as_ref(),
        )?)
    }

    pub fn change_motion(&mut self, alias: &str, motion: Arc<Motion>) -> Result<()> {
        Ok(self.motions.change_motion(
            alias,
            motion,
            &self.data.skeleton,
            &self.data.morphs,
            self.sink.as_ref(),
        )?)
    }

    pub fn delete_motion(&mut self, alias: &str) -> Result<()> {
        Ok(self.motions.delete_motion(alias, self.sink.as_ref())?)
    }

    pub fn set_motion_priority(&mut self, alias: &str, priority: i32) -> Result<()> {
        Ok(self.motions.set_priority(alias, priority, self.sink.as_ref())?)
    }

    pub fn set_motion_speed(&mut self, alias: &str, speed: f32) -> Result<()> {
        Ok(self.motions.set_speed(alias, speed, self.sink.as_ref())?)
    }

    pub fn drain_events(&mut self) -> Vec<MotionEvent> {
        self.motions.drain_events()
    }

    pub fn dispatch_events(&mut self, listener: &mut dyn MotionEventListener) {
        self.motions.dispatch_events(listener);
    }

    // ========================================
    // 每帧更新
    // ========================================

    /// 前进 `delta_frames` 帧并计算新姿态
    pub fn update(&mut self, delta_frames: f32) -> &PoseBuffer {
        let sink = self.sink.clone();
        let skeleton = &mut self.data.skeleton;
        let morphs = &mut self.data.morphs;

        skeleton.begin_update();
        skeleton.reset_animation();
        morphs.reset_all_weights();

        // 1. 动作
        let report = self.motions.update(delta_frames, skeleton, morphs, sink.as_ref());
        self.root_offset += report.reposition;

        // 2. 变换与 IK
        skeleton.update_transforms();
        self.ik_outcomes = skeleton.solve_ik(self.config.ik_epsilon);
        skeleton.update_append_transforms();

        // 3. 物理
        if let Some(bridge) = self.physics.as_mut() {
            let dt = self
                .config
                .frames_to_seconds(delta_frames)
                .min(self.config.physics_max_step);
            let world = skeleton.world_transforms();
            bridge.step_simulation(dt, &world);
            skeleton.apply_physics_transforms(bridge.read_bone_transforms(), sink.as_ref());
        }

        // 4. 最终变换
        skeleton.finalize_transforms();

        self.publish_pose();
        &self.pose
    }

    fn publish_pose(&mut self) {
        let skeleton = &self.data.skeleton;
        self.pose.world_transforms.clear();
        self.pose
            .world_transforms
            .extend(skeleton.bones().iter().map(|b| b.local_to_world));
        skeleton.skinning_matrices_into(&mut self.pose.skinning_matrices);
        self.data
            .morphs
            .apply_morphs(&self.rest_positions, &mut self.pose.morphed_positions);
        self.pose.root = Mat4::from_translation(self.root_offset);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::animation::{BoneKeyframe, MorphKeyframe, PlayerFlags};
    use crate::logging::{MemorySink, NullSink};
    use crate::test_support::{sample_model, RecordingPhysics};
    use crate::MmdError;
    use glam::Quat;

    fn instance() -> ModelInstance {
        ModelInstance::new("sample", sample_model(), &EngineConfig::default(), Arc::new(NullSink))
    }

    fn assert_composition_law(instance: &ModelInstance) {
        let bones = instance.skeleton().bones();
        for bone in bones {
            let parent = bone
                .parent_index
                .map(|p| bones[p].local_to_world)
                .unwrap_or(Mat4::IDENTITY);
            assert!(
                bone.local_to_world.abs_diff_eq(parent * bone.local_to_parent, 1e-4),
                "bone {} breaks world = parent * local",
                bone.name
            );
        }
    }

    fn walk_motion() -> Arc<Motion> {
        let mut motion = Motion::new();
        motion.insert_bone_keyframe("センター", 0, BoneKeyframe::new(Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("センター", 20, BoneKeyframe::new(Vec3::new(0.0, 0.0, 2.0), Quat::from_rotation_y(0.5)));
        motion.insert_bone_keyframe("首", 0, BoneKeyframe::new(Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("首", 20, BoneKeyframe::new(Vec3::ZERO, Quat::from_rotation_x(0.4)));
        motion.insert_bone_keyframe("左足ＩＫ", 0, BoneKeyframe::new(Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("左足ＩＫ", 20, BoneKeyframe::new(Vec3::new(0.0, 1.0, -1.0), Quat::IDENTITY));
        motion.insert_morph_keyframe("あ", 0, MorphKeyframe { weight: 0.0 });
        motion.insert_morph_keyframe("あ", 10, MorphKeyframe { weight: 1.0 });
        Arc::new(motion)
    }

    #[test]
    fn world_composition_holds_at_every_sampled_frame() {
        let mut model = instance();
        model
            .add_motion("walk", walk_motion(), MotionOptions::default())
            .expect("add");
        for _ in 0..30 {
            model.update(1.5);
            assert_composition_law(&model);
        }
        assert_eq!(model.pose().skinning_matrices, model.skeleton().skinning_matrices());
    }

    #[test]
    fn physics_readback_drives_simulated_bones() {
        let mut model = instance();
        let hair = model.find_bone("髪").expect("hair");
        let target = Mat4::from_rotation_translation(Quat::from_rotation_z(0.3), Vec3::new(0.0, 15.0, 0.5));
        let physics = RecordingPhysics::new(vec![(hair, target), (999, Mat4::IDENTITY)]);
        let log = physics.log();
        model.attach_physics(Box::new(physics)).expect("join");

        let pose = model.update(1.0);
        assert!(pose.world_transforms[hair].abs_diff_eq(target, 1e-5));
        assert_composition_law(&model);

        let log = log.lock().map(|l| l.clone()).unwrap_or_default();
        assert_eq!(log.joined_bodies, 2);
        assert_eq!(log.steps.len(), 1);
        assert!((log.steps[0] - 1.0 / 30.0).abs() < 1e-6);

        assert!(model.detach().is_empty());
    }

    #[test]
    fn morphed_vertices_follow_motion() {
        let mut model = instance();
        model
            .add_motion(
                "talk",
                walk_motion(),
                MotionOptions::default().with_flags(PlayerFlags::FULL | PlayerFlags::LOOP),
            )
            .expect("add");
        model.update(5.0);
        // 「あ」在第 5 帧权重 0.5，位移 (0, -1, 0)
        let moved = model.update(5.0).morphed_positions[2];
        let base = model.model().vertices[2].position;
        assert!(moved.abs_diff_eq(base + Vec3::new(0.0, -0.5, 0.0), 1e-5), "{:?}", moved);
    }

    #[test]
    fn unknown_bone_is_a_reference_error() {
        let sink = Arc::new(MemorySink::new());
        let mut model = ModelInstance::new("sample", sample_model(), &EngineConfig::default(), sink.clone());
        assert!(matches!(
            model.find_bone("しっぽ"),
            Err(MmdError::Reference(ReferenceError::BoneNotFound(_)))
        ));
        assert!(model.set_ik_enabled("首", false).is_err());
        assert!(model.set_ik_enabled("左足ＩＫ", false).is_ok());
        assert_eq!(sink.warning_count(), 2);
    }

    #[test]
    fn detach_deletes_motions_and_leaves_world() {
        let mut model = instance();
        let physics = RecordingPhysics::new(vec![]);
        let log = physics.log();
        model.attach_physics(Box::new(physics)).expect("join");
        model.add_motion("a", walk_motion(), MotionOptions::default()).expect("add");
        model.drain_events();

        let events = model.detach();
        assert_eq!(events, vec![MotionEvent::Deleted("a".into())]);
        assert!(model.motions().is_empty());
        assert!(log.lock().map(|l| l.left).unwrap_or(false));
    }
}

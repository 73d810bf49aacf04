//! 动作控制器
//!
//! 把动作的轨道名绑定到模型的骨骼 / Morph 索引（绑定一次，逐帧复用），
//! 并负责采样、平滑切入与写入。

use std::sync::Arc;

use super::keyframe::BoneSample;
use super::motion::Motion;
use crate::logging::LogSink;
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;

/// 轨道 → 模型通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelBinding {
    /// 骨骼或 Morph 索引
    pub target: usize,
    /// 动作内的轨道索引
    pub track: usize,
    /// 单关键帧且为静止值
    pub is_static: bool,
}

/// 切入开始时的姿态
#[derive(Debug, Clone, Default)]
pub struct PoseSnapshot {
    bones: Vec<BoneSample>,
    morphs: Vec<f32>,
}

impl PoseSnapshot {
    pub fn capture(skeleton: &BoneSet, morphs: &MorphManager) -> Self {
        Self {
            bones: skeleton
                .bones()
                .iter()
                .map(|b| BoneSample {
                    translation: b.animation_translate,
                    rotation: b.animation_rotate,
                })
                .collect(),
            morphs: morphs.morphs().iter().map(|m| m.weight).collect(),
        }
    }
}

/// 单次写入参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplyMode {
    /// false 时跳过静态通道
    pub full: bool,
    pub bone_rate: f32,
    pub morph_rate: f32,
}

impl Default for ApplyMode {
    fn default() -> Self {
        Self {
            full: true,
            bone_rate: 1.0,
            morph_rate: 1.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotionController {
    motion: Arc<Motion>,
    bones: Vec<ChannelBinding>,
    morphs: Vec<ChannelBinding>,
    snapshot: Option<PoseSnapshot>,
}

impl MotionController {
    /// 绑定动作；`smooth` 为 true 时记录当前姿态作为切入起点
    pub fn bind(
        motion: Arc<Motion>,
        skeleton: &BoneSet,
        morphs: &MorphManager,
        smooth: bool,
        sink: &dyn LogSink,
    ) -> Self {
        let mut missing = 0usize;

        let mut bone_bindings = Vec::with_capacity(motion.bone_tracks().len());
        for (track, named) in motion.bone_tracks().iter().enumerate() {
            match skeleton.find_bone_by_name(&named.name) {
                Some(target) => bone_bindings.push(ChannelBinding {
                    target,
                    track,
                    is_static: named.track.is_static(),
                }),
                None => missing += 1,
            }
        }

        let mut morph_bindings = Vec::with_capacity(motion.morph_tracks().len());
        for (track, named) in motion.morph_tracks().iter().enumerate() {
            match morphs.find_morph_by_name(&named.name) {
                Some(target) => morph_bindings.push(ChannelBinding {
                    target,
                    track,
                    is_static: named.track.is_static(),
                }),
                None => missing += 1,
            }
        }

        if missing > 0 {
            sink.debug(&format!("{} motion tracks have no matching bone or morph", missing));
        }

        Self {
            motion,
            bones: bone_bindings,
            morphs: morph_bindings,
            snapshot: smooth.then(|| PoseSnapshot::capture(skeleton, morphs)),
        }
    }

    #[inline]
    pub fn motion(&self) -> &Arc<Motion> {
        &self.motion
    }

    /// 最后一个关键帧
    #[inline]
    pub fn end_frame(&self) -> f32 {
        self.motion.max_frame() as f32
    }

    #[inline]
    pub fn bone_bindings(&self) -> &[ChannelBinding] {
        &self.bones
    }

    #[inline]
    pub fn morph_bindings(&self) -> &[ChannelBinding] {
        &self.morphs
    }

    /// 采样某根骨骼（未绑定返回 None）
    pub fn sample_bone(&self, bone_index: usize, frame: f32) -> Option<BoneSample> {
        let binding = self.bones.iter().find(|b| b.target == bone_index)?;
        self.motion
            .bone_tracks()
            .at(binding.track)
            .and_then(|named| named.track.sample(frame))
    }

    /// 在 `frame` 采样并写入骨骼和 Morph
    pub fn apply(&self, frame: f32, mode: ApplyMode, skeleton: &mut BoneSet, morphs: &mut MorphManager) {
        let bone_blend = self.snapshot.as_ref().filter(|_| mode.bone_rate < 1.0);
        for binding in &self.bones {
            if !mode.full && binding.is_static {
                continue;
            }
            let Some(sample) = self
                .motion
                .bone_tracks()
                .at(binding.track)
                .and_then(|named| named.track.sample(frame))
            else {
                continue;
            };
            let sample = match bone_blend.and_then(|s| s.bones.get(binding.target)) {
                Some(from) => from.blend(&sample, mode.bone_rate),
                None => sample,
            };
            skeleton.set_bone_translation(binding.target, sample.translation);
            skeleton.set_bone_rotation(binding.target, sample.rotation);
        }

        let morph_blend = self.snapshot.as_ref().filter(|_| mode.morph_rate < 1.0);
        for binding in &self.morphs {
            if !mode.full && binding.is_static {
                continue;
            }
            let Some(weight) = self
                .motion
                .morph_tracks()
                .at(binding.track)
                .and_then(|named| named.track.sample(frame))
            else {
                continue;
            };
            let weight = match morph_blend.and_then(|s| s.morphs.get(binding.target)) {
                Some(&from) => from + (weight - from) * mode.morph_rate,
                None => weight,
            };
            morphs.set_morph_weight(binding.target, weight);
        }
    }
}

//! 动作数据
//!
//! 解码完成后不可变，通过 `Arc` 在多个播放器之间共享。

use std::collections::HashMap;

use super::keyframe::{BoneKeyframe, CameraKeyframe, Interpolate, LightKeyframe, MorphKeyframe};
use super::motion_track::KeyframeTrack;

/// 带名称的轨道
#[derive(Debug, Clone)]
pub struct NamedTrack<K> {
    pub name: String,
    pub track: KeyframeTrack<K>,
}

/// 按名称索引的轨道集合（保持首次出现的顺序）
#[derive(Debug, Clone)]
pub struct TrackSet<K> {
    tracks: Vec<NamedTrack<K>>,
    index: HashMap<String, usize>,
}

impl<K> Default for TrackSet<K> {
    fn default() -> Self {
        Self {
            tracks: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Interpolate> TrackSet<K> {
    pub fn insert_keyframe(&mut self, name: &str, frame_index: u32, keyframe: K) {
        let slot = match self.index.get(name) {
            Some(&i) => i,
            None => {
                self.tracks.push(NamedTrack {
                    name: name.to_string(),
                    track: KeyframeTrack::new(),
                });
                self.index.insert(name.to_string(), self.tracks.len() - 1);
                self.tracks.len() - 1
            }
        };
        self.tracks[slot].track.insert(frame_index, keyframe);
    }

    pub fn get(&self, name: &str) -> Option<&KeyframeTrack<K>> {
        self.index.get(name).map(|&i| &self.tracks[i].track)
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn at(&self, index: usize) -> Option<&NamedTrack<K>> {
        self.tracks.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedTrack<K>> {
        self.tracks.iter()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn max_frame_index(&self) -> u32 {
        self.tracks
            .iter()
            .map(|t| t.track.max_frame_index())
            .max()
            .unwrap_or(0)
    }
}

/// 动作：骨骼 / Morph / 相机 / 光源轨道
#[derive(Debug, Clone, Default)]
pub struct Motion {
    bones: TrackSet<BoneKeyframe>,
    morphs: TrackSet<MorphKeyframe>,
    camera: KeyframeTrack<CameraKeyframe>,
    light: KeyframeTrack<LightKeyframe>,
}

impl Motion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bone_keyframe(&mut self, name: &str, frame_index: u32, keyframe: BoneKeyframe) {
        self.bones.insert_keyframe(name, frame_index, keyframe);
    }

    pub fn insert_morph_keyframe(&mut self, name: &str, frame_index: u32, keyframe: MorphKeyframe) {
        self.morphs.insert_keyframe(name, frame_index, keyframe);
    }

    pub fn insert_camera_keyframe(&mut self, frame_index: u32, keyframe: CameraKeyframe) {
        self.camera.insert(frame_index, keyframe);
    }

    pub fn insert_light_keyframe(&mut self, frame_index: u32, keyframe: LightKeyframe) {
        self.light.insert(frame_index, keyframe);
    }

    #[inline]
    pub fn bone_tracks(&self) -> &TrackSet<BoneKeyframe> {
        &self.bones
    }

    #[inline]
    pub fn morph_tracks(&self) -> &TrackSet<MorphKeyframe> {
        &self.morphs
    }

    #[inline]
    pub fn camera_track(&self) -> &KeyframeTrack<CameraKeyframe> {
        &self.camera
    }

    #[inline]
    pub fn light_track(&self) -> &KeyframeTrack<LightKeyframe> {
        &self.light
    }

    pub fn bone_track(&self, name: &str) -> Option<&KeyframeTrack<BoneKeyframe>> {
        self.bones.get(name)
    }

    pub fn morph_track(&self, name: &str) -> Option<&KeyframeTrack<MorphKeyframe>> {
        self.morphs.get(name)
    }

    /// 所有轨道中的最大帧号
    pub fn max_frame(&self) -> u32 {
        self.bones
            .max_frame_index()
            .max(self.morphs.max_frame_index())
            .max(self.camera.max_frame_index())
            .max(self.light.max_frame_index())
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty() && self.morphs.is_empty() && self.camera.is_empty() && self.light.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[test]
    fn tracks_keep_first_seen_order() {
        let mut motion = Motion::new();
        motion.insert_bone_keyframe("センター", 0, BoneKeyframe::new(Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("首", 0, BoneKeyframe::new(Vec3::ZERO, Quat::IDENTITY));
        motion.insert_bone_keyframe("センター", 40, BoneKeyframe::new(Vec3::Y, Quat::IDENTITY));
        motion.insert_morph_keyframe("あ", 15, MorphKeyframe { weight: 1.0 });

        let names: Vec<&str> = motion.bone_tracks().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["センター", "首"]);
        assert_eq!(motion.bone_track("センター").map(KeyframeTrack::len), Some(2));
        assert_eq!(motion.max_frame(), 40);
        assert!(motion.bone_track("首").map(KeyframeTrack::is_static).unwrap_or(false));
    }

    #[test]
    fn motion_is_shareable_across_threads() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Motion>();
    }
}

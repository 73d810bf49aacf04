//! 动画轨道
//!
//! 存储单个通道的所有关键帧，并提供查找和插值功能。

use std::collections::BTreeMap;

use super::keyframe::Interpolate;

/// 关键帧轨道：帧号唯一，按帧号升序
#[derive(Debug, Clone)]
pub struct KeyframeTrack<K> {
    keyframes: BTreeMap<u32, K>,
}

impl<K> Default for KeyframeTrack<K> {
    fn default() -> Self {
        Self {
            keyframes: BTreeMap::new(),
        }
    }
}

impl<K: Interpolate> KeyframeTrack<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入关键帧；同一帧号已存在时替换并返回旧值
    pub fn insert(&mut self, frame_index: u32, keyframe: K) -> Option<K> {
        self.keyframes.insert(frame_index, keyframe)
    }

    pub fn remove(&mut self, frame_index: u32) -> Option<K> {
        self.keyframes.remove(&frame_index)
    }

    /// 查找精确帧
    pub fn find(&self, frame_index: u32) -> Option<&K> {
        self.keyframes.get(&frame_index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &K)> {
        self.keyframes.iter().map(|(&i, k)| (i, k))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// 最大帧号（空轨道为 0）
    pub fn max_frame_index(&self) -> u32 {
        self.keyframes.keys().next_back().copied().unwrap_or(0)
    }

    /// 查找最近的前后关键帧：前一帧 `<= frame_index`，后一帧 `> frame_index`
    pub fn search_closest(&self, frame_index: u32) -> (Option<(u32, &K)>, Option<(u32, &K)>) {
        let prev = self
            .keyframes
            .range(..=frame_index)
            .next_back()
            .map(|(&i, k)| (i, k));
        let next = frame_index.checked_add(1).and_then(|from| {
            self.keyframes.range(from..).next().map(|(&i, k)| (i, k))
        });
        (prev, next)
    }

    /// 在浮点帧采样；超出关键帧范围时取端点值，空轨道返回 None
    pub fn sample(&self, frame: f32) -> Option<K::Output> {
        let frame = frame.max(0.0);
        let (prev, next) = self.search_closest(frame.floor() as u32);
        match (prev, next) {
            (Some((i0, k0)), Some((i1, k1))) => {
                let t = (frame - i0 as f32) / (i1 - i0) as f32;
                Some(k0.interpolate(k1, t.clamp(0.0, 1.0)))
            }
            (Some((_, k)), None) | (None, Some((_, k))) => Some(k.value()),
            (None, None) => None,
        }
    }

    /// 单关键帧且为静止值
    pub fn is_static(&self) -> bool {
        match self.keyframes.len() {
            0 => true,
            1 => self.keyframes.values().all(Interpolate::is_rest),
            _ => false,
        }
    }
}

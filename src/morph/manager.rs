//! Morph 管理器

use glam::Vec3;
use rayon::prelude::*;

use super::Morph;
use crate::logging::LogSink;
use crate::model::names::NameTable;

/// Morph 管理器
#[derive(Clone, Debug, Default)]
pub struct MorphManager {
    morphs: Vec<Morph>,
    names: NameTable,
    /// 位移累加缓冲区（复用内存）
    delta_scratch: Vec<Vec3>,
    weight_epsilon: f32,
}

impl MorphManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 从解码结果构建（名称重名时保留第一个）
    pub fn from_morphs(morphs: Vec<Morph>, sink: &dyn LogSink) -> Self {
        let (names, duplicates) = NameTable::build(morphs.iter().map(|m| m.name.as_str()));
        for (i, name) in duplicates {
            sink.debug(&format!("duplicate morph name '{}' at {}, keeping first", name, i));
        }
        Self {
            morphs,
            names,
            delta_scratch: Vec::new(),
            weight_epsilon: 0.0,
        }
    }

    /// 权重绝对值不超过该值的 Morph 跳过
    pub fn set_weight_epsilon(&mut self, epsilon: f32) {
        self.weight_epsilon = epsilon.max(0.0);
    }

    /// 添加 Morph
    pub fn add_morph(&mut self, morph: Morph) {
        let index = self.morphs.len();
        self.names.insert(&morph.name, index);
        self.morphs.push(morph);
    }

    /// 通过名称查找 Morph
    pub fn find_morph_by_name(&self, name: &str) -> Option<usize> {
        self.names.get(name)
    }

    /// 获取 Morph 数量
    pub fn morph_count(&self) -> usize {
        self.morphs.len()
    }

    pub fn morphs(&self) -> &[Morph] {
        &self.morphs
    }

    /// 获取 Morph
    pub fn get_morph(&self, index: usize) -> Option<&Morph> {
        self.morphs.get(index)
    }

    /// 设置 Morph 权重
    pub fn set_morph_weight(&mut self, index: usize, weight: f32) {
        if let Some(morph) = self.morphs.get_mut(index) {
            morph.set_weight(weight);
        }
    }

    /// 获取 Morph 权重
    pub fn morph_weight(&self, index: usize) -> f32 {
        self.morphs.get(index).map(|m| m.weight).unwrap_or(0.0)
    }

    /// 重置所有 Morph 权重
    pub fn reset_all_weights(&mut self) {
        for morph in &mut self.morphs {
            morph.reset();
        }
    }

    /// 应用所有 Morph
    ///
    /// 先把所有非零权重的位移累加到缓冲区，再一次性写出：
    /// `out[i] = base[i] + Σ weight * delta`
    pub fn apply_morphs(&mut self, base: &[Vec3], out: &mut Vec<Vec3>) {
        self.delta_scratch.clear();
        self.delta_scratch.resize(base.len(), Vec3::ZERO);

        let epsilon = self.weight_epsilon;
        for morph in &self.morphs {
            if morph.is_base() || morph.weight.abs() <= epsilon {
                continue;
            }
            for offset in &morph.vertex_offsets {
                if let Some(delta) = self.delta_scratch.get_mut(offset.vertex_index as usize) {
                    *delta += offset.offset * morph.weight;
                }
            }
        }

        out.resize(base.len(), Vec3::ZERO);
        out.par_iter_mut()
            .zip(base.par_iter())
            .zip(self.delta_scratch.par_iter())
            .for_each(|((o, b), d)| *o = *b + *d);
    }
}

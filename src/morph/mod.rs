//! Morph 变形系统

mod manager;

pub use manager::MorphManager;

use glam::Vec3;

/// Morph 分类（PMD 表情面板分组）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MorphCategory {
    /// 基础 Morph：顶点集合为绝对坐标，本身不参与变形
    Base,
    Eyebrow,
    Eye,
    Lip,
    Other,
}

impl MorphCategory {
    pub fn from_id(id: u8) -> Self {
        match id {
            0 => Self::Base,
            1 => Self::Eyebrow,
            2 => Self::Eye,
            3 => Self::Lip,
            _ => Self::Other,
        }
    }
}

/// 顶点 Morph 偏移
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VertexMorphOffset {
    /// 绝对顶点索引
    pub vertex_index: u32,
    /// 基础 Morph 为绝对位置，其他为位移
    pub offset: Vec3,
}

/// Morph
#[derive(Clone, Debug, PartialEq)]
pub struct Morph {
    pub name: String,
    pub english_name: Option<String>,
    pub category: MorphCategory,
    pub vertex_offsets: Vec<VertexMorphOffset>,
    /// 当前权重（不截断，允许超出 [0, 1]）
    pub weight: f32,
}

impl Morph {
    pub fn new(name: impl Into<String>, category: MorphCategory) -> Self {
        Self {
            name: name.into(),
            english_name: None,
            category,
            vertex_offsets: Vec::new(),
            weight: 0.0,
        }
    }

    #[inline]
    pub fn set_weight(&mut self, weight: f32) {
        self.weight = weight;
    }

    #[inline]
    pub fn reset(&mut self) {
        self.weight = 0.0;
    }

    #[inline]
    pub fn is_base(&self) -> bool {
        self.category == MorphCategory::Base
    }
}

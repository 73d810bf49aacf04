//! 模型数据与 PMD 解码

pub(crate) mod binary;
pub mod names;
mod pmd_reader;
pub mod rigid_body;

pub use names::{NameTable, Symbol};
pub use pmd_reader::{decode_pmd, PMD_MAGIC, PMD_VERSION};
pub use rigid_body::{ConstraintDef, PhysicsMode, RigidBodyDef, RigidBodyShape};

use glam::{Vec2, Vec3, Vec4};

use crate::config::EngineConfig;
use crate::morph::MorphManager;
use crate::skeleton::BoneSet;

/// 解码选项
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeOptions {
    /// 左手系 → 右手系（Z 翻转、三角形绕序交换）
    pub convert_handedness: bool,
    /// 贝塞尔曲线采样间隔数（动作解码用）
    pub curve_sample_interval: u32,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            convert_handedness: true,
            curve_sample_interval: 64,
        }
    }
}

impl From<&EngineConfig> for DecodeOptions {
    fn from(config: &EngineConfig) -> Self {
        Self {
            convert_handedness: config.convert_handedness,
            curve_sample_interval: config.curve_sample_interval,
        }
    }
}

/// 顶点
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub bones: [u16; 2],
    /// 第一根骨骼的权重 [0, 1]
    pub weight: f32,
    /// 不绘制描边
    pub edge_suppressed: bool,
}

/// 球面贴图混合方式
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SphereMode {
    Multiply,
    Add,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SphereMap {
    pub name: String,
    pub mode: SphereMode,
}

/// 材质
#[derive(Clone, Debug, PartialEq)]
pub struct Material {
    /// rgb + alpha
    pub diffuse: Vec4,
    pub shininess: f32,
    pub specular: Vec3,
    pub ambient: Vec3,
    /// 0xFF 表示无
    pub toon_index: Option<u8>,
    pub edge: bool,
    /// 使用的索引数
    pub index_count: u32,
    pub texture: Option<String>,
    pub sphere_map: Option<SphereMap>,
}

/// 骨骼显示分组
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoneGroup {
    pub name: String,
    pub english_name: Option<String>,
    pub bones: Vec<usize>,
}

/// 解码结果
#[derive(Clone, Debug)]
pub struct ModelData {
    pub name: String,
    pub comment: String,
    pub english_name: Option<String>,
    pub english_comment: Option<String>,
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
    pub materials: Vec<Material>,
    pub skeleton: BoneSet,
    pub morphs: MorphManager,
    /// 表情面板显示的 Morph
    pub morph_display: Vec<usize>,
    pub bone_groups: Vec<BoneGroup>,
    pub toon_textures: Vec<String>,
    pub rigid_bodies: Vec<RigidBodyDef>,
    pub constraints: Vec<ConstraintDef>,
}

impl ModelData {
    /// 所有引用到的纹理名（去重，按出现顺序）
    pub fn texture_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        let candidates = self
            .materials
            .iter()
            .flat_map(|m| {
                m.texture
                    .iter()
                    .cloned()
                    .chain(m.sphere_map.iter().map(|s| s.name.clone()))
            })
            .chain(self.toon_textures.iter().cloned());
        for name in candidates {
            if !name.is_empty() && !names.contains(&name) {
                names.push(name);
            }
        }
        names
    }

    /// 静止姿态的顶点位置
    pub fn rest_positions(&self) -> Vec<Vec3> {
        self.vertices.iter().map(|v| v.position).collect()
    }
}

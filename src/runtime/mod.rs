//! 运行时
//!
//! - ModelLoader: 外部资源加载接口
//! - ModelInstance: 单个模型的每帧流程
//! - Scene: 管理所有已加载模型

mod instance;
mod loader;
mod scene;

pub use instance::ModelInstance;
pub use loader::{MemoryLoader, ModelLoader};
pub use scene::{ModelHandle, Scene};

use glam::{Mat4, Vec3};

/// 每帧输出给渲染层的数据
#[derive(Debug, Clone, Default)]
pub struct PoseBuffer {
    /// 骨骼全局变换（模型空间）
    pub world_transforms: Vec<Mat4>,
    /// 蒙皮矩阵 = 全局变换 × 初始逆矩阵
    pub skinning_matrices: Vec<Mat4>,
    /// 应用 Morph 后的顶点位置
    pub morphed_positions: Vec<Vec3>,
    /// 模型根变换
    pub root: Mat4,
}

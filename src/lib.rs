//! MMD Runtime - Rust 实现的 MMD 播放运行时
//!
//! 提供：
//! - PMD 模型解码（骨骼 / Morph / 刚体定义）
//! - VMD 动画解析和关键帧插值
//! - 骨骼层级变换和 IK 求解
//! - Morph 变形系统
//! - 多动作并行播放管理（优先级覆盖）

pub mod animation;
pub mod arena;
pub mod config;
pub mod logging;
pub mod model;
pub mod morph;
pub mod physics;
pub mod runtime;
pub mod skeleton;

#[cfg(test)]
pub(crate) mod test_support;

pub use animation::{
    Motion, MotionEvent, MotionEventListener, MotionManager, MotionOptions, PlayerFlags,
    PlayerHandle, PlayerStatus, VmdFile,
};
pub use config::EngineConfig;
pub use logging::{LogFacade, LogSink};
pub use model::{decode_pmd, DecodeOptions, ModelData};
pub use morph::{Morph, MorphManager};
pub use physics::PhysicsBridge;
pub use runtime::{MemoryLoader, ModelHandle, ModelInstance, ModelLoader, PoseBuffer, Scene};
pub use skeleton::{BoneLink, BoneSet, IkSolver};

use thiserror::Error;

/// 模型 / 动作二进制解码错误（对该资源是致命的）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    #[error("bad magic: not a PMD/VMD buffer")]
    BadMagic,

    #[error("unsupported version {0}")]
    UnsupportedVersion(f32),

    #[error("truncated while reading {section} at offset {offset}")]
    Truncated { section: &'static str, offset: usize },

    #[error("missing required section: {0}")]
    MissingRequiredSection(&'static str),

    #[error("cyclic bone hierarchy at bone {bone}")]
    CyclicBoneHierarchy { bone: usize },

    #[error("invalid data: {0}")]
    InvalidData(String),
}

/// 引用错误：返回给调用方，不修改任何状态
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReferenceError {
    #[error("motion alias not found: {0}")]
    AliasNotFound(String),

    #[error("motion alias already used: {0}")]
    AliasAlreadyUsed(String),

    #[error("bone not found: {0}")]
    BoneNotFound(String),
}

#[derive(Error, Debug)]
pub enum MmdError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("reference error: {0}")]
    Reference(#[from] ReferenceError),

    #[error("asset error: {0}")]
    Asset(String),

    #[error("stale handle")]
    StaleHandle,
}

pub type Result<T> = std::result::Result<T, MmdError>;

//! 运行时配置
//!
//! 所有参数扁平化，通过 `EngineConfig` 显式传入各组件（不使用全局实例）。

/// 运行时配置（扁平化，不嵌套）
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    // ========== 时间 ==========
    /// 动画帧率，默认 30.0（VMD 标准）
    pub fps: f32,
    /// 单次传给物理引擎的最长时间（秒），卡顿帧被截断，默认 0.1
    pub physics_max_step: f32,

    // ========== IK ==========
    /// 末端与目标距离小于该值时提前结束迭代
    pub ik_epsilon: f32,

    // ========== 动作混合 ==========
    /// 骨骼平滑切入的帧数，默认 20
    pub bone_blend_in_frames: f32,
    /// Morph 平滑切入的帧数，默认 6
    pub morph_blend_in_frames: f32,
    /// 循环动作回到的帧（添加动作时未指定 `loop_at`），默认 0
    pub default_loop_frame: f32,

    // ========== 插值 ==========
    /// 贝塞尔曲线采样间隔数
    pub curve_sample_interval: u32,

    // ========== Morph ==========
    /// 权重绝对值低于该值的 Morph 不参与计算
    pub morph_weight_epsilon: f32,

    // ========== 解码 ==========
    /// 左手系（PMD/VMD）转换为右手系
    pub convert_handedness: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            // ====== 时间 ======
            fps: 30.0,
            physics_max_step: 0.1,

            // ====== IK ======
            // 模型单位约为 8cm，1e-4 已远小于可见误差
            ik_epsilon: 1.0e-4,

            // ====== 动作混合 ======
            bone_blend_in_frames: 20.0,
            morph_blend_in_frames: 6.0,
            default_loop_frame: 0.0,

            // ====== 插值 ======
            curve_sample_interval: 64,

            // ====== Morph ======
            morph_weight_epsilon: 1.0e-6,

            // ====== 解码 ======
            convert_handedness: true,
        }
    }
}

impl EngineConfig {
    /// 秒 → 帧
    #[inline]
    pub fn seconds_to_frames(&self, seconds: f32) -> f32 {
        seconds * self.fps
    }

    /// 帧 → 秒
    #[inline]
    pub fn frames_to_seconds(&self, frames: f32) -> f32 {
        if self.fps > 0.0 {
            frames / self.fps
        } else {
            0.0
        }
    }
}

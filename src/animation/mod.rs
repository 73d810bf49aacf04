//! 动画系统
//!
//! - KeyframeTrack: 关键帧轨道与插值
//! - Playhead: 播放进度、循环与平滑切入
//! - VmdFile: VMD 动作解码
//! - MotionManager: 多动作并行播放

mod bezier_curve;
mod controller;
mod keyframe;
mod motion;
mod motion_manager;
mod motion_track;
mod playhead;
mod vmd_loader;

pub use bezier_curve::{is_linear_parameters, BezierCurve, BezierCurveCache, BezierCurveFactory, Curve};
pub use controller::{ApplyMode, ChannelBinding, MotionController, PoseSnapshot};
pub use keyframe::{
    BoneCurves, BoneKeyframe, BoneSample, CameraCurves, CameraKeyframe, CameraSample, Interpolate,
    LightKeyframe, MorphKeyframe,
};
pub use motion::{Motion, NamedTrack, TrackSet};
pub use motion_manager::{
    MotionEvent, MotionEventListener, MotionManager, MotionOptions, MotionPlayer, PlayerFlags,
    PlayerHandle, PlayerStatus, UpdateReport,
};
pub use motion_track::KeyframeTrack;
pub use playhead::Playhead;
pub use vmd_loader::VmdFile;

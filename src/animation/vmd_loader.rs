//! VMD 文件加载器
//!
//! 解析 VMD 动画文件并转换为 Motion 数据。
//! 骨骼 / Morph 段必需；相机 / 光源段在旧文件中可能缺失。

use std::fs;
use std::path::Path;

use glam::{Quat, Vec3};

use super::bezier_curve::{BezierCurveCache, BezierCurveFactory};
use super::keyframe::{
    BoneCurves, BoneKeyframe, CameraCurves, CameraKeyframe, CameraSample, LightKeyframe,
    MorphKeyframe,
};
use super::motion::Motion;
use crate::logging::LogSink;
use crate::model::binary::ByteReader;
use crate::model::rigid_body::{flip_euler, flip_position};
use crate::model::DecodeOptions;
use crate::{DecodeError, Result};

/// VMD 文件头（两个版本都是 25 字节，后补 NUL 到 30 字节）
const VMD_HEADER_V1: &[u8] = b"Vocaloid Motion Data file";
const VMD_HEADER_V2: &[u8] = b"Vocaloid Motion Data 0002";
const HEADER_LEN: usize = 30;
const MODEL_NAME_LEN_V1: usize = 10;
const MODEL_NAME_LEN_V2: usize = 20;

const NAME_LEN: usize = 15;
const BONE_RECORD: usize = 111;
const MORPH_RECORD: usize = 23;
const CAMERA_RECORD: usize = 61;
const LIGHT_RECORD: usize = 28;

/// VMD 文件数据
#[derive(Debug, Clone)]
pub struct VmdFile {
    pub model_name: String,
    pub motion: Motion,
}

impl VmdFile {
    /// 从文件路径加载 VMD
    pub fn load<P: AsRef<Path>>(path: P, options: &DecodeOptions, sink: &dyn LogSink) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        Ok(Self::decode(&bytes, options, sink)?)
    }

    /// 从字节切片解码
    pub fn decode(
        bytes: &[u8],
        options: &DecodeOptions,
        sink: &dyn LogSink,
    ) -> std::result::Result<Self, DecodeError> {
        let cache = BezierCurveCache::new();
        VmdReader {
            reader: ByteReader::new(bytes),
            options: *options,
            curves: &cache,
        }
        .read(sink)
    }

    /// 获取最大帧数
    pub fn max_frame(&self) -> u32 {
        self.motion.max_frame()
    }
}

struct VmdReader<'a, 'c> {
    reader: ByteReader<'a>,
    options: DecodeOptions,
    curves: &'c dyn BezierCurveFactory,
}

impl<'a, 'c> VmdReader<'a, 'c> {
    fn read(mut self, sink: &dyn LogSink) -> std::result::Result<VmdFile, DecodeError> {
        self.reader.section("header");
        let header = self.reader.read_bytes(HEADER_LEN)?;
        let name_len = if header.starts_with(VMD_HEADER_V2) {
            MODEL_NAME_LEN_V2
        } else if header.starts_with(VMD_HEADER_V1) {
            MODEL_NAME_LEN_V1
        } else {
            return Err(DecodeError::BadMagic);
        };
        let model_name = self.reader.read_fixed_string(name_len)?;

        let mut motion = Motion::new();

        // 骨骼关键帧
        self.reader.section("bone keyframes");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, BONE_RECORD)?;
        for _ in 0..count {
            let (name, frame, keyframe) = self.read_bone_keyframe()?;
            motion.insert_bone_keyframe(&name, frame, keyframe);
        }

        // Morph 关键帧
        self.reader.section("morph keyframes");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, MORPH_RECORD)?;
        for _ in 0..count {
            let name = self.reader.read_fixed_string(NAME_LEN)?;
            let frame = self.reader.read_u32()?;
            let weight = self.reader.read_f32()?;
            motion.insert_morph_keyframe(&name, frame, MorphKeyframe { weight });
        }

        if !self.reader.is_empty() {
            self.reader.section("camera keyframes");
            let count = self.reader.read_u32()? as usize;
            self.reader.ensure_records(count, CAMERA_RECORD)?;
            for _ in 0..count {
                let (frame, keyframe) = self.read_camera_keyframe()?;
                motion.insert_camera_keyframe(frame, keyframe);
            }
        }

        if !self.reader.is_empty() {
            self.reader.section("light keyframes");
            let count = self.reader.read_u32()? as usize;
            self.reader.ensure_records(count, LIGHT_RECORD)?;
            for _ in 0..count {
                let frame = self.reader.read_u32()?;
                let color = self.reader.read_vec3()?;
                let direction = self.reader.read_vec3()?;
                motion.insert_light_keyframe(
                    frame,
                    LightKeyframe {
                        color,
                        direction: self.convert_position(direction),
                    },
                );
            }
        }

        // 自阴影 / IK 显示段不处理
        if !self.reader.is_empty() {
            sink.debug(&format!(
                "{} bytes of unsupported VMD streams ignored",
                self.reader.remaining()
            ));
        }

        sink.info(&format!(
            "VMD '{}' decoded: {} bone tracks, {} morph tracks, {} camera keys, {} light keys, {} frames",
            model_name,
            motion.bone_tracks().len(),
            motion.morph_tracks().len(),
            motion.camera_track().len(),
            motion.light_track().len(),
            motion.max_frame(),
        ));

        Ok(VmdFile { model_name, motion })
    }

    fn read_bone_keyframe(&mut self) -> std::result::Result<(String, u32, BoneKeyframe), DecodeError> {
        let name = self.reader.read_fixed_string(NAME_LEN)?;
        let frame = self.reader.read_u32()?;
        let translation = self.reader.read_vec3()?;
        let (x, y, z, w) = (
            self.reader.read_f32()?,
            self.reader.read_f32()?,
            self.reader.read_f32()?,
            self.reader.read_f32()?,
        );
        let interpolation = self.reader.read_bytes(64)?;

        // 每轴 4 个参数按 4 字节间隔排列：x1, y1, x2, y2
        let axis = |a: usize| {
            [
                interpolation[a],
                interpolation[a + 4],
                interpolation[a + 8],
                interpolation[a + 12],
            ]
        };
        let interval = self.options.curve_sample_interval;
        let curves = BoneCurves {
            x: self.curves.curve_for(axis(0), interval),
            y: self.curves.curve_for(axis(1), interval),
            z: self.curves.curve_for(axis(2), interval),
            rotation: self.curves.curve_for(axis(3), interval),
        };

        let raw = Quat::from_xyzw(x, y, z, w);
        let rotation = if raw.length_squared() < 1e-12 {
            Quat::IDENTITY
        } else if self.options.convert_handedness {
            Quat::from_xyzw(x, y, -z, -w).normalize()
        } else {
            raw.normalize()
        };

        Ok((
            name,
            frame,
            BoneKeyframe {
                translation: self.convert_position(translation),
                rotation,
                curves,
            },
        ))
    }

    fn read_camera_keyframe(&mut self) -> std::result::Result<(u32, CameraKeyframe), DecodeError> {
        let frame = self.reader.read_u32()?;
        let distance = self.reader.read_f32()?;
        let position = self.reader.read_vec3()?;
        let angles = self.reader.read_vec3()?;
        let interpolation = self.reader.read_bytes(24)?;
        let fov = self.reader.read_u32()? as f32;
        // 0 表示透视开启
        let perspective = self.reader.read_u8()? == 0;

        // 每个参数 4 字节：x1, x2, y1, y2
        let param = |p: usize| {
            let b = &interpolation[p * 4..p * 4 + 4];
            [b[0], b[2], b[1], b[3]]
        };
        let interval = self.options.curve_sample_interval;
        let curves = CameraCurves {
            x: self.curves.curve_for(param(0), interval),
            y: self.curves.curve_for(param(1), interval),
            z: self.curves.curve_for(param(2), interval),
            rotation: self.curves.curve_for(param(3), interval),
            distance: self.curves.curve_for(param(4), interval),
            fov: self.curves.curve_for(param(5), interval),
        };

        let angles = if self.options.convert_handedness {
            flip_euler(angles)
        } else {
            angles
        };

        Ok((
            frame,
            CameraKeyframe {
                sample: CameraSample {
                    distance,
                    position: self.convert_position(position),
                    angles,
                    fov,
                    perspective,
                },
                curves,
            },
        ))
    }

    #[inline]
    fn convert_position(&self, v: Vec3) -> Vec3 {
        if self.options.convert_handedness {
            flip_position(v)
        } else {
            v
        }
    }
}

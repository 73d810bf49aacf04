//! 测试夹具：最小 PMD / VMD 生成器与记录型物理桥

use std::sync::{Arc, Mutex};

use byteorder::{LittleEndian, WriteBytesExt};
use glam::{Mat4, Quat, Vec3};

use crate::logging::NullSink;
use crate::model::binary::encode_shift_jis_fixed;
use crate::model::{decode_pmd, ConstraintDef, DecodeOptions, ModelData, RigidBodyDef};
use crate::physics::PhysicsBridge;

// ============================================================================
// 字节写入
// ============================================================================

#[derive(Default)]
struct Writer {
    bytes: Vec<u8>,
}

impl Writer {
    fn len(&self) -> usize {
        self.bytes.len()
    }

    fn u8(&mut self, v: u8) {
        self.bytes.push(v);
    }

    fn u16(&mut self, v: u16) {
        self.bytes.write_u16::<LittleEndian>(v).unwrap();
    }

    fn u32(&mut self, v: u32) {
        self.bytes.write_u32::<LittleEndian>(v).unwrap();
    }

    fn f32(&mut self, v: f32) {
        self.bytes.write_f32::<LittleEndian>(v).unwrap();
    }

    fn vec3(&mut self, v: Vec3) {
        self.f32(v.x);
        self.f32(v.y);
        self.f32(v.z);
    }

    fn text(&mut self, text: &str, len: usize) {
        self.bytes.extend_from_slice(&encode_shift_jis_fixed(text, len));
    }

    fn raw(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }
}

// ============================================================================
// PMD
// ============================================================================

/// 生成的 PMD 及其段边界
pub(crate) struct PmdFixture {
    pub bytes: Vec<u8>,
    /// 必需段结束位置
    pub required_end: usize,
    /// 在这些位置截断仍能成功解码（含 `required_end` 和文件末尾）
    pub trailer_boundaries: Vec<usize>,
}

struct BoneSpec {
    name: &'static str,
    parent: u16,
    tail: u16,
    kind: u8,
    position: Vec3,
}

struct MorphSpec {
    name: &'static str,
    category: u8,
    entries: Vec<(u32, Vec3)>,
}

/// 样例模型：7 根骨骼、1 条腿部 IK、基础 + 2 个 Morph、2 个刚体
pub(crate) struct PmdBuilder {
    bones: Vec<BoneSpec>,
    morphs: Vec<MorphSpec>,
}

impl PmdBuilder {
    pub fn sample() -> Self {
        let bone = |name, parent, tail, kind, position| BoneSpec {
            name,
            parent,
            tail,
            kind,
            position,
        };
        Self {
            bones: vec![
                bone("全ての親", 0xFFFF, 1, 1, Vec3::ZERO),
                bone("センター", 0, 0, 1, Vec3::new(0.0, 8.0, 0.0)),
                bone("首", 1, 3, 0, Vec3::new(0.0, 15.0, 0.0)),
                bone("髪", 2, 0, 0, Vec3::new(0.0, 16.0, 0.5)),
                bone("左ひざ", 1, 5, 4, Vec3::new(1.0, 5.0, 0.0)),
                bone("左足首", 4, 0, 4, Vec3::new(1.0, 1.0, 0.0)),
                bone("左足ＩＫ", 0, 0, 2, Vec3::new(1.0, 1.0, 0.0)),
            ],
            morphs: vec![
                MorphSpec {
                    name: "base",
                    category: 0,
                    entries: vec![(0, Vec3::ZERO), (2, Vec3::new(0.0, 1.0, 0.0))],
                },
                MorphSpec {
                    name: "あ",
                    category: 3,
                    entries: vec![(1, Vec3::new(0.0, -1.0, 0.0))],
                },
                MorphSpec {
                    name: "まばたき",
                    category: 2,
                    entries: vec![(0, Vec3::new(0.0, 0.1, 0.0))],
                },
            ],
        }
    }

    /// 第一个 Morph 不是基础 Morph
    pub fn without_base_morph(mut self) -> Self {
        if let Some(first) = self.morphs.first_mut() {
            first.category = 4;
        }
        self
    }

    /// 追加一个相对索引越界的 Morph「壊」
    pub fn with_bad_morph_index(mut self) -> Self {
        self.morphs.push(MorphSpec {
            name: "壊",
            category: 4,
            entries: vec![(5, Vec3::X)],
        });
        self
    }

    /// 替换名为 `name` 的 Morph 的顶点项（基础 Morph 为绝对索引，其余为基础列表中的位置）
    pub fn with_morph_entries(mut self, name: &str, entries: &[(u32, Vec3)]) -> Self {
        if let Some(morph) = self.morphs.iter_mut().find(|m| m.name == name) {
            morph.entries = entries.to_vec();
        }
        self
    }

    pub fn build(&self) -> PmdFixture {
        let mut w = Writer::default();

        // 头部
        w.raw(b"Pmd");
        w.f32(1.0);
        w.text("テスト", 20);
        w.text("コメント", 256);

        // 顶点
        let positions = [Vec3::ZERO, Vec3::new(1.0, 0.0, 1.0), Vec3::new(0.0, 1.0, 0.0)];
        w.u32(positions.len() as u32);
        for p in positions {
            w.vec3(p);
            w.vec3(Vec3::Z);
            w.f32(0.0);
            w.f32(0.0);
            w.u16(2);
            w.u16(3);
            w.u8(100);
            w.u8(0);
        }

        // 索引
        w.u32(3);
        for i in [0u16, 1, 2] {
            w.u16(i);
        }

        // 材质
        w.u32(1);
        w.vec3(Vec3::splat(0.8));
        w.f32(1.0);
        w.f32(5.0);
        w.vec3(Vec3::splat(0.1));
        w.vec3(Vec3::splat(0.5));
        w.u8(0);
        w.u8(1);
        w.u32(3);
        w.text("body.bmp*skin.sph", 20);

        // 骨骼
        w.u16(self.bones.len() as u16);
        for bone in &self.bones {
            w.text(bone.name, 20);
            w.u16(bone.parent);
            w.u16(bone.tail);
            w.u8(bone.kind);
            w.u16(0);
            w.vec3(bone.position);
        }

        // IK：左足ＩＫ → 左足首，经过左ひざ
        w.u16(1);
        w.u16(6);
        w.u16(5);
        w.u8(1);
        w.u16(10);
        w.f32(0.5);
        w.u16(4);

        // Morph
        w.u16(self.morphs.len() as u16);
        for morph in &self.morphs {
            w.text(morph.name, 20);
            w.u32(morph.entries.len() as u32);
            w.u8(morph.category);
            for &(index, offset) in &morph.entries {
                w.u32(index);
                w.vec3(offset);
            }
        }
        let required_end = w.len();
        let mut trailer_boundaries = vec![required_end];

        // 显示列表
        let display_morphs = self.morphs.len().saturating_sub(1);
        w.u8(display_morphs as u8);
        for i in 1..=display_morphs {
            w.u16(i as u16);
        }
        w.u8(1);
        w.text("体", 50);
        w.u32(2);
        w.u16(2);
        w.u8(1);
        w.u16(3);
        w.u8(1);
        trailer_boundaries.push(w.len());

        // 英文名
        w.u8(1);
        w.text("test", 20);
        w.text("comment", 256);
        for i in 0..self.bones.len() {
            w.text(&format!("bone{}", i), 20);
        }
        for i in 0..display_morphs {
            w.text(&format!("morph{}", i), 20);
        }
        w.text("Body", 50);
        trailer_boundaries.push(w.len());

        // 卡通纹理
        for i in 1..=10 {
            w.text(&format!("toon{:02}.bmp", i), 100);
        }
        trailer_boundaries.push(w.len());

        // 刚体：首跟随骨骼，髪物理驱动
        w.u32(2);
        for (name, bone, mode) in [("首", 2u16, 0u8), ("髪", 3, 1)] {
            w.text(name, 20);
            w.u16(bone);
            w.u8(0);
            w.u16(0xFFFE);
            w.u8(0);
            w.vec3(Vec3::new(0.5, 0.0, 0.0));
            w.vec3(Vec3::ZERO);
            w.vec3(Vec3::new(0.1, 0.2, 0.3));
            w.f32(1.0);
            w.f32(0.5);
            w.f32(0.5);
            w.f32(0.0);
            w.f32(0.5);
            w.u8(mode);
        }
        trailer_boundaries.push(w.len());

        // 约束
        w.u32(1);
        w.text("首-髪", 20);
        w.u32(0);
        w.u32(1);
        w.vec3(Vec3::new(0.0, 15.5, 0.0));
        w.vec3(Vec3::ZERO);
        w.vec3(Vec3::ZERO);
        w.vec3(Vec3::ZERO);
        w.vec3(Vec3::splat(-0.2));
        w.vec3(Vec3::splat(0.2));
        w.vec3(Vec3::ZERO);
        w.vec3(Vec3::ZERO);
        trailer_boundaries.push(w.len());

        PmdFixture {
            bytes: w.bytes,
            required_end,
            trailer_boundaries,
        }
    }
}

/// 解码后的样例模型
pub(crate) fn sample_model() -> ModelData {
    let fixture = PmdBuilder::sample().build();
    decode_pmd(&fixture.bytes, &DecodeOptions::default(), &NullSink).expect("sample model decodes")
}

// ============================================================================
// VMD
// ============================================================================

/// 线性插值参数（x1 == y1, x2 == y2）
const LINEAR: [u8; 4] = [20, 20, 107, 107];

pub(crate) struct VmdBuilder {
    model_name: String,
    legacy: bool,
    bones: Vec<(String, u32, Vec3, Quat)>,
    morphs: Vec<(String, u32, f32)>,
    cameras: Vec<(u32, f32, Vec3, u32)>,
    lights: Vec<(u32, Vec3, Vec3)>,
}

impl VmdBuilder {
    pub fn new(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            legacy: false,
            bones: Vec::new(),
            morphs: Vec::new(),
            cameras: Vec::new(),
            lights: Vec::new(),
        }
    }

    /// 旧版头部（模型名 10 字节）
    pub fn legacy_header(mut self) -> Self {
        self.legacy = true;
        self
    }

    pub fn bone(mut self, name: &str, frame: u32, translation: Vec3, rotation: Quat) -> Self {
        self.bones.push((name.to_string(), frame, translation, rotation));
        self
    }

    pub fn morph(mut self, name: &str, frame: u32, weight: f32) -> Self {
        self.morphs.push((name.to_string(), frame, weight));
        self
    }

    pub fn camera(mut self, frame: u32, distance: f32, position: Vec3, fov: u32) -> Self {
        self.cameras.push((frame, distance, position, fov));
        self
    }

    pub fn light(mut self, frame: u32, color: Vec3, direction: Vec3) -> Self {
        self.lights.push((frame, color, direction));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let mut w = self.write_motion();
        w.u32(self.cameras.len() as u32);
        for &(frame, distance, position, fov) in &self.cameras {
            w.u32(frame);
            w.f32(distance);
            w.vec3(position);
            w.vec3(Vec3::ZERO);
            // 每个参数按 x1, x2, y1, y2 排列
            for _ in 0..6 {
                w.raw(&[LINEAR[0], LINEAR[2], LINEAR[1], LINEAR[3]]);
            }
            w.u32(fov);
            w.u8(0);
        }
        w.u32(self.lights.len() as u32);
        for &(frame, color, direction) in &self.lights {
            w.u32(frame);
            w.vec3(color);
            w.vec3(direction);
        }
        w.bytes
    }

    /// 只有骨骼和 Morph 段的旧文件
    pub fn build_without_camera(&self) -> Vec<u8> {
        self.write_motion().bytes
    }

    fn write_motion(&self) -> Writer {
        let mut w = Writer::default();
        let (header, name_len): (&[u8], usize) = if self.legacy {
            (b"Vocaloid Motion Data file", 10)
        } else {
            (b"Vocaloid Motion Data 0002", 20)
        };
        let mut padded = [0u8; 30];
        padded[..header.len()].copy_from_slice(header);
        w.raw(&padded);
        w.text(&self.model_name, name_len);

        w.u32(self.bones.len() as u32);
        for (name, frame, translation, rotation) in &self.bones {
            w.text(name, 15);
            w.u32(*frame);
            w.vec3(*translation);
            w.f32(rotation.x);
            w.f32(rotation.y);
            w.f32(rotation.z);
            w.f32(rotation.w);
            // 各轴参数间隔 4 字节
            let mut interpolation = [0u8; 64];
            for axis in 0..4 {
                for (k, &value) in LINEAR.iter().enumerate() {
                    interpolation[axis + k * 4] = value;
                }
            }
            w.raw(&interpolation);
        }

        w.u32(self.morphs.len() as u32);
        for (name, frame, weight) in &self.morphs {
            w.text(name, 15);
            w.u32(*frame);
            w.f32(*weight);
        }
        w
    }
}

// ============================================================================
// 物理
// ============================================================================

/// 物理桥调用记录
#[derive(Debug, Clone, Default)]
pub(crate) struct PhysicsLog {
    pub joined_bodies: usize,
    pub steps: Vec<f32>,
    pub left: bool,
}

/// 每次步进后返回固定的骨骼变换
pub(crate) struct RecordingPhysics {
    transforms: Vec<(usize, Mat4)>,
    log: Arc<Mutex<PhysicsLog>>,
}

impl RecordingPhysics {
    pub fn new(transforms: Vec<(usize, Mat4)>) -> Self {
        Self {
            transforms,
            log: Arc::new(Mutex::new(PhysicsLog::default())),
        }
    }

    pub fn log(&self) -> Arc<Mutex<PhysicsLog>> {
        self.log.clone()
    }
}

impl PhysicsBridge for RecordingPhysics {
    fn join_world(&mut self, bodies: &[RigidBodyDef], _: &[ConstraintDef], _: &[Mat4]) -> crate::Result<()> {
        self.log.lock().unwrap().joined_bodies = bodies.len();
        Ok(())
    }

    fn leave_world(&mut self) {
        self.log.lock().unwrap().left = true;
    }

    fn step_simulation(&mut self, dt: f32, _: &[Mat4]) {
        self.log.lock().unwrap().steps.push(dt);
    }

    fn read_bone_transforms(&self) -> &[(usize, Mat4)] {
        &self.transforms
    }
}

//! PMD 文件解码器
//!
//! 按固定顺序读取各段：头部 → 顶点 → 索引 → 材质 → 骨骼 → IK → Morph → 可选尾部。
//! 尾部各块是否存在由剩余长度推断；块一旦开始就必须完整。

use std::f32::consts::PI;

use glam::{Vec3, Vec4};

use super::binary::ByteReader;
use super::rigid_body::{flip_euler, flip_position, ConstraintDef, PhysicsMode, RigidBodyDef, RigidBodyShape};
use super::{BoneGroup, DecodeOptions, Material, ModelData, SphereMap, SphereMode, Vertex};
use crate::logging::LogSink;
use crate::morph::{Morph, MorphCategory, MorphManager, VertexMorphOffset};
use crate::skeleton::{BoneDef, BoneKind, BoneSet, IkChain, IkLink};
use crate::DecodeError;

/// PMD 文件头
pub const PMD_MAGIC: &[u8; 3] = b"Pmd";
pub const PMD_VERSION: f32 = 1.0;

const NAME_LEN: usize = 20;
const COMMENT_LEN: usize = 256;
const GROUP_NAME_LEN: usize = 50;
const TOON_NAME_LEN: usize = 100;
const TOON_COUNT: usize = 10;

const VERTEX_STRIDE: usize = 38;
const MATERIAL_STRIDE: usize = 70;
const BONE_STRIDE: usize = 39;
const MORPH_VERTEX_STRIDE: usize = 16;
const RIGID_BODY_STRIDE: usize = 83;
const CONSTRAINT_STRIDE: usize = 124;

const NO_BONE: u16 = 0xFFFF;
const KNEE_NAME: &str = "ひざ";
/// 膝盖最小弯曲角，避免完全伸直时的奇异
const KNEE_MIN_ANGLE: f32 = 0.002;

/// 解码 PMD
///
/// 任何错误都使整个模型加载失败，不返回部分结果。
pub fn decode_pmd(
    bytes: &[u8],
    options: &DecodeOptions,
    sink: &dyn LogSink,
) -> Result<ModelData, DecodeError> {
    PmdReader {
        reader: ByteReader::new(bytes),
        options: *options,
        sink,
    }
    .read()
}

struct PmdReader<'a, 's> {
    reader: ByteReader<'a>,
    options: DecodeOptions,
    sink: &'s dyn LogSink,
}

/// 解码中间结果（尾部之前）
struct Body {
    name: String,
    comment: String,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    materials: Vec<Material>,
    bones: Vec<BoneDef>,
    chains: Vec<IkChain>,
    morphs: Vec<Morph>,
}

#[derive(Default)]
struct Trailer {
    morph_display: Vec<usize>,
    bone_groups: Vec<BoneGroup>,
    english_name: Option<String>,
    english_comment: Option<String>,
    toon_textures: Vec<String>,
    rigid_bodies: Vec<RigidBodyDef>,
    constraints: Vec<ConstraintDef>,
}

impl<'a, 's> PmdReader<'a, 's> {
    fn read(mut self) -> Result<ModelData, DecodeError> {
        let (name, comment) = self.read_header()?;
        let vertices = self.read_vertices()?;
        let indices = self.read_indices(vertices.len())?;
        let materials = self.read_materials()?;
        let bones = self.read_bones()?;
        let chains = self.read_ik_chains(&bones)?;
        let morphs = self.read_morphs(vertices.len())?;

        let mut body = Body {
            name,
            comment,
            vertices,
            indices,
            materials,
            bones,
            chains,
            morphs,
        };
        let trailer = self.read_trailer(&mut body)?;

        if !self.reader.is_empty() {
            self.sink.debug(&format!(
                "{} trailing bytes after PMD data ignored",
                self.reader.remaining()
            ));
        }

        self.assemble(body, trailer)
    }

    // ========================================
    // 必需段
    // ========================================

    fn read_header(&mut self) -> Result<(String, String), DecodeError> {
        self.reader.section("header");
        let magic = self.reader.read_bytes(PMD_MAGIC.len())?;
        if magic != PMD_MAGIC {
            return Err(DecodeError::BadMagic);
        }
        let version = self.reader.read_f32()?;
        if version != PMD_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let name = self.reader.read_fixed_string(NAME_LEN)?;
        let comment = self.reader.read_fixed_string(COMMENT_LEN)?;
        Ok((name, comment))
    }

    fn read_vertices(&mut self) -> Result<Vec<Vertex>, DecodeError> {
        self.reader.section("vertices");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, VERTEX_STRIDE)?;

        let mut vertices = Vec::with_capacity(count);
        for _ in 0..count {
            let position = self.reader.read_vec3()?;
            let normal = self.reader.read_vec3()?;
            let uv = self.reader.read_vec2()?;
            let bones = [self.reader.read_u16()?, self.reader.read_u16()?];
            let weight = self.reader.read_u8()? as f32 / 100.0;
            let edge_suppressed = self.reader.read_u8()? != 0;
            vertices.push(Vertex {
                position: self.convert_position(position),
                normal: self.convert_position(normal),
                uv,
                bones,
                weight,
                edge_suppressed,
            });
        }
        Ok(vertices)
    }

    fn read_indices(&mut self, vertex_count: usize) -> Result<Vec<u32>, DecodeError> {
        self.reader.section("indices");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, 2)?;

        let mut indices = Vec::with_capacity(count);
        for _ in 0..count {
            indices.push(self.reader.read_u16()? as u32);
        }

        if count % 3 != 0 {
            self.sink
                .warn(&format!("index count {} is not a multiple of 3", count));
        }
        if let Some(bad) = indices.iter().find(|&&i| i as usize >= vertex_count) {
            self.sink
                .warn(&format!("index {} exceeds vertex count {}", bad, vertex_count));
        }

        if self.options.convert_handedness {
            for triangle in indices.chunks_exact_mut(3) {
                triangle.swap(1, 2);
            }
        }
        Ok(indices)
    }

    fn read_materials(&mut self) -> Result<Vec<Material>, DecodeError> {
        self.reader.section("materials");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, MATERIAL_STRIDE)?;

        let mut materials = Vec::with_capacity(count);
        for _ in 0..count {
            let diffuse = self.reader.read_vec3()?;
            let alpha = self.reader.read_f32()?;
            let shininess = self.reader.read_f32()?;
            let specular = self.reader.read_vec3()?;
            let ambient = self.reader.read_vec3()?;
            let toon = self.reader.read_u8()?;
            let edge = self.reader.read_u8()? != 0;
            let index_count = self.reader.read_u32()?;
            let texture_field = self.reader.read_fixed_string(NAME_LEN)?;
            let (texture, sphere_map) = split_texture_name(&texture_field);

            materials.push(Material {
                diffuse: Vec4::new(diffuse.x, diffuse.y, diffuse.z, alpha),
                shininess,
                specular,
                ambient,
                toon_index: if toon == 0xFF { None } else { Some(toon) },
                edge,
                index_count,
                texture,
                sphere_map,
            });
        }
        Ok(materials)
    }

    fn read_bones(&mut self) -> Result<Vec<BoneDef>, DecodeError> {
        self.reader.section("bones");
        let count = self.reader.read_u16()? as usize;
        self.reader.ensure_records(count, BONE_STRIDE)?;

        let mut bones = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.reader.read_fixed_string(NAME_LEN)?;
            let parent = self.reader.read_u16()?;
            let tail = self.reader.read_u16()?;
            let kind_id = self.reader.read_u8()?;
            let ik_field = self.reader.read_u16()?;
            let position = self.reader.read_vec3()?;

            let kind = BoneKind::from_id(kind_id).unwrap_or_else(|| {
                self.sink
                    .warn(&format!("bone '{}' has unknown type {}", name, kind_id));
                BoneKind::Unknown
            });

            bones.push(BoneDef {
                name,
                english_name: None,
                parent: if parent == NO_BONE { None } else { Some(parent as usize) },
                tail: if tail == NO_BONE || tail == 0 { None } else { Some(tail as usize) },
                kind,
                ik_field,
                position: self.convert_position(position),
            });
        }
        Ok(bones)
    }

    fn read_ik_chains(&mut self, bones: &[BoneDef]) -> Result<Vec<IkChain>, DecodeError> {
        self.reader.section("ik");
        let count = self.reader.read_u16()? as usize;
        // 每条链至少 11 字节
        self.reader.ensure_records(count, 11)?;

        let mut chains = Vec::with_capacity(count);
        for _ in 0..count {
            let target_bone = self.reader.read_u16()? as usize;
            let effector_bone = self.reader.read_u16()? as usize;
            let link_count = self.reader.read_u8()? as usize;
            let iterations = self.reader.read_u16()? as u32;
            let limit = self.reader.read_f32()?;
            self.reader.ensure_records(link_count, 2)?;

            let mut links = Vec::with_capacity(link_count);
            for _ in 0..link_count {
                let bone_index = self.reader.read_u16()? as usize;
                links.push(self.make_ik_link(bone_index, bones));
            }

            chains.push(IkChain {
                target_bone,
                effector_bone,
                iterations,
                limit_angle: limit * PI,
                links,
            });
        }
        Ok(chains)
    }

    /// 名称含「ひざ」的链接只绕 X 轴旋转（旧格式没有显式轴信息）
    fn make_ik_link(&self, bone_index: usize, bones: &[BoneDef]) -> IkLink {
        let is_knee = bones
            .get(bone_index)
            .map(|b| b.name.contains(KNEE_NAME))
            .unwrap_or(false);
        if !is_knee {
            return IkLink::free(bone_index);
        }
        if self.options.convert_handedness {
            IkLink::hinge_x(bone_index, -PI, -KNEE_MIN_ANGLE)
        } else {
            IkLink::hinge_x(bone_index, KNEE_MIN_ANGLE, PI)
        }
    }

    fn read_morphs(&mut self, vertex_count: usize) -> Result<Vec<Morph>, DecodeError> {
        self.reader.section("morphs");
        let count = self.reader.read_u16()? as usize;
        // 每个 Morph 至少 25 字节
        self.reader.ensure_records(count, NAME_LEN + 5)?;

        let mut morphs: Vec<Morph> = Vec::with_capacity(count);
        for i in 0..count {
            let name = self.reader.read_fixed_string(NAME_LEN)?;
            let vertex_total = self.reader.read_u32()? as usize;
            let category = MorphCategory::from_id(self.reader.read_u8()?);
            self.reader.ensure_records(vertex_total, MORPH_VERTEX_STRIDE)?;

            if i == 0 && category != MorphCategory::Base {
                return Err(DecodeError::MissingRequiredSection("base morph"));
            }
            if i > 0 && category == MorphCategory::Base {
                return Err(DecodeError::InvalidData(format!(
                    "morph '{}' is a second base morph",
                    name
                )));
            }

            let mut morph = Morph::new(name, category);
            morph.vertex_offsets.reserve(vertex_total);
            for _ in 0..vertex_total {
                let vertex_index = self.reader.read_u32()?;
                let offset = self.reader.read_vec3()?;
                let offset = self.convert_position(offset);
                morph.vertex_offsets.push(VertexMorphOffset {
                    vertex_index,
                    offset,
                });
            }
            morphs.push(morph);
        }

        self.resolve_morph_indices(&mut morphs, vertex_count);
        Ok(morphs)
    }

    /// 非基础 Morph 的索引指向基础 Morph 的顶点列表，转换为绝对顶点索引
    ///
    /// 先按未过滤的基础列表解析，再丢弃越界的基础项，否则后续槽位会错位。
    fn resolve_morph_indices(&self, morphs: &mut [Morph], vertex_count: usize) {
        let Some((base, rest)) = morphs.split_first_mut() else {
            return;
        };
        let in_range = |index: u32| (index as usize) < vertex_count;

        for morph in rest {
            let before = morph.vertex_offsets.len();
            morph.vertex_offsets = morph
                .vertex_offsets
                .iter()
                .filter_map(|o| {
                    base.vertex_offsets
                        .get(o.vertex_index as usize)
                        .filter(|b| in_range(b.vertex_index))
                        .map(|b| VertexMorphOffset {
                            vertex_index: b.vertex_index,
                            offset: o.offset,
                        })
                })
                .collect();
            if morph.vertex_offsets.len() != before {
                self.sink.warn(&format!(
                    "morph '{}': {} base-relative indices out of range dropped",
                    morph.name,
                    before - morph.vertex_offsets.len()
                ));
            }
        }

        let before = base.vertex_offsets.len();
        base.vertex_offsets.retain(|o| in_range(o.vertex_index));
        if base.vertex_offsets.len() != before {
            self.sink.warn(&format!(
                "base morph: {} vertices out of range dropped",
                before - base.vertex_offsets.len()
            ));
        }
    }

    // ========================================
    // 可选尾部
    // ========================================

    fn read_trailer(&mut self, body: &mut Body) -> Result<Trailer, DecodeError> {
        let mut trailer = Trailer::default();
        if self.reader.is_empty() {
            return Ok(trailer);
        }

        self.read_display_lists(body, &mut trailer)?;
        if self.reader.is_empty() {
            return Ok(trailer);
        }

        self.read_english(body, &mut trailer)?;
        if self.reader.is_empty() {
            return Ok(trailer);
        }

        self.reader.section("toon textures");
        self.reader.ensure(TOON_COUNT * TOON_NAME_LEN)?;
        for _ in 0..TOON_COUNT {
            trailer
                .toon_textures
                .push(self.reader.read_fixed_string(TOON_NAME_LEN)?);
        }
        if self.reader.is_empty() {
            return Ok(trailer);
        }

        trailer.rigid_bodies = self.read_rigid_bodies(body.bones.len())?;
        if self.reader.is_empty() {
            return Ok(trailer);
        }

        trailer.constraints = self.read_constraints(trailer.rigid_bodies.len())?;
        Ok(trailer)
    }

    fn read_display_lists(&mut self, body: &Body, trailer: &mut Trailer) -> Result<(), DecodeError> {
        self.reader.section("morph display list");
        let count = self.reader.read_u8()? as usize;
        self.reader.ensure_records(count, 2)?;
        for _ in 0..count {
            let index = self.reader.read_u16()? as usize;
            if index < body.morphs.len() {
                trailer.morph_display.push(index);
            }
        }

        self.reader.section("bone group names");
        let count = self.reader.read_u8()? as usize;
        self.reader.ensure_records(count, GROUP_NAME_LEN)?;
        for _ in 0..count {
            let name = self.reader.read_fixed_string(GROUP_NAME_LEN)?;
            trailer.bone_groups.push(BoneGroup {
                name: name.trim_end_matches(['\r', '\n']).to_string(),
                ..BoneGroup::default()
            });
        }

        self.reader.section("bone display list");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, 3)?;
        for _ in 0..count {
            let bone = self.reader.read_u16()? as usize;
            let group = self.reader.read_u8()? as usize;
            // 分组编号从 1 开始
            match trailer.bone_groups.get_mut(group.wrapping_sub(1)) {
                Some(g) if bone < body.bones.len() => g.bones.push(bone),
                _ => self.sink.debug(&format!(
                    "bone display entry ({}, {}) out of range",
                    bone, group
                )),
            }
        }
        Ok(())
    }

    fn read_english(&mut self, body: &mut Body, trailer: &mut Trailer) -> Result<(), DecodeError> {
        self.reader.section("english names");
        let flag = self.reader.read_u8()?;
        if flag == 0 {
            return Ok(());
        }

        let morph_names = body.morphs.len().saturating_sub(1);
        let total = NAME_LEN
            + COMMENT_LEN
            + NAME_LEN * body.bones.len()
            + NAME_LEN * morph_names
            + GROUP_NAME_LEN * trailer.bone_groups.len();
        self.reader.ensure(total)?;

        trailer.english_name = Some(self.reader.read_fixed_string(NAME_LEN)?);
        trailer.english_comment = Some(self.reader.read_fixed_string(COMMENT_LEN)?);
        for bone in &mut body.bones {
            bone.english_name = Some(self.reader.read_fixed_string(NAME_LEN)?);
        }
        for morph in body.morphs.iter_mut().skip(1) {
            morph.english_name = Some(self.reader.read_fixed_string(NAME_LEN)?);
        }
        for group in &mut trailer.bone_groups {
            group.english_name = Some(self.reader.read_fixed_string(GROUP_NAME_LEN)?);
        }
        Ok(())
    }

    fn read_rigid_bodies(&mut self, bone_count: usize) -> Result<Vec<RigidBodyDef>, DecodeError> {
        self.reader.section("rigid bodies");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, RIGID_BODY_STRIDE)?;

        let mut bodies = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.reader.read_fixed_string(NAME_LEN)?;
            let bone = self.reader.read_u16()?;
            let group = self.reader.read_u8()?;
            let group_mask = self.reader.read_u16()?;
            let shape = RigidBodyShape::try_from(self.reader.read_u8()?)?;
            let size = self.reader.read_vec3()?;
            let position = self.reader.read_vec3()?;
            let rotation = self.reader.read_vec3()?;
            let mass = self.reader.read_f32()?;
            let linear_damping = self.reader.read_f32()?;
            let angular_damping = self.reader.read_f32()?;
            let restitution = self.reader.read_f32()?;
            let friction = self.reader.read_f32()?;
            let mode = PhysicsMode::try_from(self.reader.read_u8()?)?;

            let bone_index = if bone == NO_BONE || bone as usize >= bone_count {
                None
            } else {
                Some(bone as usize)
            };

            bodies.push(RigidBodyDef {
                name,
                bone_index,
                group,
                group_mask,
                shape,
                size,
                position: self.convert_position(position),
                rotation: self.convert_euler(rotation),
                mass,
                linear_damping,
                angular_damping,
                restitution,
                friction,
                mode,
            });
        }
        Ok(bodies)
    }

    fn read_constraints(&mut self, body_count: usize) -> Result<Vec<ConstraintDef>, DecodeError> {
        self.reader.section("constraints");
        let count = self.reader.read_u32()? as usize;
        self.reader.ensure_records(count, CONSTRAINT_STRIDE)?;

        let mut constraints = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.reader.read_fixed_string(NAME_LEN)?;
            let rigid_body_a = self.reader.read_u32()? as usize;
            let rigid_body_b = self.reader.read_u32()? as usize;
            let position = self.reader.read_vec3()?;
            let rotation = self.reader.read_vec3()?;
            let position_min = self.reader.read_vec3()?;
            let position_max = self.reader.read_vec3()?;
            let rotation_min = self.reader.read_vec3()?;
            let rotation_max = self.reader.read_vec3()?;
            let position_spring = self.reader.read_vec3()?;
            let rotation_spring = self.reader.read_vec3()?;

            if rigid_body_a >= body_count || rigid_body_b >= body_count {
                self.sink.warn(&format!(
                    "constraint '{}' references missing rigid bodies, dropped",
                    name
                ));
                continue;
            }

            let (position_min, position_max) = self.convert_position_range(position_min, position_max);
            let (rotation_min, rotation_max) = self.convert_euler_range(rotation_min, rotation_max);
            constraints.push(ConstraintDef {
                name,
                rigid_body_a,
                rigid_body_b,
                position: self.convert_position(position),
                rotation: self.convert_euler(rotation),
                position_min,
                position_max,
                rotation_min,
                rotation_max,
                position_spring,
                rotation_spring,
            });
        }
        Ok(constraints)
    }

    // ========================================
    // 组装
    // ========================================

    fn assemble(&self, body: Body, trailer: Trailer) -> Result<ModelData, DecodeError> {
        let mut skeleton = BoneSet::build(body.bones, body.chains, self.sink)?;

        let simulated: Vec<usize> = trailer
            .rigid_bodies
            .iter()
            .filter(|rb| rb.mode.is_dynamic())
            .filter_map(|rb| rb.bone_index)
            .collect();
        skeleton.mark_simulated(&simulated);

        let morphs = MorphManager::from_morphs(body.morphs, self.sink);

        self.sink.info(&format!(
            "PMD '{}' decoded: {} vertices, {} bones, {} IK chains, {} morphs, {} rigid bodies ({} simulated bones)",
            body.name,
            body.vertices.len(),
            skeleton.bone_count(),
            skeleton.ik_solvers().len(),
            morphs.morph_count(),
            trailer.rigid_bodies.len(),
            simulated.len(),
        ));

        Ok(ModelData {
            name: body.name,
            comment: body.comment,
            english_name: trailer.english_name,
            english_comment: trailer.english_comment,
            vertices: body.vertices,
            indices: body.indices,
            materials: body.materials,
            skeleton,
            morphs,
            morph_display: trailer.morph_display,
            bone_groups: trailer.bone_groups,
            toon_textures: trailer.toon_textures,
            rigid_bodies: trailer.rigid_bodies,
            constraints: trailer.constraints,
        })
    }

    // ========================================
    // 坐标系转换
    // ========================================

    #[inline]
    fn convert_position(&self, v: Vec3) -> Vec3 {
        if self.options.convert_handedness {
            flip_position(v)
        } else {
            v
        }
    }

    #[inline]
    fn convert_euler(&self, v: Vec3) -> Vec3 {
        if self.options.convert_handedness {
            flip_euler(v)
        } else {
            v
        }
    }

    /// 翻转后 Z 分量的上下限互换并取反
    fn convert_position_range(&self, min: Vec3, max: Vec3) -> (Vec3, Vec3) {
        if !self.options.convert_handedness {
            return (min, max);
        }
        (
            Vec3::new(min.x, min.y, -max.z),
            Vec3::new(max.x, max.y, -min.z),
        )
    }

    /// 翻转后 X / Y 分量的上下限互换并取反
    fn convert_euler_range(&self, min: Vec3, max: Vec3) -> (Vec3, Vec3) {
        if !self.options.convert_handedness {
            return (min, max);
        }
        (
            Vec3::new(-max.x, -max.y, min.z),
            Vec3::new(-min.x, -min.y, max.z),
        )
    }
}

/// 拆分「主纹理*球面贴图」
fn split_texture_name(field: &str) -> (Option<String>, Option<SphereMap>) {
    let sphere = |name: &str| -> Option<SphereMap> {
        let lower = name.to_ascii_lowercase();
        let mode = if lower.ends_with(".spa") {
            SphereMode::Add
        } else if lower.ends_with(".sph") {
            SphereMode::Multiply
        } else {
            return None;
        };
        Some(SphereMap {
            name: name.to_string(),
            mode,
        })
    };
    let non_empty = |s: &str| if s.is_empty() { None } else { Some(s.to_string()) };

    match field.split_once('*') {
        Some((primary, secondary)) => {
            let sphere_map = sphere(secondary).or_else(|| {
                non_empty(secondary).map(|name| SphereMap {
                    name,
                    mode: SphereMode::Multiply,
                })
            });
            (non_empty(primary), sphere_map)
        }
        None => match sphere(field) {
            Some(s) => (None, Some(s)),
            None => (non_empty(field), None),
        },
    }
}

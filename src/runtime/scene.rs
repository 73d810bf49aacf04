//! 场景：模型的加载、卸载与统一步进

use std::sync::Arc;

use super::{ModelInstance, ModelLoader};
use crate::animation::{Motion, MotionEvent, VmdFile};
use crate::arena::{Arena, Handle};
use crate::config::EngineConfig;
use crate::logging::LogSink;
use crate::model::{decode_pmd, DecodeOptions};
use crate::physics::PhysicsBridge;
use crate::{MmdError, Result};

pub type ModelHandle = Handle<ModelInstance>;

pub struct Scene {
    models: Arena<ModelInstance>,
    config: EngineConfig,
    sink: Arc<dyn LogSink>,
}

impl Scene {
    pub fn new(config: EngineConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            models: Arena::new(),
            config,
            sink,
        }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 加载并注册模型
    ///
    /// 解码失败时释放资源，不注册任何东西。纹理读取失败只记警告。
    pub fn load_model(
        &mut self,
        loader: &mut dyn ModelLoader,
        name: &str,
        physics: Option<Box<dyn PhysicsBridge>>,
    ) -> Result<ModelHandle> {
        let bytes = loader.load(name)?;
        let options = DecodeOptions::from(&self.config);
        let data = match decode_pmd(&bytes, &options, self.sink.as_ref()) {
            Ok(data) => data,
            Err(e) => {
                self.sink.warn(&format!("failed to decode model '{}': {}", name, e));
                loader.unload(name);
                return Err(e.into());
            }
        };

        for texture in data.texture_names() {
            if let Err(e) = loader.fetch_texture(&texture) {
                self.sink.warn(&format!("texture '{}' of '{}' unavailable: {}", texture, name, e));
            }
        }

        let mut instance = ModelInstance::new(name, data, &self.config, self.sink.clone());
        if let Some(bridge) = physics {
            if let Err(e) = instance.attach_physics(bridge) {
                loader.unload(name);
                return Err(e);
            }
        }

        let handle = self.models.insert(instance);
        self.sink.info(&format!("model '{}' registered", name));
        Ok(handle)
    }

    /// 加载动作（可被多个模型共享）
    pub fn load_motion(&self, loader: &mut dyn ModelLoader, name: &str) -> Result<Arc<Motion>> {
        let bytes = loader.load(name)?;
        let options = DecodeOptions::from(&self.config);
        let file = VmdFile::decode(&bytes, &options, self.sink.as_ref())?;
        if file.motion.is_empty() {
            self.sink.warn(&format!("motion '{}' has no keyframes", name));
        }
        Ok(Arc::new(file.motion))
    }

    /// 卸载模型：删除动作，离开物理世界，释放资源
    pub fn unload_model(&mut self, loader: &mut dyn ModelLoader, handle: ModelHandle) -> Result<Vec<MotionEvent>> {
        let mut instance = self.models.remove(handle).ok_or(MmdError::StaleHandle)?;
        let events = instance.detach();
        loader.unload(instance.name());
        self.sink.info(&format!("model '{}' unloaded", instance.name()));
        Ok(events)
    }

    pub fn get(&self, handle: ModelHandle) -> Option<&ModelInstance> {
        self.models.get(handle)
    }

    pub fn get_mut(&mut self, handle: ModelHandle) -> Option<&mut ModelInstance> {
        self.models.get_mut(handle)
    }

    pub fn models(&self) -> impl Iterator<Item = (ModelHandle, &ModelInstance)> {
        self.models.iter()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.models.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// 所有模型按注册顺序前进 `delta_frames` 帧
    pub fn update(&mut self, delta_frames: f32) {
        for (_, instance) in self.models.iter_mut() {
            instance.update(delta_frames);
        }
    }
}

//! 资源加载接口

use std::collections::{HashMap, HashSet};

use crate::{MmdError, Result};

/// 外部资源加载器：按名称取字节，显式加载 / 卸载
pub trait ModelLoader {
    /// 读取模型或动作文件
    fn load(&mut self, name: &str) -> Result<Vec<u8>>;

    /// 读取纹理（绑定由渲染层负责）
    fn fetch_texture(&mut self, name: &str) -> Result<Vec<u8>>;

    /// 释放与 `name` 相关的资源
    fn unload(&mut self, name: &str);
}

/// 内存中的加载器
#[derive(Debug, Default)]
pub struct MemoryLoader {
    files: HashMap<String, Vec<u8>>,
    loaded: HashSet<String>,
    fetched_textures: Vec<String>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, bytes: Vec<u8>) {
        self.files.insert(name.into(), bytes);
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains(name)
    }

    pub fn fetched_textures(&self) -> &[String] {
        &self.fetched_textures
    }
}

impl ModelLoader for MemoryLoader {
    fn load(&mut self, name: &str) -> Result<Vec<u8>> {
        let bytes = self
            .files
            .get(name)
            .cloned()
            .ok_or_else(|| MmdError::Asset(format!("'{}' not found", name)))?;
        self.loaded.insert(name.to_string());
        Ok(bytes)
    }

    fn fetch_texture(&mut self, name: &str) -> Result<Vec<u8>> {
        self.fetched_textures.push(name.to_string());
        self.files
            .get(name)
            .cloned()
            .ok_or_else(|| MmdError::Asset(format!("texture '{}' not found", name)))
    }

    fn unload(&mut self, name: &str) {
        self.loaded.remove(name);
    }
}

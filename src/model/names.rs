//! 名称表
//!
//! 骨骼 / Morph 名在解码时一次性驻留为 `Symbol`，查找走哈希表。
//! 重名时保留第一个（旧版行为），后出现的同名元素只能按索引访问。

use std::collections::HashMap;

/// 驻留字符串 ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

/// 名称 → 元素索引
#[derive(Clone, Debug, Default)]
pub struct NameTable {
    symbols: HashMap<Box<str>, Symbol>,
    names: Vec<Box<str>>,
    index: HashMap<Symbol, usize>,
}

impl NameTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 按顺序构建，返回被忽略的重复项 `(元素索引, 名称)`
    pub fn build<'a, I>(names: I) -> (Self, Vec<(usize, String)>)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut table = Self::new();
        let mut duplicates = Vec::new();
        for (i, name) in names.into_iter().enumerate() {
            if !table.insert(name, i) {
                duplicates.push((i, name.to_string()));
            }
        }
        (table, duplicates)
    }

    /// 驻留名称
    pub fn intern(&mut self, name: &str) -> Symbol {
        if let Some(symbol) = self.symbols.get(name) {
            return *symbol;
        }
        let symbol = Symbol(self.names.len() as u32);
        self.names.push(name.into());
        self.symbols.insert(name.into(), symbol);
        symbol
    }

    /// 插入映射；名称已存在时保留旧值并返回 false
    pub fn insert(&mut self, name: &str, element: usize) -> bool {
        let symbol = self.intern(name);
        if self.index.contains_key(&symbol) {
            return false;
        }
        self.index.insert(symbol, element);
        true
    }

    #[inline]
    pub fn symbol(&self, name: &str) -> Option<Symbol> {
        self.symbols.get(name).copied()
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.symbol(name).and_then(|s| self.index.get(&s).copied())
    }

    #[inline]
    pub fn get_symbol(&self, symbol: Symbol) -> Option<usize> {
        self.index.get(&symbol).copied()
    }

    pub fn resolve(&self, symbol: Symbol) -> Option<&str> {
        self.names.get(symbol.0 as usize).map(|s| &**s)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_names_keep_first() {
        let (table, duplicates) = NameTable::build(["全ての親", "センター", "センター", "首"]);
        assert_eq!(table.get("センター"), Some(1));
        assert_eq!(table.get("首"), Some(3));
        assert_eq!(duplicates, vec![(2, "センター".to_string())]);
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn symbols_are_stable() {
        let mut table = NameTable::new();
        let a = table.intern("あ");
        let b = table.intern("い");
        assert_ne!(a, b);
        assert_eq!(table.intern("あ"), a);
        assert_eq!(table.resolve(b), Some("い"));
        assert_eq!(table.get("あ"), None);
    }
}

//! 解码器注册表.
//!
//! 管理所有已注册的标签解码器, 按格式标识查找.

use std::collections::HashMap;

use crate::container_kind::ContainerKind;
use crate::decoder::TagDecoder;

/// 解码器工厂函数类型
pub type DecoderFactory = fn() -> Box<dyn TagDecoder>;

/// 解码器注册表
pub struct DecoderRegistry {
    /// 解码器工厂映射
    decoders: HashMap<ContainerKind, DecoderEntry>,
}

/// 解码器注册条目
struct DecoderEntry {
    /// 解码器名称
    name: &'static str,
    /// 工厂函数
    factory: DecoderFactory,
}

impl DecoderRegistry {
    /// 创建空的注册表
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// 创建注册了全部内置解码器的注册表
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::decoders::register_all_decoders(&mut registry);
        registry
    }

    /// 注册一个解码器 (同一格式重复注册时后者覆盖前者)
    pub fn register(&mut self, kind: ContainerKind, name: &'static str, factory: DecoderFactory) {
        self.decoders.insert(kind, DecoderEntry { name, factory });
    }

    /// 创建指定格式的解码器实例
    pub fn create(&self, kind: ContainerKind) -> Option<Box<dyn TagDecoder>> {
        self.decoders.get(&kind).map(|entry| (entry.factory)())
    }

    /// 是否注册了指定格式
    pub fn contains(&self, kind: ContainerKind) -> bool {
        self.decoders.contains_key(&kind)
    }

    /// 获取所有已注册的解码器名称 (按格式排序)
    pub fn list_decoders(&self) -> Vec<(ContainerKind, &'static str)> {
        let mut list: Vec<_> = self
            .decoders
            .iter()
            .map(|(kind, entry)| (*kind, entry.name))
            .collect();
        list.sort();
        list
    }
}

impl Default for DecoderRegistry {
    fn default() -> Self {
        Self::with_builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_内置解码器覆盖所有格式() {
        let registry = DecoderRegistry::with_builtin();
        for kind in ContainerKind::ALL {
            assert!(registry.contains(*kind), "缺少 {kind} 的解码器");
        }
        assert!(!registry.contains(ContainerKind::Unknown));
        let riff = registry.create(ContainerKind::Rf64).unwrap();
        assert_eq!(riff.name(), "riff");
    }

    #[test]
    fn test_空注册表() {
        let registry = DecoderRegistry::new();
        assert!(registry.create(ContainerKind::Flac).is_none());
        assert!(registry.list_decoders().is_empty());
    }
}

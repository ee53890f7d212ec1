//! 元数据值模型.
//!
//! 解码结果统一表示为 [`FieldMap`] (字段名 → [`MetadataValue`]) 的嵌套结构,
//! 可直接序列化为 JSON. `FieldMap` 基于 `BTreeMap`, 键顺序确定,
//! 同一输入两次解析的序列化结果逐字节相同.

use std::collections::BTreeMap;

use md5::{Digest, Md5};
use serde::Serialize;

/// 二进制负载的摘要信息 (不保存负载本身)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlobInfo {
    /// 负载长度 (字节)
    pub length: u64,
    /// 负载 MD5 (十六进制小写)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

impl BlobInfo {
    /// 仅记录长度
    pub fn sized(length: u64) -> Self {
        Self { length, md5: None }
    }

    /// 记录长度, 可选计算 MD5
    pub fn from_data(data: &[u8], hash: bool) -> Self {
        Self {
            length: data.len() as u64,
            md5: hash.then(|| md5_hex(data)),
        }
    }
}

/// 计算 MD5 并格式化为十六进制
pub fn md5_hex(data: &[u8]) -> String {
    to_hex(&Md5::digest(data))
}

/// 字节串格式化为十六进制小写
pub fn to_hex(data: &[u8]) -> String {
    hex::encode(data)
}

/// 元数据值
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MetadataValue {
    /// 文本
    Text(String),
    /// 有符号整数
    Integer(i64),
    /// 无符号整数
    Unsigned(u64),
    /// 浮点数
    Float(f64),
    /// 布尔值
    Bool(bool),
    /// 二进制负载摘要
    Bytes(BlobInfo),
    /// 嵌套字段表
    Map(FieldMap),
    /// 列表
    List(Vec<MetadataValue>),
}

impl MetadataValue {
    /// 作为文本
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// 作为 i64 (无符号值需可容纳)
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Unsigned(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// 作为 u64 (有符号值需非负)
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Unsigned(v) => Some(*v),
            Self::Integer(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// 作为 f64 (整数会被转换)
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::Unsigned(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// 作为布尔值
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// 作为嵌套字段表
    pub fn as_map(&self) -> Option<&FieldMap> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// 作为列表
    pub fn as_list(&self) -> Option<&[MetadataValue]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// 作为二进制摘要
    pub fn as_blob(&self) -> Option<&BlobInfo> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// 叶子值数量 (嵌套结构递归计数)
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Map(m) => m.leaf_count(),
            Self::List(l) => l.iter().map(Self::leaf_count).sum(),
            _ => 1,
        }
    }
}

macro_rules! impl_from_value {
    ($variant:ident: $($ty:ty),+) => {
        $(
            impl From<$ty> for MetadataValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v.into())
                }
            }
        )+
    };
}

impl_from_value!(Integer: i8, i16, i32, i64);
impl_from_value!(Unsigned: u8, u16, u32, u64);
impl_from_value!(Float: f32, f64);
impl_from_value!(Text: String, &str);

impl From<usize> for MetadataValue {
    fn from(v: usize) -> Self {
        Self::Unsigned(v as u64)
    }
}

impl From<bool> for MetadataValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<BlobInfo> for MetadataValue {
    fn from(v: BlobInfo) -> Self {
        Self::Bytes(v)
    }
}

impl From<FieldMap> for MetadataValue {
    fn from(v: FieldMap) -> Self {
        Self::Map(v)
    }
}

impl<T: Into<MetadataValue>> From<Vec<T>> for MetadataValue {
    fn from(v: Vec<T>) -> Self {
        Self::List(v.into_iter().map(Into::into).collect())
    }
}

/// 字段表
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldMap {
    entries: BTreeMap<String, MetadataValue>,
}

impl FieldMap {
    /// 创建空字段表
    pub fn new() -> Self {
        Self::default()
    }

    /// 写入字段 (覆盖已有值)
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        self.entries.insert(key.into(), value.into());
    }

    /// 仅当值存在时写入
    pub fn insert_opt<V: Into<MetadataValue>>(&mut self, key: impl Into<String>, value: Option<V>) {
        if let Some(v) = value {
            self.insert(key, v);
        }
    }

    /// 仅当文本非空时写入
    pub fn insert_text(&mut self, key: impl Into<String>, text: impl Into<String>) {
        let text = text.into();
        if !text.is_empty() {
            self.insert(key, text);
        }
    }

    /// 追加字段: 同名字段重复出现时累积为列表
    pub fn push(&mut self, key: impl Into<String>, value: impl Into<MetadataValue>) {
        let key = key.into();
        let value = value.into();
        match self.entries.remove(&key) {
            None => {
                self.entries.insert(key, value);
            }
            Some(MetadataValue::List(mut list)) => {
                list.push(value);
                self.entries.insert(key, MetadataValue::List(list));
            }
            Some(existing) => {
                self.entries
                    .insert(key, MetadataValue::List(vec![existing, value]));
            }
        }
    }

    /// 获取 (不存在则创建) 嵌套字段表
    ///
    /// 若同名字段不是字段表, 会被替换.
    pub fn section(&mut self, key: &str) -> &mut FieldMap {
        let slot = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| MetadataValue::Map(FieldMap::new()));
        if !matches!(slot, MetadataValue::Map(_)) {
            *slot = MetadataValue::Map(FieldMap::new());
        }
        match slot {
            MetadataValue::Map(m) => m,
            _ => unreachable!("上方已确保为 Map"),
        }
    }

    /// 读取字段
    pub fn get(&self, key: &str) -> Option<&MetadataValue> {
        self.entries.get(key)
    }

    /// 按路径读取嵌套字段, 如 `"streaminfo/sample_rate"`
    pub fn get_path(&self, path: &str) -> Option<&MetadataValue> {
        let mut parts = path.split('/');
        let first = parts.next()?;
        let mut value = self.entries.get(first)?;
        for part in parts {
            value = value.as_map()?.get(part)?;
        }
        Some(value)
    }

    /// 读取文本字段
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MetadataValue::as_str)
    }

    /// 读取整数字段
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(MetadataValue::as_i64)
    }

    /// 读取无符号整数字段
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(MetadataValue::as_u64)
    }

    /// 读取浮点字段
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(MetadataValue::as_f64)
    }

    /// 读取布尔字段
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(MetadataValue::as_bool)
    }

    /// 读取嵌套字段表
    pub fn get_map(&self, key: &str) -> Option<&FieldMap> {
        self.get(key).and_then(MetadataValue::as_map)
    }

    /// 读取列表
    pub fn get_list(&self, key: &str) -> Option<&[MetadataValue]> {
        self.get(key).and_then(MetadataValue::as_list)
    }

    /// 是否包含字段
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// 移除字段
    pub fn remove(&mut self, key: &str) -> Option<MetadataValue> {
        self.entries.remove(key)
    }

    /// 顶层字段数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 遍历顶层字段
    pub fn iter(&self) -> impl Iterator<Item = (&String, &MetadataValue)> {
        self.entries.iter()
    }

    /// 顶层字段名
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.keys()
    }

    /// 叶子值数量 (递归)
    pub fn leaf_count(&self) -> usize {
        self.entries.values().map(MetadataValue::leaf_count).sum()
    }

    /// 合并另一字段表 (同名字段以 `other` 为准)
    pub fn extend(&mut self, other: FieldMap) {
        self.entries.extend(other.entries);
    }
}

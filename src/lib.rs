// 该文件是 Jufeng （飓风） 项目的一部分。
// src/lib.rs - 库主文件
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  collections::{HashMap, HashSet},
  path::PathBuf,
};

pub mod catalog;
pub mod input;
pub mod model;
pub mod orchestrator;
pub mod output;
pub mod raster;
pub mod request;
pub mod vector;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}

/// 将提示词或类别名转换为文件名安全的片段
///
/// `"Blue Tarps"` → `"blue_tarps"`，`"碎片堆"` → `"碎片堆"`。
/// 保留 Unicode 字母与数字，连续的其他字符合并为一个下划线。
pub fn slug(text: &str) -> String {
  let mut out = String::with_capacity(text.len());
  let mut pending = false;
  for ch in text.chars() {
    if ch.is_alphanumeric() {
      if pending && !out.is_empty() {
        out.push('_');
      }
      pending = false;
      out.extend(ch.to_lowercase());
    } else {
      pending = true;
    }
  }
  if out.is_empty() {
    out.push_str("unnamed");
  }
  out
}

/// 一次运行内的文件名分配表
///
/// 不同的原始名称即使 [`slug`] 相同也会得到不同的文件名（追加 `_2`、`_3`…），
/// 同一名称重复请求时返回相同结果。分配只取决于请求顺序。
#[derive(Debug, Clone, Default)]
pub struct FileStems {
  by_name: HashMap<String, String>,
  taken: HashSet<String>,
}

impl FileStems {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn stem_for(&mut self, name: &str) -> String {
    if let Some(stem) = self.by_name.get(name) {
      return stem.clone();
    }
    let base = slug(name);
    let mut stem = base.clone();
    let mut n = 2;
    while self.taken.contains(&stem) {
      stem = format!("{}_{}", base, n);
      n += 1;
    }
    self.taken.insert(stem.clone());
    self.by_name.insert(name.to_string(), stem.clone());
    stem
  }
}

/// 取出 URL 中的本地路径，并解码百分号转义
///
/// 非 `file` 方案（`image://`、`exec://`）按同样的路径规则处理，主机部分被忽略。
pub fn url_file_path(url: &url::Url) -> Option<PathBuf> {
  if url.scheme() == "file" {
    return url.to_file_path().ok();
  }
  if !url.path().starts_with('/') {
    return None;
  }
  url::Url::parse(&format!("file://{}", url.path()))
    .ok()?
    .to_file_path()
    .ok()
}

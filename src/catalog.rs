// 该文件是 Jufeng （飓风） 项目的一部分。
// src/catalog.rs - 类别与提示词目录
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

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::request::PromptSpec;

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("目录格式错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("类别 '{0}' 没有任何提示词")]
  EmptyCategory(String),
}

/// 内置的类别开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CategoryToggle {
  DebrisPiles,
  Rubble,
  BlueTarps,
  DamagedVehicles,
  StormDebris,
}

impl CategoryToggle {
  pub const ALL: [CategoryToggle; 5] = [
    CategoryToggle::DebrisPiles,
    CategoryToggle::Rubble,
    CategoryToggle::BlueTarps,
    CategoryToggle::DamagedVehicles,
    CategoryToggle::StormDebris,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      CategoryToggle::DebrisPiles => "Debris Piles",
      CategoryToggle::Rubble => "Rubble",
      CategoryToggle::BlueTarps => "Blue Tarps",
      CategoryToggle::DamagedVehicles => "Damaged Vehicles",
      CategoryToggle::StormDebris => "Storm Debris",
    }
  }

  fn prompts(&self) -> &'static [&'static str] {
    match self {
      CategoryToggle::DebrisPiles => &["pile of debris", "trash pile"],
      CategoryToggle::Rubble => &["rubble", "construction debris"],
      CategoryToggle::BlueTarps => &["blue tarp"],
      CategoryToggle::DamagedVehicles => &["damaged vehicle"],
      CategoryToggle::StormDebris => &[
        "debris pile",
        "storm debris",
        "waste pile",
        "rubble pile",
        "hurricane debris",
        "damaged materials",
      ],
    }
  }

  /// 默认勾选：碎片堆、瓦砾、蓝色防水布
  pub fn default_selection() -> Vec<CategoryToggle> {
    vec![
      CategoryToggle::DebrisPiles,
      CategoryToggle::Rubble,
      CategoryToggle::BlueTarps,
    ]
  }

  /// 忽略大小写、空格与连字符匹配类别名
  pub fn parse(text: &str) -> Option<Self> {
    let key = crate::slug(text);
    Self::ALL
      .into_iter()
      .find(|toggle| crate::slug(toggle.name()) == key)
  }
}

impl AsRef<str> for CategoryToggle {
  fn as_ref(&self) -> &str {
    self.name()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEntry {
  pub name: String,
  pub prompts: Vec<String>,
}

/// 用户可见类别到提示词同义词列表的注册表，按注册顺序展开
#[derive(Debug, Clone, PartialEq)]
pub struct PromptCatalog {
  entries: Vec<CategoryEntry>,
}

impl Default for PromptCatalog {
  fn default() -> Self {
    CategoryToggle::ALL
      .into_iter()
      .fold(PromptCatalog::empty(), |catalog, toggle| {
        catalog.register(toggle.name(), toggle.prompts().iter().copied())
      })
  }
}

impl PromptCatalog {
  pub fn empty() -> Self {
    Self {
      entries: Vec::new(),
    }
  }

  /// 注册类别；已存在的类别追加新的提示词（去重）
  pub fn register<I, S>(mut self, name: &str, prompts: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let idx = match self.entries.iter().position(|e| e.name == name) {
      Some(idx) => idx,
      None => {
        self.entries.push(CategoryEntry {
          name: name.to_string(),
          prompts: Vec::new(),
        });
        self.entries.len() - 1
      }
    };
    let entry = &mut self.entries[idx];
    for prompt in prompts {
      let prompt = prompt.into();
      if !entry.prompts.contains(&prompt) {
        entry.prompts.push(prompt);
      }
    }
    self
  }

  /// 从 JSON 数组 `[{"name": ..., "prompts": [...]}]` 读取目录
  pub fn from_json_file(path: &Path) -> Result<Self, CatalogError> {
    let text = std::fs::read_to_string(path)?;
    Self::from_json_str(&text)
  }

  pub fn from_json_str(text: &str) -> Result<Self, CatalogError> {
    let entries: Vec<CategoryEntry> = serde_json::from_str(text)?;
    let mut catalog = Self::empty();
    for entry in entries {
      if entry.prompts.is_empty() {
        return Err(CatalogError::EmptyCategory(entry.name));
      }
      catalog = catalog.register(&entry.name, entry.prompts);
    }
    debug!("加载提示词目录: {} 个类别", catalog.entries.len());
    Ok(catalog)
  }

  pub fn categories(&self) -> impl Iterator<Item = &str> {
    self.entries.iter().map(|e| e.name.as_str())
  }

  pub fn prompts_for(&self, category: &str) -> Option<&[String]> {
    self
      .entries
      .iter()
      .find(|e| e.name == category)
      .map(|e| e.prompts.as_slice())
  }

  /// 展开勾选的类别；未注册的类别被忽略，输出顺序只取决于注册顺序
  pub fn expand<S: AsRef<str>>(&self, selected: &[S]) -> Vec<PromptSpec> {
    self
      .entries
      .iter()
      .filter(|e| selected.iter().any(|s| s.as_ref() == e.name))
      .flat_map(|e| {
        e.prompts
          .iter()
          .map(|p| PromptSpec::new(p.as_str(), e.name.as_str()))
      })
      .collect()
  }

  /// 原始提示词反查所属类别（首个注册者优先）
  pub fn category_of(&self, prompt: &str) -> Option<&str> {
    self
      .entries
      .iter()
      .find(|e| e.prompts.iter().any(|p| p == prompt))
      .map(|e| e.name.as_str())
  }
}

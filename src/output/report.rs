// 该文件是 Jufeng （飓风） 项目的一部分。
// src/output/report.rs - 检测报告导出
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

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  orchestrator::{CategoryCount, CategoryMask, DetectionReport, PromptResult},
  request::Thresholds,
};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 由数量推导的救援优先级
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PriorityTier {
  None,
  Low,
  Medium,
  High,
}

impl PriorityTier {
  pub fn from_count(count: usize) -> Self {
    match count {
      0 => PriorityTier::None,
      1..=4 => PriorityTier::Low,
      5..=14 => PriorityTier::Medium,
      _ => PriorityTier::High,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      PriorityTier::None => "none",
      PriorityTier::Low => "low",
      PriorityTier::Medium => "medium",
      PriorityTier::High => "high",
    }
  }
}

#[derive(Serialize)]
struct CategoryRow<'a> {
  #[serde(flatten)]
  count: &'a CategoryCount,
  priority: PriorityTier,
}

#[derive(Serialize)]
struct ReportDocument<'a> {
  generated_at: DateTime<Utc>,
  thresholds: Option<Thresholds>,
  total: usize,
  priority: PriorityTier,
  cancelled: bool,
  categories: Vec<CategoryRow<'a>>,
  prompts: &'a [PromptResult],
  annotated: Option<&'a Path>,
  category_masks: &'a [CategoryMask],
}

fn quote(field: &str) -> String {
  if field.contains([',', '"', '\n']) {
    format!("\"{}\"", field.replace('"', "\"\""))
  } else {
    field.to_string()
  }
}

fn prepare(path: &Path) -> Result<(), ReportError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  Ok(())
}

impl DetectionReport {
  pub fn to_csv(&self) -> String {
    let mut records = vec!["category,count,priority".to_string()];
    for c in self.categories() {
      records.push(format!(
        "{},{},{}",
        quote(&c.category),
        c.count,
        PriorityTier::from_count(c.count).as_str()
      ));
    }
    records.push(format!(
      "Total,{},{}",
      self.total(),
      PriorityTier::from_count(self.total()).as_str()
    ));
    records.join("\n") + "\n"
  }

  pub fn write_csv(&self, path: &Path) -> Result<PathBuf, ReportError> {
    prepare(path)?;
    std::fs::write(path, self.to_csv())?;
    info!("保存 CSV 报告到: {}", path.display());
    Ok(path.to_path_buf())
  }

  /// 包含每个提示词结果（含失败原因）的完整审计记录
  pub fn to_json(&self) -> Result<String, ReportError> {
    let document = ReportDocument {
      generated_at: self.generated_at(),
      thresholds: self.thresholds(),
      total: self.total(),
      priority: PriorityTier::from_count(self.total()),
      cancelled: self.is_cancelled(),
      categories: self
        .categories()
        .iter()
        .map(|count| CategoryRow {
          count,
          priority: PriorityTier::from_count(count.count),
        })
        .collect(),
      prompts: self.prompts(),
      annotated: self.annotated(),
      category_masks: self.category_masks(),
    };
    Ok(serde_json::to_string_pretty(&document)?)
  }

  pub fn write_json(&self, path: &Path) -> Result<PathBuf, ReportError> {
    prepare(path)?;
    std::fs::write(path, self.to_json()?)?;
    info!("保存 JSON 报告到: {}", path.display());
    Ok(path.to_path_buf())
  }
}

// 该文件是 Jufeng （飓风） 项目的一部分。
// src/request.rs - 检测请求与置信度阈值
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

use serde::Serialize;
use thiserror::Error;

use crate::{catalog::PromptCatalog, raster::ImageRef};

/// 原始流程调优得到的灵敏度，两个阈值共用
pub const DEFAULT_SENSITIVITY: f32 = 0.24;

#[derive(Error, Debug, PartialEq)]
pub enum RequestError {
  #[error("框置信度阈值必须在 (0, 1] 区间内, 实际为 {0}")]
  BoxThresholdOutOfRange(f32),
  #[error("文本置信度阈值必须在 (0, 1] 区间内, 实际为 {0}")]
  TextThresholdOutOfRange(f32),
}

fn in_range(value: f32) -> bool {
  value > 0.0 && value <= 1.0
}

/// 已校验的阈值对，原样传给分割能力
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Thresholds {
  box_threshold: f32,
  text_threshold: f32,
}

impl Thresholds {
  pub fn new(box_threshold: f32, text_threshold: f32) -> Result<Self, RequestError> {
    if !in_range(box_threshold) {
      return Err(RequestError::BoxThresholdOutOfRange(box_threshold));
    }
    if !in_range(text_threshold) {
      return Err(RequestError::TextThresholdOutOfRange(text_threshold));
    }
    Ok(Self {
      box_threshold,
      text_threshold,
    })
  }

  pub fn from_sensitivity(sensitivity: f32) -> Result<Self, RequestError> {
    Self::new(sensitivity, sensitivity)
  }

  pub fn box_threshold(&self) -> f32 {
    self.box_threshold
  }

  pub fn text_threshold(&self) -> f32 {
    self.text_threshold
  }
}

/// 一条待执行的提示词及其所属类别
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PromptSpec {
  pub prompt: String,
  pub category: String,
}

impl PromptSpec {
  pub fn new(prompt: impl Into<String>, category: impl Into<String>) -> Self {
    Self {
      prompt: prompt.into(),
      category: category.into(),
    }
  }
}

/// 提交后不可变的检测请求
#[derive(Debug, Clone)]
pub struct DetectionRequest {
  image: ImageRef,
  prompts: Vec<PromptSpec>,
  thresholds: Thresholds,
}

impl DetectionRequest {
  pub fn new(
    image: ImageRef,
    prompts: Vec<PromptSpec>,
    box_threshold: f32,
    text_threshold: f32,
  ) -> Result<Self, RequestError> {
    let thresholds = Thresholds::new(box_threshold, text_threshold)?;
    Ok(Self::with_thresholds(image, prompts, thresholds))
  }

  pub fn with_thresholds(image: ImageRef, prompts: Vec<PromptSpec>, thresholds: Thresholds) -> Self {
    Self {
      image,
      prompts,
      thresholds,
    }
  }

  /// 通过提示词目录展开用户勾选的类别
  pub fn from_selection<S: AsRef<str>>(
    image: ImageRef,
    catalog: &PromptCatalog,
    selected: &[S],
    thresholds: Thresholds,
  ) -> Self {
    Self::with_thresholds(image, catalog.expand(selected), thresholds)
  }

  pub fn image(&self) -> &ImageRef {
    &self.image
  }

  pub fn prompts(&self) -> &[PromptSpec] {
    &self.prompts
  }

  pub fn thresholds(&self) -> Thresholds {
    self.thresholds
  }
}

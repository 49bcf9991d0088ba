// 该文件是 Jufeng （飓风） 项目的一部分。
// src/orchestrator.rs - 逐提示词检测编排
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
  fmt::Display,
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  FileStems,
  catalog::PromptCatalog,
  model::{ModelHandle, Segmentation, Segmenter, SegmenterLoader},
  output::{Annotation, Render},
  raster::{BinaryMask, ImageRef},
  request::{DetectionRequest, PromptSpec, Thresholds},
};

/// 只有模型初始化失败会中止一次运行
#[derive(Error, Debug)]
pub enum OrchestratorError {
  #[error("分割模型初始化失败: {0}")]
  ModelInit(#[source] Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PromptOutcome {
  /// 找到至少一个区域
  Detected,
  /// 正常执行但没有匹配
  Empty,
  /// 调用失败，计数按 0 处理
  Failed { error: String },
}

/// 单个提示词的执行结果，创建后不再修改
#[derive(Debug, Clone, Serialize)]
pub struct PromptResult {
  pub category: String,
  pub prompt: String,
  pub count: usize,
  #[serde(skip)]
  pub mask: Option<BinaryMask>,
  pub boxes: Option<Vec<[f32; 4]>>,
  pub outcome: PromptOutcome,
  pub elapsed_ms: u64,
}

impl PromptResult {
  pub fn succeeded(spec: &PromptSpec, segmentation: Segmentation, elapsed: Duration) -> Self {
    let count = segmentation.count();
    let (outcome, mask, boxes) = if count == 0 {
      (PromptOutcome::Empty, None, None)
    } else {
      let boxes = segmentation.boxes();
      (PromptOutcome::Detected, segmentation.mask, Some(boxes))
    };
    Self {
      category: spec.category.clone(),
      prompt: spec.prompt.clone(),
      count,
      mask,
      boxes,
      outcome,
      elapsed_ms: elapsed.as_millis() as u64,
    }
  }

  pub fn failed(spec: &PromptSpec, error: impl Display, elapsed: Duration) -> Self {
    Self {
      category: spec.category.clone(),
      prompt: spec.prompt.clone(),
      count: 0,
      mask: None,
      boxes: None,
      outcome: PromptOutcome::Failed {
        error: error.to_string(),
      },
      elapsed_ms: elapsed.as_millis() as u64,
    }
  }

  pub fn is_failed(&self) -> bool {
    matches!(self.outcome, PromptOutcome::Failed { .. })
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCount {
  pub category: String,
  pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryMask {
  pub category: String,
  pub path: PathBuf,
}

/// 一次运行的汇总，随每个提示词结果增量更新
#[derive(Debug, Clone)]
pub struct DetectionReport {
  categories: Vec<CategoryCount>,
  prompts: Vec<PromptResult>,
  annotated: Option<PathBuf>,
  category_masks: Vec<CategoryMask>,
  thresholds: Option<Thresholds>,
  cancelled: bool,
  generated_at: DateTime<Utc>,
}

impl Default for DetectionReport {
  fn default() -> Self {
    Self {
      categories: Vec::new(),
      prompts: Vec::new(),
      annotated: None,
      category_masks: Vec::new(),
      thresholds: None,
      cancelled: false,
      generated_at: Utc::now(),
    }
  }
}

impl DetectionReport {
  pub fn new(thresholds: Thresholds) -> Self {
    Self {
      thresholds: Some(thresholds),
      ..Self::default()
    }
  }

  /// 累加到类别计数；同一类别的多个提示词相加而不是覆盖
  pub fn record(&mut self, result: PromptResult) {
    match self
      .categories
      .iter_mut()
      .find(|c| c.category == result.category)
    {
      Some(entry) => entry.count += result.count,
      None => self.categories.push(CategoryCount {
        category: result.category.clone(),
        count: result.count,
      }),
    }
    self.prompts.push(result);
  }

  pub fn total(&self) -> usize {
    self.categories.iter().map(|c| c.count).sum()
  }

  /// 缺失的类别按 0 计
  pub fn count(&self, category: &str) -> usize {
    self
      .categories
      .iter()
      .find(|c| c.category == category)
      .map(|c| c.count)
      .unwrap_or(0)
  }

  pub fn categories(&self) -> &[CategoryCount] {
    &self.categories
  }

  pub fn prompts(&self) -> &[PromptResult] {
    &self.prompts
  }

  pub fn failures(&self) -> impl Iterator<Item = &PromptResult> {
    self.prompts.iter().filter(|p| p.is_failed())
  }

  pub fn annotated(&self) -> Option<&Path> {
    self.annotated.as_deref()
  }

  pub fn category_masks(&self) -> &[CategoryMask] {
    &self.category_masks
  }

  pub fn thresholds(&self) -> Option<Thresholds> {
    self.thresholds
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled
  }

  pub fn generated_at(&self) -> DateTime<Utc> {
    self.generated_at
  }

  /// 所有提示词找到的掩膜与框的并集，用于生成合并标注图
  pub fn annotations(&self) -> Vec<Annotation> {
    let mut annotations = Vec::new();
    for result in &self.prompts {
      if let Some(mask) = &result.mask {
        annotations.push(Annotation::mask(mask.clone(), result.category.as_str()));
      }
      for bbox in result.boxes.iter().flatten() {
        annotations.push(Annotation::bbox(*bbox, result.category.as_str()));
      }
    }
    annotations
  }

  /// 按类别合并掩膜；没有任何掩膜的类别不会出现
  pub fn category_union_masks(&self) -> Vec<(String, BinaryMask)> {
    let mut merged: Vec<(String, BinaryMask)> = Vec::new();
    for result in &self.prompts {
      let Some(mask) = &result.mask else {
        continue;
      };
      match merged.iter_mut().find(|(c, _)| *c == result.category) {
        Some((_, acc)) => {
          if let Err(e) = acc.union_with(mask) {
            warn!("合并类别 '{}' 的掩膜失败: {}", result.category, e);
          }
        }
        None => merged.push((result.category.clone(), mask.clone())),
      }
    }
    merged
  }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
  /// 掩膜等中间产物的输出目录
  pub output_dir: PathBuf,
  /// 保存每个提示词的掩膜 `prompt_<slug>.png`
  pub save_prompt_masks: bool,
  /// 保存每个类别合并后的掩膜 `mask_<slug>.png`
  pub retain_category_masks: bool,
}

impl OrchestratorConfig {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self {
      output_dir: output_dir.into(),
      save_prompt_masks: false,
      retain_category_masks: false,
    }
  }

  pub fn save_prompt_masks(mut self, enabled: bool) -> Self {
    self.save_prompt_masks = enabled;
    self
  }

  pub fn retain_category_masks(mut self, enabled: bool) -> Self {
    self.retain_category_masks = enabled;
    self
  }
}

/// 检测编排器：串行执行每个提示词，汇总计数并生成合并标注图
///
/// 模型句柄在编排器存活期间只加载一次，多次 [`Orchestrator::run`] 共享。
pub struct Orchestrator<L: SegmenterLoader, O> {
  model: ModelHandle<L>,
  output: O,
  config: OrchestratorConfig,
  cancel: Option<Arc<AtomicBool>>,
}

impl<L, O> Orchestrator<L, O>
where
  L: SegmenterLoader,
  O: Render<ImageRef, [Annotation]>,
  O::Error: Display,
{
  pub fn new(loader: L, output: O, config: OrchestratorConfig) -> Self {
    Self {
      model: ModelHandle::new(loader),
      output,
      config,
      cancel: None,
    }
  }

  /// 每个提示词开始前检查该标志，置位后返回部分结果
  pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
    self.cancel = Some(flag);
    self
  }

  pub fn is_model_loaded(&self) -> bool {
    self.model.is_loaded()
  }

  fn cancelled(&self) -> bool {
    self
      .cancel
      .as_ref()
      .map(|flag| flag.load(Ordering::SeqCst))
      .unwrap_or(false)
  }

  pub fn run_selection<S: AsRef<str>>(
    &self,
    catalog: &PromptCatalog,
    image: ImageRef,
    selected: &[S],
    thresholds: Thresholds,
  ) -> Result<DetectionReport, OrchestratorError> {
    let request = DetectionRequest::from_selection(image, catalog, selected, thresholds);
    self.run(&request)
  }

  pub fn run(&self, request: &DetectionRequest) -> Result<DetectionReport, OrchestratorError> {
    let model = self
      .model
      .get()
      .map_err(|e| OrchestratorError::ModelInit(Box::new(e)))?;

    let thresholds = request.thresholds();
    let mut report = DetectionReport::new(thresholds);
    let prompts = request.prompts();
    if prompts.is_empty() {
      info!("没有选择任何类别, 跳过检测");
      return Ok(report);
    }

    info!(
      "开始检测: {} 个提示词, 框阈值 {}, 文本阈值 {}",
      prompts.len(),
      thresholds.box_threshold(),
      thresholds.text_threshold()
    );

    let mut prompt_stems = FileStems::new();
    for (i, spec) in prompts.iter().enumerate() {
      if self.cancelled() {
        warn!("收到取消请求, 已完成 {}/{} 个提示词", i, prompts.len());
        report.cancelled = true;
        break;
      }

      let now = Instant::now();
      let result = match model.predict(request.image(), &spec.prompt, thresholds) {
        Ok(segmentation) => {
          let result = PromptResult::succeeded(spec, segmentation, now.elapsed());
          info!(
            "({}/{}) {} / '{}': 检测到 {} 个区域，耗时: {:.2?}",
            i + 1,
            prompts.len(),
            spec.category,
            spec.prompt,
            result.count,
            now.elapsed()
          );
          result
        }
        Err(e) => {
          warn!(
            "({}/{}) {} / '{}': 检测失败, 计为 0: {}",
            i + 1,
            prompts.len(),
            spec.category,
            spec.prompt,
            e
          );
          PromptResult::failed(spec, e, now.elapsed())
        }
      };

      if self.config.save_prompt_masks
        && let Some(mask) = &result.mask
      {
        let path = self
          .config
          .output_dir
          .join(format!("prompt_{}.png", prompt_stems.stem_for(&spec.prompt)));
        match mask.save(&path) {
          Ok(()) => debug!("保存提示词掩膜: {}", path.display()),
          Err(e) => warn!("保存提示词掩膜失败 {}: {}", path.display(), e),
        }
      }

      report.record(result);
    }

    self.annotate(request.image(), &mut report);

    if self.config.retain_category_masks {
      self.save_category_masks(&mut report);
    }

    info!(
      "检测完成: 共 {} 个区域, {} 个提示词失败",
      report.total(),
      report.failures().count()
    );
    Ok(report)
  }

  fn annotate(&self, image: &ImageRef, report: &mut DetectionReport) {
    let annotations = report.annotations();
    debug!("合并 {} 个标注区域", annotations.len());
    match self.output.render_result(image, &annotations) {
      Ok(path) => report.annotated = Some(path),
      Err(e) => warn!("生成标注图失败, 无可视化结果: {}", e),
    }
  }

  fn save_category_masks(&self, report: &mut DetectionReport) {
    let mut stems = FileStems::new();
    for (category, mask) in report.category_union_masks() {
      let path = self
        .config
        .output_dir
        .join(format!("mask_{}.png", stems.stem_for(&category)));
      match mask.save(&path) {
        Ok(()) => {
          debug!("保存类别掩膜: {}", path.display());
          report.category_masks.push(CategoryMask { category, path });
        }
        Err(e) => warn!("保存类别掩膜失败 {}: {}", path.display(), e),
      }
    }
  }
}

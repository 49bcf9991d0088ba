// 该文件是 Jufeng （飓风） 项目的一部分。
// src/bin/detect_debris.rs - 飓风碎片检测命令行
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
  path::PathBuf,
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use url::Url;

use jufeng::{
  FileStems, FromUrl,
  catalog::{CategoryToggle, PromptCatalog},
  input::{Acquire, InputWrapper},
  model::CommandSegmenterBuilder,
  orchestrator::{Orchestrator, OrchestratorConfig},
  output::{SaveImageFileOutput, draw::Draw},
  request::{DEFAULT_SENSITIVITY, Thresholds},
  vector::{VectorizeError, Vectorizer},
};

/// Jufeng 碎片检测参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 分割模型桥接程序，例如 exec:///opt/langsam/bridge.py
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 影像来源: file:///path/scene.tif 或 tile://milton?bbox=W,S,E,N&zoom=18
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出目录
  #[arg(long, value_name = "DIR", default_value = "results")]
  pub output_dir: PathBuf,
  /// 检测灵敏度，同时作为框阈值与文本阈值 (0.0 - 1.0]
  #[arg(long, value_name = "THRESHOLD", default_value_t = DEFAULT_SENSITIVITY)]
  pub sensitivity: f32,
  /// 检测类别，可重复；缺省为碎片堆、瓦砾、蓝色防水布
  #[arg(long = "category", value_name = "NAME")]
  pub categories: Vec<String>,
  /// 自定义提示词目录 (JSON)
  #[arg(long, value_name = "FILE")]
  pub catalog: Option<PathBuf>,
  /// 标签字体文件
  #[arg(long, value_name = "FILE")]
  pub font: Option<PathBuf>,
  /// 将类别掩膜导出为 GeoJSON
  #[arg(long)]
  pub vectorize: bool,
  /// 保存每个提示词的掩膜
  #[arg(long)]
  pub keep_masks: bool,
}

fn selected_categories(args: &Args, catalog: &PromptCatalog) -> Vec<String> {
  if args.categories.is_empty() {
    return CategoryToggle::default_selection()
      .iter()
      .map(|toggle| toggle.name().to_string())
      .collect();
  }

  args
    .categories
    .iter()
    .filter_map(|name| {
      if catalog.prompts_for(name).is_some() {
        return Some(name.clone());
      }
      let canonical = CategoryToggle::parse(name).map(|toggle| toggle.name().to_string());
      match canonical {
        Some(canonical) if catalog.prompts_for(&canonical).is_some() => Some(canonical),
        _ => {
          warn!("未知类别 '{}', 已忽略", name);
          None
        }
      }
    })
    .collect()
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型: {}", args.model);
  info!("影像来源: {}", args.input);
  info!("输出目录: {}", args.output_dir.display());

  let catalog = match &args.catalog {
    Some(path) => PromptCatalog::from_json_file(path)?,
    None => PromptCatalog::default(),
  };
  let selected = selected_categories(&args, &catalog);
  info!("检测类别: {:?}", selected);

  let thresholds = Thresholds::from_sensitivity(args.sensitivity)?;
  let image = InputWrapper::from_url(&args.input)?.acquire()?;
  let loader = CommandSegmenterBuilder::from_url(&args.model)?;

  let draw = match &args.font {
    Some(path) => Draw::default().with_font_file(path)?,
    None => Draw::default(),
  };
  let output = SaveImageFileOutput::new(args.output_dir.join("result.png"), draw);
  let config = OrchestratorConfig::new(&args.output_dir)
    .save_prompt_masks(args.keep_masks)
    .retain_category_masks(args.vectorize || args.keep_masks);

  let cancel = Arc::new(AtomicBool::new(false));
  let flag = Arc::clone(&cancel);
  ctrlc::set_handler(move || {
    info!("收到中断信号，当前提示词完成后停止...");
    flag.store(true, Ordering::SeqCst);
  })?;

  let orchestrator = Orchestrator::new(loader, output, config).with_cancel_flag(cancel);
  let report = orchestrator.run_selection(&catalog, image.clone(), &selected, thresholds)?;

  for c in report.categories() {
    info!("{}: {}", c.category, c.count);
  }
  info!("合计: {}", report.total());
  if report.is_cancelled() {
    warn!("检测被中断, 结果不完整");
  }

  report.write_csv(&args.output_dir.join("results.csv"))?;
  report.write_json(&args.output_dir.join("report.json"))?;

  if args.vectorize {
    let mut stems = FileStems::new();
    for (category, mask) in report.category_union_masks() {
      let mask = mask.with_georef(image.georef.clone());
      let vectorizer = Vectorizer::new().with_category(&category);
      match vectorizer.to_vector(&mask) {
        Ok(features) => {
          let path = args
            .output_dir
            .join(format!("{}.geojson", stems.stem_for(&category)));
          features.write_geojson(&path)?;
          info!("{}: 导出 {} 个多边形", category, features.len());
        }
        Err(VectorizeError::NoFeatures) => info!("{}: 没有检测结果", category),
        Err(e) => return Err(e.into()),
      }
    }
  }

  Ok(())
}

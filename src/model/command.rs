// 该文件是 Jufeng （飓风） 项目的一部分。
// src/model/command.rs - 外部进程分割模型桥接
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
  path::{Path, PathBuf},
  process::Command,
};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{Region, Segmentation, Segmenter, SegmenterLoader},
  raster::{BinaryMask, ImageRef, RasterError},
  request::Thresholds,
};

#[derive(Error, Debug)]
pub enum CommandSegmenterError {
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("桥接程序退出码 {code:?}: {stderr}")]
  ExitError { code: Option<i32>, stderr: String },
  #[error("桥接程序输出无法解析: {0}")]
  OutputError(#[from] serde_json::Error),
  #[error("桥接程序输出不一致: {0}")]
  InconsistentOutput(String),
  #[error("掩膜读取错误: {0}")]
  MaskError(#[from] RasterError),
}

/// 桥接程序写到 stdout 的单行 JSON
#[derive(Debug, Deserialize)]
struct BridgeOutput {
  #[serde(default)]
  boxes: Vec<[f32; 4]>,
  #[serde(default)]
  scores: Vec<f32>,
}

/// 通过外部程序（例如包装 LangSAM 的脚本）执行文本提示分割
///
/// 每次调用以如下参数启动程序：
/// `--image <path> --prompt <text> --box-threshold <f> --text-threshold <f> --mask <path>`，
/// 程序在 stdout 输出 `{"boxes": [[x0, y0, x1, y1], ...], "scores": [...]}`，
/// 若有分割结果则把 uint8 掩膜写到 `--mask` 指定的位置。
#[derive(Debug)]
pub struct CommandSegmenter {
  program: PathBuf,
  extra_args: Vec<String>,
  scratch: PathBuf,
}

pub struct CommandSegmenterBuilder {
  program: PathBuf,
  extra_args: Vec<String>,
  scratch: PathBuf,
}

impl FromUrlWithScheme for CommandSegmenterBuilder {
  const SCHEME: &'static str = "exec";
}

impl FromUrl for CommandSegmenterBuilder {
  type Error = CommandSegmenterError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(CommandSegmenterError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    if url.path().is_empty() || url.path() == "/" {
      return Err(CommandSegmenterError::ModelPathError(
        "未指定桥接程序路径".to_string(),
      ));
    }

    let program = crate::url_file_path(url).ok_or_else(|| {
      CommandSegmenterError::ModelPathError(format!("无法解析桥接程序路径: {}", url))
    })?;
    let mut builder = CommandSegmenterBuilder::new(program);
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "scratch" => builder.scratch = PathBuf::from(v.as_ref()),
        "arg" => builder.extra_args.push(v.into_owned()),
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }
    Ok(builder)
  }
}

impl CommandSegmenterBuilder {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      extra_args: Vec::new(),
      scratch: std::env::temp_dir().join("jufeng"),
    }
  }

  pub fn scratch(mut self, scratch: impl Into<PathBuf>) -> Self {
    self.scratch = scratch.into();
    self
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.extra_args.push(arg.into());
    self
  }
}

impl SegmenterLoader for CommandSegmenterBuilder {
  type Segmenter = CommandSegmenter;
  type Error = CommandSegmenterError;

  fn load(&self) -> Result<CommandSegmenter, CommandSegmenterError> {
    info!("检查桥接程序: {}", self.program.display());
    if !self.program.is_file() {
      error!("桥接程序不存在: {}", self.program.display());
      return Err(CommandSegmenterError::ModelPathError(format!(
        "桥接程序不存在: {}",
        self.program.display()
      )));
    }
    std::fs::create_dir_all(&self.scratch)?;
    debug!("掩膜临时目录: {}", self.scratch.display());

    Ok(CommandSegmenter {
      program: self.program.clone(),
      extra_args: self.extra_args.clone(),
      scratch: self.scratch.clone(),
    })
  }
}

impl CommandSegmenter {
  fn mask_path(&self, prompt: &str) -> PathBuf {
    self.scratch.join(format!("{}.mask.png", crate::slug(prompt)))
  }

  fn read_mask(&self, path: &Path, image: &ImageRef) -> Result<Option<BinaryMask>, RasterError> {
    if !path.is_file() {
      return Ok(None);
    }
    let mask = BinaryMask::load(path)?;
    Ok(Some(mask.with_georef(image.georef.clone())))
  }
}

impl Segmenter for CommandSegmenter {
  type Error = CommandSegmenterError;

  fn predict(
    &self,
    image: &ImageRef,
    prompt: &str,
    thresholds: Thresholds,
  ) -> Result<Segmentation, Self::Error> {
    let mask_path = self.mask_path(prompt);
    if mask_path.exists() {
      std::fs::remove_file(&mask_path)?;
    }

    debug!("调用桥接程序: '{}'", prompt);
    let output = Command::new(&self.program)
      .args(&self.extra_args)
      .arg("--image")
      .arg(&image.path)
      .arg("--prompt")
      .arg(prompt)
      .arg("--box-threshold")
      .arg(thresholds.box_threshold().to_string())
      .arg("--text-threshold")
      .arg(thresholds.text_threshold().to_string())
      .arg("--mask")
      .arg(&mask_path)
      .output()?;

    if !output.status.success() {
      return Err(CommandSegmenterError::ExitError {
        code: output.status.code(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
      });
    }

    let parsed: BridgeOutput = serde_json::from_slice(&output.stdout)?;
    if !parsed.scores.is_empty() && parsed.scores.len() != parsed.boxes.len() {
      return Err(CommandSegmenterError::InconsistentOutput(format!(
        "{} 个框, {} 个分数",
        parsed.boxes.len(),
        parsed.scores.len()
      )));
    }

    let regions = parsed
      .boxes
      .iter()
      .enumerate()
      .map(|(i, bbox)| Region {
        score: parsed.scores.get(i).copied().unwrap_or(1.0),
        bbox: *bbox,
      })
      .collect::<Vec<_>>();
    let mask = if regions.is_empty() {
      None
    } else {
      self.read_mask(&mask_path, image)?
    };
    debug!("桥接程序返回 {} 个区域", regions.len());

    Ok(Segmentation { regions, mask })
  }
}

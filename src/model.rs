// 该文件是 Jufeng （飓风） 项目的一部分。
// src/model.rs - 文本条件分割模型接口
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

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::{
  raster::{BinaryMask, ImageRef},
  request::Thresholds,
};

/// 分割能力：给定影像、文本提示与两个阈值，返回匹配区域
pub trait Segmenter {
  type Error: std::error::Error + Send + Sync + 'static;

  fn predict(
    &self,
    image: &ImageRef,
    prompt: &str,
    thresholds: Thresholds,
  ) -> Result<Segmentation, Self::Error>;
}

/// 模型加载器，加载代价高，由 [`ModelHandle`] 保证至多执行一次
pub trait SegmenterLoader {
  type Segmenter: Segmenter;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(&self) -> Result<Self::Segmenter, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Region {
  pub score: f32,
  pub bbox: [f32; 4], // 像素坐标 [x_min, y_min, x_max, y_max]
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Segmentation {
  pub regions: Vec<Region>,
  /// 所有区域合并后的掩膜，与输入影像对齐；模型未给出时为空
  pub mask: Option<BinaryMask>,
}

impl Segmentation {
  pub fn count(&self) -> usize {
    self.regions.len()
  }

  pub fn is_empty(&self) -> bool {
    self.regions.is_empty()
  }

  pub fn boxes(&self) -> Vec<[f32; 4]> {
    self.regions.iter().map(|r| r.bbox).collect()
  }
}

/// 进程级的模型句柄：首次使用时加载，之后复用
///
/// 加载在互斥锁内完成，并发的首次调用只会触发一次加载。
/// 加载失败不会缓存，下一次调用会重新尝试。
pub struct ModelHandle<L: SegmenterLoader> {
  loader: L,
  slot: Mutex<Option<Arc<L::Segmenter>>>,
}

impl<L: SegmenterLoader> ModelHandle<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      slot: Mutex::new(None),
    }
  }

  pub fn get(&self) -> Result<Arc<L::Segmenter>, L::Error> {
    let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(model) = slot.as_ref() {
      debug!("复用已加载的分割模型");
      return Ok(Arc::clone(model));
    }

    info!("加载分割模型...");
    let now = std::time::Instant::now();
    let model = Arc::new(self.loader.load()?);
    info!("模型加载完成，耗时: {:.2?}", now.elapsed());
    *slot = Some(Arc::clone(&model));
    Ok(model)
  }

  pub fn is_loaded(&self) -> bool {
    self
      .slot
      .lock()
      .map(|slot| slot.is_some())
      .unwrap_or(false)
  }
}

#[cfg(feature = "command_model")]
mod command;
#[cfg(feature = "command_model")]
pub use self::command::{CommandSegmenter, CommandSegmenterBuilder, CommandSegmenterError};

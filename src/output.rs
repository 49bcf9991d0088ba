// 该文件是 Jufeng （飓风） 项目的一部分。
// src/output.rs - 输出定义
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

use std::path::PathBuf;

use crate::raster::BinaryMask;

/// 渲染检测结果并写出，返回产物路径
pub trait Render<Frame, Output: ?Sized> {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<PathBuf, Self::Error>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
  Mask(BinaryMask),
  Box([f32; 4]), // 像素坐标 [x_min, y_min, x_max, y_max]
}

/// 待标注的一个区域及其标签
#[derive(Debug, Clone, PartialEq)]
pub struct Annotation {
  pub shape: Shape,
  pub label: String,
}

impl Annotation {
  pub fn mask(mask: BinaryMask, label: impl Into<String>) -> Self {
    Self {
      shape: Shape::Mask(mask),
      label: label.into(),
    }
  }

  pub fn bbox(bbox: [f32; 4], label: impl Into<String>) -> Self {
    Self {
      shape: Shape::Box(bbox),
      label: label.into(),
    }
  }
}

pub mod draw;
pub mod report;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

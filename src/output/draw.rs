// 该文件是 Jufeng （飓风） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::warn;

use crate::{
  output::{Annotation, Shape},
  raster::BinaryMask,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;

// 所有类别共用一个红色色阶，严重程度由数量而不是颜色体现
const HIGHLIGHT_COLOR: [u8; 3] = [203, 24, 29];
const HIGHLIGHT_ALPHA: f32 = 0.5;
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体无效: {0}")]
  FontError(#[from] ab_glyph::InvalidFont),
}

pub struct Draw {
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  font: Option<FontVec>,
  color: [u8; 3],
  alpha: f32,
  box_thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      font: None,
      color: HIGHLIGHT_COLOR,
      alpha: HIGHLIGHT_ALPHA,
      box_thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  /// 加载 TrueType 字体后才绘制标签文字
  pub fn with_font_file(mut self, path: &Path) -> Result<Self, DrawError> {
    let data = std::fs::read(path)?;
    self.font = Some(FontVec::try_from_vec(data)?);
    Ok(self)
  }

  pub fn with_alpha(mut self, alpha: f32) -> Self {
    self.alpha = alpha.clamp(0.0, 1.0);
    self
  }

  /// 半透明填充掩膜前景
  fn fill_mask(&self, image: &mut RgbImage, mask: &BinaryMask) {
    if mask.dimensions() != image.dimensions() {
      warn!(
        "掩膜尺寸 {:?} 与影像尺寸 {:?} 不一致, 跳过填充",
        mask.dimensions(),
        image.dimensions()
      );
      return;
    }

    for (x, y, pixel) in image.enumerate_pixels_mut() {
      if !mask.get(x, y) {
        continue;
      }
      for c in 0..3 {
        let base = pixel[c] as f32;
        let blended = base * (1.0 - self.alpha) + self.color[c] as f32 * self.alpha;
        pixel[c] = blended.round().clamp(0.0, 255.0) as u8;
      }
    }
  }

  // 在图像上绘制一个矩形边框，bbox 为像素坐标 [x_min, y_min, x_max, y_max]
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &[f32; 4], label: &str) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = Rgb(self.color);
    for t in 0..self.box_thickness {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }

    let Some(font) = self.font.as_ref() else {
      return;
    };

    // 估算文本大小（粗略估计），标签放在边框上方
    let text_width = (label.chars().count() as f32 * self.label_char_width) as i32;
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x).max(0) as u32;
    let label_height = self.label_text_height as u32;

    if label_width > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width, label_height);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        Rgb([255u8, 255u8, 255u8]),
        label_x,
        label_y + self.label_text_vertical_padding,
        PxScale::from(self.font_size),
        font,
        label,
      );
    }
  }

  /// 先填充全部掩膜，再在其上绘制边框；没有区域时图像保持不变
  pub fn draw_annotations(&self, image: &mut RgbImage, annotations: &[Annotation]) {
    for annotation in annotations {
      if let Shape::Mask(mask) = &annotation.shape {
        self.fill_mask(image, mask);
      }
    }
    for annotation in annotations {
      if let Shape::Box(bbox) = &annotation.shape {
        self.draw_bbox_with_label(image, bbox, &annotation.label);
      }
    }
  }
}

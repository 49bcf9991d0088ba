// 该文件是 Jufeng （飓风） 项目的一部分。
// src/raster.rs - 栅格、地理参考与二值掩膜定义
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

use image::{GrayImage, Luma, RgbImage};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

const SIDECAR_SUFFIX: &str = "geo.json";
const WORLD_FILE_EXTENSIONS: [&str; 4] = ["pgw", "jgw", "tfw", "wld"];
const MASK_FOREGROUND: u8 = 255;

#[derive(Error, Debug)]
pub enum RasterError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("地理参考文件解析错误: {0}")]
  SidecarError(#[from] serde_json::Error),
  #[error("世界文件格式错误: {0}")]
  WorldFileError(String),
  #[error("掩膜尺寸不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  DimensionMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
}

/// 六参数仿射变换，系数顺序与 GDAL 一致
///
/// `x = c0 + col * c1 + row * c2`，`y = c3 + col * c4 + row * c5`，
/// 行列坐标指像素左上角。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
  pub fn identity() -> Self {
    GeoTransform([0.0, 1.0, 0.0, 0.0, 0.0, 1.0])
  }

  pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
    GeoTransform([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
  }

  pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
    let c = &self.0;
    (
      c[0] + col * c[1] + row * c[2],
      c[3] + col * c[4] + row * c[5],
    )
  }

  /// 解析 ESRI 世界文件（六行：A D B E C F，C/F 为左上像素中心）
  pub fn from_world_file(text: &str) -> Result<Self, RasterError> {
    let values = text
      .split_whitespace()
      .map(|v| {
        v.parse::<f64>()
          .map_err(|e| RasterError::WorldFileError(format!("无法解析数值 '{}': {}", v, e)))
      })
      .collect::<Result<Vec<_>, _>>()?;
    let [a, d, b, e, c, f] = values[..] else {
      return Err(RasterError::WorldFileError(format!(
        "期望 6 个系数, 实际 {} 个",
        values.len()
      )));
    };
    Ok(GeoTransform([
      c - a / 2.0 - b / 2.0,
      a,
      b,
      f - d / 2.0 - e / 2.0,
      d,
      e,
    ]))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoReference {
  /// 坐标参考系标识，如 `EPSG:4326`；仅有世界文件时未知
  pub crs: Option<String>,
  pub transform: GeoTransform,
}

impl GeoReference {
  pub fn new(crs: impl Into<String>, transform: GeoTransform) -> Self {
    Self {
      crs: Some(crs.into()),
      transform,
    }
  }

  /// 在栅格文件旁查找地理参考信息：先找 JSON 附属文件，再找世界文件
  pub fn discover(raster: &Path) -> Result<Option<Self>, RasterError> {
    let sidecar = sidecar_path(raster);
    if sidecar.is_file() {
      debug!("读取地理参考附属文件: {}", sidecar.display());
      let text = std::fs::read_to_string(&sidecar)?;
      return Ok(Some(serde_json::from_str(&text)?));
    }

    for ext in WORLD_FILE_EXTENSIONS {
      let world = raster.with_extension(ext);
      if world.is_file() {
        debug!("读取世界文件: {}", world.display());
        let text = std::fs::read_to_string(&world)?;
        return Ok(Some(GeoReference {
          crs: None,
          transform: GeoTransform::from_world_file(&text)?,
        }));
      }
    }

    Ok(None)
  }

  pub fn write_sidecar(&self, raster: &Path) -> Result<(), RasterError> {
    let text = serde_json::to_string_pretty(self)?;
    std::fs::write(sidecar_path(raster), text)?;
    Ok(())
  }
}

pub fn sidecar_path(raster: &Path) -> PathBuf {
  let mut name = raster.as_os_str().to_owned();
  name.push(".");
  name.push(SIDECAR_SUFFIX);
  PathBuf::from(name)
}

/// 输入影像引用：路径与可选地理参考
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRef {
  pub path: PathBuf,
  pub georef: Option<GeoReference>,
}

impl ImageRef {
  pub fn new(path: impl Into<PathBuf>, georef: Option<GeoReference>) -> Self {
    Self {
      path: path.into(),
      georef,
    }
  }

  pub fn open(path: impl Into<PathBuf>) -> Result<Self, RasterError> {
    let path = path.into();
    if !path.is_file() {
      return Err(RasterError::IoError(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("影像文件不存在: {}", path.display()),
      )));
    }
    let georef = GeoReference::discover(&path)?;
    if georef.is_none() {
      warn!("影像没有地理参考信息, 将使用像素坐标: {}", path.display());
    }
    Ok(Self { path, georef })
  }

  pub fn load_rgb(&self) -> Result<RgbImage, RasterError> {
    Ok(image::open(&self.path)?.to_rgb8())
  }
}

/// 二值掩膜，与输入影像像素网格对齐，前景为 255
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryMask {
  data: GrayImage,
  georef: Option<GeoReference>,
}

impl BinaryMask {
  pub fn new(width: u32, height: u32, georef: Option<GeoReference>) -> Self {
    Self {
      data: GrayImage::new(width, height),
      georef,
    }
  }

  /// 任意非零像素视为前景
  pub fn from_gray(gray: &GrayImage, georef: Option<GeoReference>) -> Self {
    let data = GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
      if gray.get_pixel(x, y)[0] > 0 {
        Luma([MASK_FOREGROUND])
      } else {
        Luma([0])
      }
    });
    Self { data, georef }
  }

  /// 将像素坐标框 `[x_min, y_min, x_max, y_max]` 栅格化为掩膜
  pub fn from_boxes(
    width: u32,
    height: u32,
    boxes: &[[f32; 4]],
    georef: Option<GeoReference>,
  ) -> Self {
    let mut mask = Self::new(width, height, georef);
    for bbox in boxes {
      let x0 = bbox[0].floor().max(0.0) as u32;
      let y0 = bbox[1].floor().max(0.0) as u32;
      let x1 = (bbox[2].ceil().max(0.0) as u32).min(width);
      let y1 = (bbox[3].ceil().max(0.0) as u32).min(height);
      for y in y0..y1 {
        for x in x0..x1 {
          mask.set(x, y, true);
        }
      }
    }
    mask
  }

  pub fn width(&self) -> u32 {
    self.data.width()
  }

  pub fn height(&self) -> u32 {
    self.data.height()
  }

  pub fn dimensions(&self) -> (u32, u32) {
    self.data.dimensions()
  }

  pub fn georef(&self) -> Option<&GeoReference> {
    self.georef.as_ref()
  }

  pub fn with_georef(mut self, georef: Option<GeoReference>) -> Self {
    self.georef = georef;
    self
  }

  pub fn as_gray(&self) -> &GrayImage {
    &self.data
  }

  pub fn get(&self, x: u32, y: u32) -> bool {
    self.data.get_pixel(x, y)[0] > 0
  }

  pub fn set(&mut self, x: u32, y: u32, value: bool) {
    let v = if value { MASK_FOREGROUND } else { 0 };
    self.data.put_pixel(x, y, Luma([v]));
  }

  pub fn foreground_pixels(&self) -> usize {
    self.data.pixels().filter(|p| p[0] > 0).count()
  }

  pub fn is_empty(&self) -> bool {
    self.data.pixels().all(|p| p[0] == 0)
  }

  /// 按像素取并集；尺寸不一致时返回错误且不修改自身
  pub fn union_with(&mut self, other: &BinaryMask) -> Result<(), RasterError> {
    if self.dimensions() != other.dimensions() {
      return Err(RasterError::DimensionMismatch {
        expected: self.dimensions(),
        actual: other.dimensions(),
      });
    }
    for (dst, src) in self.data.pixels_mut().zip(other.data.pixels()) {
      if src[0] > 0 {
        *dst = Luma([MASK_FOREGROUND]);
      }
    }
    if self.georef.is_none() {
      self.georef = other.georef.clone();
    }
    Ok(())
  }

  /// 保存为 uint8 掩膜，若有地理参考则一并写出附属文件
  pub fn save(&self, path: &Path) -> Result<(), RasterError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    self.data.save(path)?;
    if let Some(georef) = &self.georef {
      georef.write_sidecar(path)?;
    }
    Ok(())
  }

  pub fn load(path: &Path) -> Result<Self, RasterError> {
    let gray = image::open(path)?.to_luma8();
    let georef = GeoReference::discover(path)?;
    Ok(Self::from_gray(&gray, georef))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn world_file_maps_pixel_centre_to_corner() {
    let text = "0.5\n0.0\n0.0\n-0.5\n100.25\n200.75\n";
    let gt = GeoTransform::from_world_file(text).unwrap();
    assert_eq!(gt, GeoTransform([100.0, 0.5, 0.0, 201.0, 0.0, -0.5]));
    assert_eq!(gt.pixel_to_geo(2.0, 4.0), (101.0, 199.0));
  }

  #[test]
  fn world_file_with_wrong_arity_is_rejected() {
    assert!(matches!(
      GeoTransform::from_world_file("1.0 2.0 3.0"),
      Err(RasterError::WorldFileError(_))
    ));
  }

  #[test]
  fn union_keeps_foreground_from_both_masks() {
    let mut a = BinaryMask::from_boxes(8, 8, &[[0.0, 0.0, 2.0, 2.0]], None);
    let b = BinaryMask::from_boxes(8, 8, &[[4.0, 4.0, 6.0, 7.0]], None);
    a.union_with(&b).unwrap();
    assert_eq!(a.foreground_pixels(), 4 + 6);
    assert!(a.get(1, 1));
    assert!(a.get(5, 6));
    assert!(!a.get(3, 3));
  }

  #[test]
  fn union_rejects_misaligned_masks() {
    let mut a = BinaryMask::new(4, 4, None);
    let b = BinaryMask::new(5, 4, None);
    assert!(matches!(
      a.union_with(&b),
      Err(RasterError::DimensionMismatch { .. })
    ));
  }

  #[test]
  fn boxes_are_clamped_to_raster() {
    let mask = BinaryMask::from_boxes(4, 4, &[[-3.0, 2.0, 10.0, 9.0]], None);
    assert_eq!(mask.foreground_pixels(), 8);
  }

  #[test]
  fn mask_save_and_load_keeps_georeference() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("mask.png");
    let georef = GeoReference::new("EPSG:3857", GeoTransform::north_up(10.0, 20.0, 0.3, 0.3));
    let mask = BinaryMask::from_boxes(6, 6, &[[1.0, 1.0, 3.0, 3.0]], Some(georef.clone()));
    mask.save(&path).unwrap();

    let loaded = BinaryMask::load(&path).unwrap();
    assert_eq!(loaded.georef(), Some(&georef));
    assert_eq!(loaded.foreground_pixels(), 4);
  }

  #[test]
  fn image_ref_discovers_world_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("scene.png");
    RgbImage::new(2, 2).save(&path).unwrap();
    std::fs::write(dir.path().join("scene.pgw"), "1\n0\n0\n-1\n0.5\n9.5\n").unwrap();

    let image = ImageRef::open(&path).unwrap();
    let georef = image.georef.unwrap();
    assert_eq!(georef.crs, None);
    assert_eq!(georef.transform.pixel_to_geo(0.0, 0.0), (0.0, 10.0));
  }
}

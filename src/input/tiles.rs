// 该文件是 Jufeng （飓风） 项目的一部分。
// src/input/tiles.rs - 瓦片服务影像下载与拼接
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

use std::{f64::consts::PI, path::PathBuf, str::FromStr};

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  input::Acquire,
  raster::{GeoReference, GeoTransform, ImageRef, RasterError},
};

pub const TILE_SIZE: u32 = 256;
const MAX_TILES: u64 = 1024;
const MAX_ZOOM: u8 = 22;
const MAX_LATITUDE: f64 = 85.051_128_78;
const HALF_CIRCUMFERENCE: f64 = 20_037_508.342_789_244;
const WEB_MERCATOR: &str = "EPSG:3857";

#[derive(Error, Debug)]
pub enum TileError {
  #[cfg(feature = "tile_download")]
  #[error("HTTP 错误: {0}")]
  HttpError(#[from] reqwest::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("栅格错误: {0}")]
  RasterError(#[from] RasterError),
  #[error("范围无效: {0}")]
  InvalidBoundingBox(String),
  #[error("参数无效: {0}")]
  InvalidParameter(String),
  #[error("请求的瓦片过多: {0}")]
  TooManyTiles(u64),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// WGS84 经纬度范围 [west, south, east, north]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
  pub west: f64,
  pub south: f64,
  pub east: f64,
  pub north: f64,
}

/// 皮内拉斯县受灾区域预设 [west, south, east, north]
pub const PINELLAS_AREAS: [(&str, [f64; 4]); 7] = [
  ("clearwater_beach", [-82.835, 27.965, -82.815, 27.985]),
  ("st_pete_beach", [-82.745, 27.715, -82.725, 27.735]),
  ("treasure_island", [-82.780, 27.760, -82.760, 27.780]),
  ("indian_rocks", [-82.860, 27.880, -82.840, 27.900]),
  ("dunedin", [-82.795, 28.010, -82.775, 28.030]),
  ("largo", [-82.795, 27.900, -82.775, 27.920]),
  ("pinellas_park", [-82.715, 27.835, -82.695, 27.855]),
];

impl BoundingBox {
  /// 按名称查找预设区域，名称忽略大小写与分隔符
  pub fn preset(name: &str) -> Result<Self, TileError> {
    let key = crate::slug(name);
    let [west, south, east, north] = PINELLAS_AREAS
      .iter()
      .find(|(area, _)| *area == key)
      .map(|(_, bbox)| *bbox)
      .ok_or_else(|| {
        let known: Vec<&str> = PINELLAS_AREAS.iter().map(|(area, _)| *area).collect();
        TileError::InvalidParameter(format!("未知区域 '{}', 可选: {}", name, known.join(", ")))
      })?;
    BoundingBox::new(west, south, east, north)
  }

  pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self, TileError> {
    if !(west < east && south < north) {
      return Err(TileError::InvalidBoundingBox(format!(
        "[{}, {}, {}, {}] 的西/南边界必须小于东/北边界",
        west, south, east, north
      )));
    }
    if west < -180.0 || east > 180.0 || south < -MAX_LATITUDE || north > MAX_LATITUDE {
      return Err(TileError::InvalidBoundingBox(format!(
        "[{}, {}, {}, {}] 超出 Web 墨卡托范围",
        west, south, east, north
      )));
    }
    Ok(Self {
      west,
      south,
      east,
      north,
    })
  }
}

impl FromStr for BoundingBox {
  type Err = TileError;

  /// 解析 `W,S,E,N`
  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let values = s
      .split(',')
      .map(|v| {
        v.trim()
          .parse::<f64>()
          .map_err(|e| TileError::InvalidBoundingBox(format!("'{}': {}", v, e)))
      })
      .collect::<Result<Vec<_>, _>>()?;
    let &[west, south, east, north] = values.as_slice() else {
      return Err(TileError::InvalidBoundingBox(format!(
        "期望 4 个数值, 实际 {} 个",
        values.len()
      )));
    };
    BoundingBox::new(west, south, east, north)
  }
}

/// 灾后影像瓦片源，模板中的 `{z}`/`{x}`/`{y}` 会被替换
#[derive(Debug, Clone, PartialEq)]
pub enum TileSource {
  Milton,
  Helene,
  Esri,
  Custom(String),
}

impl TileSource {
  pub fn template(&self) -> &str {
    match self {
      TileSource::Milton => {
        "https://tiles.arcgis.com/tiles/C8EMgrsFcRFL6LrL/arcgis/rest/services/Milton_Imagery/MapServer/tile/{z}/{y}/{x}"
      }
      TileSource::Helene => {
        "https://tiles.arcgis.com/tiles/C8EMgrsFcRFL6LrL/arcgis/rest/services/Helene_Imagery/MapServer/tile/{z}/{y}/{x}"
      }
      TileSource::Esri => {
        "https://server.arcgisonline.com/ArcGIS/rest/services/World_Imagery/MapServer/tile/{z}/{y}/{x}"
      }
      TileSource::Custom(template) => template,
    }
  }

  pub fn tile_url(&self, zoom: u8, x: u32, y: u32) -> String {
    self
      .template()
      .replace("{z}", &zoom.to_string())
      .replace("{x}", &x.to_string())
      .replace("{y}", &y.to_string())
  }

  pub fn from_name(name: &str, template: Option<&str>) -> Result<Self, TileError> {
    match (name, template) {
      ("milton", _) => Ok(TileSource::Milton),
      ("helene", _) => Ok(TileSource::Helene),
      ("esri", _) => Ok(TileSource::Esri),
      ("custom", Some(t)) if t.contains("{z}") && t.contains("{x}") && t.contains("{y}") => {
        Ok(TileSource::Custom(t.to_string()))
      }
      ("custom", _) => Err(TileError::InvalidParameter(
        "自定义瓦片源需要包含 {z}/{x}/{y} 的 template 参数".to_string(),
      )),
      (other, _) => Err(TileError::InvalidParameter(format!("未知瓦片源: {}", other))),
    }
  }
}

fn world_pixels(zoom: u8) -> f64 {
  TILE_SIZE as f64 * 2f64.powi(zoom as i32)
}

/// 经纬度 → 指定缩放级别下的全局像素坐标
fn global_pixel(lon: f64, lat: f64, zoom: u8) -> (f64, f64) {
  let size = world_pixels(zoom);
  let x = (lon + 180.0) / 360.0 * size;
  let lat = lat.to_radians();
  let y = (1.0 - (lat.tan() + 1.0 / lat.cos()).ln() / PI) / 2.0 * size;
  (x.clamp(0.0, size), y.clamp(0.0, size))
}

/// 覆盖范围所需的像素窗口与瓦片编号区间（闭区间）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRange {
  pub zoom: u8,
  pub x_min: u32,
  pub x_max: u32,
  pub y_min: u32,
  pub y_max: u32,
  pixel_window: [u64; 4], // [x0, y0, x1, y1] 全局像素
}

impl TileRange {
  pub fn covering(bbox: &BoundingBox, zoom: u8) -> Result<Self, TileError> {
    if zoom > MAX_ZOOM {
      return Err(TileError::InvalidParameter(format!(
        "缩放级别 {} 超过上限 {}",
        zoom, MAX_ZOOM
      )));
    }
    let (fx0, fy0) = global_pixel(bbox.west, bbox.north, zoom);
    let (fx1, fy1) = global_pixel(bbox.east, bbox.south, zoom);
    let x0 = fx0.floor() as u64;
    let y0 = fy0.floor() as u64;
    let x1 = (fx1.ceil() as u64).max(x0 + 1);
    let y1 = (fy1.ceil() as u64).max(y0 + 1);

    let tile = TILE_SIZE as u64;
    let range = TileRange {
      zoom,
      x_min: (x0 / tile) as u32,
      x_max: ((x1 - 1) / tile) as u32,
      y_min: (y0 / tile) as u32,
      y_max: ((y1 - 1) / tile) as u32,
      pixel_window: [x0, y0, x1, y1],
    };
    if range.count() > MAX_TILES {
      return Err(TileError::TooManyTiles(range.count()));
    }
    Ok(range)
  }

  pub fn count(&self) -> u64 {
    (self.x_max - self.x_min + 1) as u64 * (self.y_max - self.y_min + 1) as u64
  }

  pub fn width(&self) -> u32 {
    (self.pixel_window[2] - self.pixel_window[0]) as u32
  }

  pub fn height(&self) -> u32 {
    (self.pixel_window[3] - self.pixel_window[1]) as u32
  }

  /// 裁剪窗口左上角的 EPSG:3857 仿射变换
  pub fn georeference(&self) -> GeoReference {
    let res = 2.0 * HALF_CIRCUMFERENCE / world_pixels(self.zoom);
    let origin_x = -HALF_CIRCUMFERENCE + self.pixel_window[0] as f64 * res;
    let origin_y = HALF_CIRCUMFERENCE - self.pixel_window[1] as f64 * res;
    GeoReference::new(
      WEB_MERCATOR,
      GeoTransform::north_up(origin_x, origin_y, res, res),
    )
  }
}

pub trait TileFetcher {
  fn fetch(&self, source: &TileSource, zoom: u8, x: u32, y: u32) -> Result<RgbImage, TileError>;
}

#[cfg(feature = "tile_download")]
pub struct HttpTileFetcher {
  client: reqwest::blocking::Client,
}

#[cfg(feature = "tile_download")]
impl HttpTileFetcher {
  pub fn new() -> Result<Self, TileError> {
    let client = reqwest::blocking::Client::builder()
      .user_agent(concat!("jufeng/", env!("CARGO_PKG_VERSION")))
      .timeout(std::time::Duration::from_secs(30))
      .build()?;
    Ok(Self { client })
  }
}

#[cfg(feature = "tile_download")]
impl TileFetcher for HttpTileFetcher {
  fn fetch(&self, source: &TileSource, zoom: u8, x: u32, y: u32) -> Result<RgbImage, TileError> {
    let url = source.tile_url(zoom, x, y);
    debug!("下载瓦片: {}", url);
    let bytes = self.client.get(&url).send()?.error_for_status()?.bytes()?;
    Ok(image::load_from_memory(&bytes)?.to_rgb8())
  }
}

pub struct TileMosaic;

impl TileMosaic {
  /// 下载覆盖范围的所有瓦片，拼接并裁剪为一幅栅格
  pub fn build<F: TileFetcher + ?Sized>(
    fetcher: &F,
    source: &TileSource,
    bbox: &BoundingBox,
    zoom: u8,
  ) -> Result<(RgbImage, GeoReference), TileError> {
    let range = TileRange::covering(bbox, zoom)?;
    info!(
      "拼接 {} 个瓦片 (z={}, x={}..={}, y={}..={})",
      range.count(),
      zoom,
      range.x_min,
      range.x_max,
      range.y_min,
      range.y_max
    );

    let mut canvas = RgbImage::new(range.width(), range.height());
    let [x0, y0, _, _] = range.pixel_window;
    for ty in range.y_min..=range.y_max {
      for tx in range.x_min..=range.x_max {
        let mut tile = fetcher.fetch(source, zoom, tx, ty)?;
        if tile.dimensions() != (TILE_SIZE, TILE_SIZE) {
          tile = imageops::resize(&tile, TILE_SIZE, TILE_SIZE, imageops::FilterType::Triangle);
        }
        let offset_x = tx as i64 * TILE_SIZE as i64 - x0 as i64;
        let offset_y = ty as i64 * TILE_SIZE as i64 - y0 as i64;
        imageops::overlay(&mut canvas, &tile, offset_x, offset_y);
      }
    }

    Ok((canvas, range.georeference()))
  }
}

/// 从瓦片服务下载指定范围的影像
///
/// `tile://<source>?bbox=W,S,E,N&zoom=18&out=/path/scene.png[&template=...]`，
/// 也可以用 `area=<预设名>` 代替 `bbox`
pub struct TileImageInput {
  source: TileSource,
  bbox: BoundingBox,
  zoom: u8,
  output: PathBuf,
}

impl FromUrlWithScheme for TileImageInput {
  const SCHEME: &'static str = "tile";
}

impl FromUrl for TileImageInput {
  type Error = TileError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(TileError::SchemeMismatch(format!(
        "期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let mut bbox = None;
    let mut zoom = 18u8;
    let mut output = None;
    let mut template = None;
    for (k, v) in url.query_pairs() {
      match k.as_ref() {
        "bbox" => bbox = Some(v.parse::<BoundingBox>()?),
        "area" => bbox = Some(BoundingBox::preset(&v)?),
        "zoom" => {
          zoom = v
            .parse()
            .map_err(|e| TileError::InvalidParameter(format!("zoom '{}': {}", v, e)))?
        }
        "out" => output = Some(PathBuf::from(v.as_ref())),
        "template" => template = Some(v.into_owned()),
        _ => debug!("忽略未知参数: {}={}", k, v),
      }
    }

    let name = url.host_str().unwrap_or("esri");
    Ok(TileImageInput {
      source: TileSource::from_name(name, template.as_deref())?,
      bbox: bbox
        .ok_or_else(|| TileError::InvalidParameter("缺少 bbox 或 area 参数".to_string()))?,
      zoom,
      output: output.unwrap_or_else(|| PathBuf::from(format!("{}_imagery.png", name))),
    })
  }
}

impl TileImageInput {
  pub fn new(source: TileSource, bbox: BoundingBox, zoom: u8, output: impl Into<PathBuf>) -> Self {
    Self {
      source,
      bbox,
      zoom,
      output: output.into(),
    }
  }

  /// 请求的瓦片源失败时，回退到 ESRI World Imagery 重试一次
  pub fn acquire_with<F: TileFetcher + ?Sized>(&self, fetcher: &F) -> Result<ImageRef, TileError> {
    let (image, georef) = match TileMosaic::build(fetcher, &self.source, &self.bbox, self.zoom) {
      Ok(result) => result,
      Err(e) if self.source != TileSource::Esri => {
        warn!("瓦片源 {:?} 下载失败: {}, 改用 ESRI World Imagery", self.source, e);
        TileMosaic::build(fetcher, &TileSource::Esri, &self.bbox, self.zoom)?
      }
      Err(e) => return Err(e),
    };

    if let Some(parent) = self.output.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&self.output)?;
    georef.write_sidecar(&self.output)?;
    info!(
      "影像已保存: {} ({}x{})",
      self.output.display(),
      image.width(),
      image.height()
    );

    Ok(ImageRef::new(&self.output, Some(georef)))
  }
}

#[cfg(feature = "tile_download")]
impl Acquire for TileImageInput {
  type Error = TileError;

  fn acquire(&self) -> Result<ImageRef, Self::Error> {
    let fetcher = HttpTileFetcher::new()?;
    self.acquire_with(&fetcher)
  }
}

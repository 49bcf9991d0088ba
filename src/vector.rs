// 该文件是 Jufeng （飓风） 项目的一部分。
// src/vector.rs - 掩膜矢量化为地理多边形
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

use std::{collections::HashMap, path::Path};

use image::Luma;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info};

use crate::raster::{BinaryMask, GeoTransform};

#[derive(Error, Debug)]
pub enum VectorizeError {
  /// 掩膜全为背景；调用方应视为“没有检测结果”而不是故障
  #[error("掩膜中没有前景像素")]
  NoFeatures,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("GeoJSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

type Corner = (i64, i64);

#[derive(Debug, Clone, PartialEq)]
pub struct PolygonFeature {
  pub id: u32,
  pub category: Option<String>,
  pub pixel_area: u32,
  /// 闭合外环，首尾点相同
  pub exterior: Vec<[f64; 2]>,
  pub holes: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
  pub crs: Option<String>,
  pub features: Vec<PolygonFeature>,
}

impl FeatureCollection {
  pub fn len(&self) -> usize {
    self.features.len()
  }

  pub fn is_empty(&self) -> bool {
    self.features.is_empty()
  }

  pub fn to_geojson(&self) -> Value {
    let features = self
      .features
      .iter()
      .map(|f| {
        let mut rings = vec![f.exterior.clone()];
        rings.extend(f.holes.iter().cloned());
        json!({
          "type": "Feature",
          "id": f.id,
          "properties": {
            "id": f.id,
            "category": f.category,
            "pixel_area": f.pixel_area,
          },
          "geometry": {
            "type": "Polygon",
            "coordinates": rings,
          },
        })
      })
      .collect::<Vec<_>>();

    let mut collection = json!({
      "type": "FeatureCollection",
      "features": features,
    });
    if let Some(crs) = &self.crs {
      collection["crs"] = json!({
        "type": "name",
        "properties": { "name": crs },
      });
    }
    collection
  }

  pub fn write_geojson(&self, path: &Path) -> Result<(), VectorizeError> {
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let text = serde_json::to_string_pretty(&self.to_geojson())?;
    std::fs::write(path, text)?;
    info!("保存 {} 个多边形到: {}", self.len(), path.display());
    Ok(())
  }
}

/// 将二值掩膜的每个四连通前景区域转换为一个多边形要素
#[derive(Debug, Clone, Default)]
pub struct Vectorizer {
  category: Option<String>,
  min_pixel_area: u32,
}

impl Vectorizer {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn with_category(mut self, category: impl Into<String>) -> Self {
    self.category = Some(category.into());
    self
  }

  /// 丢弃面积小于该像素数的区域
  pub fn with_min_pixel_area(mut self, min_pixel_area: u32) -> Self {
    self.min_pixel_area = min_pixel_area;
    self
  }

  pub fn to_vector(&self, mask: &BinaryMask) -> Result<FeatureCollection, VectorizeError> {
    if mask.is_empty() {
      return Err(VectorizeError::NoFeatures);
    }

    let labels = connected_components(mask.as_gray(), Connectivity::Four, Luma([0u8]));
    let (width, height) = labels.dimensions();
    let label_at = |x: i64, y: i64| -> u32 {
      if x < 0 || y < 0 || x >= width as i64 || y >= height as i64 {
        0
      } else {
        labels.get_pixel(x as u32, y as u32)[0]
      }
    };

    // 按首个像素的扫描顺序编号，保证 id 稳定
    let mut order: HashMap<u32, usize> = HashMap::new();
    let mut components: Vec<(Vec<(Corner, Corner)>, u32)> = Vec::new();
    for y in 0..height as i64 {
      for x in 0..width as i64 {
        let label = label_at(x, y);
        if label == 0 {
          continue;
        }
        let idx = *order.entry(label).or_insert_with(|| {
          components.push((Vec::new(), 0));
          components.len() - 1
        });
        let (edges, area) = &mut components[idx];
        *area += 1;
        if label_at(x, y - 1) != label {
          edges.push(((x, y), (x + 1, y)));
        }
        if label_at(x + 1, y) != label {
          edges.push(((x + 1, y), (x + 1, y + 1)));
        }
        if label_at(x, y + 1) != label {
          edges.push(((x + 1, y + 1), (x, y + 1)));
        }
        if label_at(x - 1, y) != label {
          edges.push(((x, y + 1), (x, y)));
        }
      }
    }
    debug!("掩膜包含 {} 个连通区域", components.len());

    let transform = mask
      .georef()
      .map(|g| g.transform)
      .unwrap_or_else(GeoTransform::identity);

    let mut features = Vec::new();
    for (edges, area) in components {
      if area < self.min_pixel_area {
        continue;
      }
      let mut rings = trace_rings(&edges);
      let outer = rings
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| signed_area(a).abs().total_cmp(&signed_area(b).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0);
      let exterior = rings.swap_remove(outer);

      features.push(PolygonFeature {
        id: features.len() as u32 + 1,
        category: self.category.clone(),
        pixel_area: area,
        exterior: to_geo_ring(&exterior, &transform),
        holes: rings.iter().map(|r| to_geo_ring(r, &transform)).collect(),
      });
    }

    if features.is_empty() {
      return Err(VectorizeError::NoFeatures);
    }

    Ok(FeatureCollection {
      crs: mask.georef().and_then(|g| g.crs.clone()),
      features,
    })
  }
}

/// 把有向边首尾相连为闭合环；前景始终位于行进方向右侧
fn trace_rings(edges: &[(Corner, Corner)]) -> Vec<Vec<Corner>> {
  let mut outgoing: HashMap<Corner, Vec<usize>> = HashMap::new();
  for (i, (from, _)) in edges.iter().enumerate() {
    outgoing.entry(*from).or_default().push(i);
  }

  let mut used = vec![false; edges.len()];
  let mut rings = Vec::new();
  for start in 0..edges.len() {
    if used[start] {
      continue;
    }
    let origin = edges[start].0;
    let mut ring = vec![origin];
    let mut current = start;
    loop {
      used[current] = true;
      let (from, to) = edges[current];
      if to == origin {
        break;
      }
      ring.push(to);

      let dir = (to.0 - from.0, to.1 - from.1);
      // 在夹点处优先右转，再直行，最后左转
      let preference = [(-dir.1, dir.0), dir, (dir.1, -dir.0)];
      let candidates = outgoing.get(&to).map(Vec::as_slice).unwrap_or(&[]);
      let next = preference.iter().find_map(|want| {
        candidates.iter().copied().find(|&c| {
          let (a, b) = edges[c];
          !used[c] && (b.0 - a.0, b.1 - a.1) == *want
        })
      });
      match next {
        Some(next) => current = next,
        None => break,
      }
    }
    rings.push(simplify(ring));
  }
  rings
}

/// 删除共线的中间顶点
fn simplify(ring: Vec<Corner>) -> Vec<Corner> {
  let n = ring.len();
  if n < 4 {
    return ring;
  }
  (0..n)
    .filter(|&i| {
      let prev = ring[(i + n - 1) % n];
      let cur = ring[i];
      let next = ring[(i + 1) % n];
      let d1 = (cur.0 - prev.0, cur.1 - prev.1);
      let d2 = (next.0 - cur.0, next.1 - cur.1);
      d1.0 * d2.1 - d1.1 * d2.0 != 0
    })
    .map(|i| ring[i])
    .collect()
}

fn signed_area(ring: &[Corner]) -> f64 {
  let n = ring.len();
  let twice: i64 = (0..n)
    .map(|i| {
      let (x0, y0) = ring[i];
      let (x1, y1) = ring[(i + 1) % n];
      x0 * y1 - x1 * y0
    })
    .sum();
  twice as f64 / 2.0
}

fn to_geo_ring(ring: &[Corner], transform: &GeoTransform) -> Vec<[f64; 2]> {
  let mut out: Vec<[f64; 2]> = ring
    .iter()
    .map(|&(x, y)| {
      let (gx, gy) = transform.pixel_to_geo(x as f64, y as f64);
      [gx, gy]
    })
    .collect();
  if let Some(first) = out.first().copied() {
    out.push(first);
  }
  // 像素网格上外环的方向在 y 轴翻转（北朝上）后会颠倒，
  // 翻转回来使外环为逆时针、内环为顺时针
  let c = &transform.0;
  if c[1] * c[5] - c[2] * c[4] < 0.0 {
    out.reverse();
  }
  out
}

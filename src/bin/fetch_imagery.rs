// 该文件是 Jufeng （飓风） 项目的一部分。
// src/bin/fetch_imagery.rs - 下载灾后影像
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

use anyhow::Result;
use clap::Parser;
use tracing::info;

use jufeng::input::{Acquire, BoundingBox, PINELLAS_AREAS, TileImageInput, TileSource};

/// 从瓦片服务下载指定范围的影像
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 范围 W,S,E,N (WGS84)
  #[arg(
    long,
    value_name = "W,S,E,N",
    allow_hyphen_values = true,
    required_unless_present = "area",
    conflicts_with = "area"
  )]
  pub bbox: Option<BoundingBox>,
  /// 预设区域，例如 clearwater_beach、st_pete_beach
  #[arg(long, value_name = "NAME")]
  pub area: Option<String>,
  /// 缩放级别
  #[arg(long, default_value_t = 18)]
  pub zoom: u8,
  /// 瓦片源: milton, helene, esri, custom
  #[arg(long, default_value = "milton")]
  pub source: String,
  /// 自定义瓦片模板，包含 {z}/{x}/{y}
  #[arg(long, value_name = "URL")]
  pub template: Option<String>,
  /// 输出 PNG 路径，坐标参考写入同名 .geo.json
  #[arg(long, value_name = "FILE", default_value = "imagery.png")]
  pub output: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();
  let source = TileSource::from_name(&args.source, args.template.as_deref())?;
  let bbox = match (&args.area, args.bbox) {
    (Some(area), _) => {
      info!("使用预设区域: {}", area);
      BoundingBox::preset(area)?
    }
    (None, Some(bbox)) => bbox,
    (None, None) => anyhow::bail!(
      "需要 --bbox 或 --area, 可选区域: {}",
      PINELLAS_AREAS.map(|(name, _)| name).join(", ")
    ),
  };
  info!("瓦片源: {:?}, 范围: {:?}, 缩放级别: {}", source, bbox, args.zoom);

  let now = std::time::Instant::now();
  let image = TileImageInput::new(source, bbox, args.zoom, &args.output).acquire()?;
  info!("下载完成，耗时: {:.2?}, 输出: {}", now.elapsed(), image.path.display());

  Ok(())
}

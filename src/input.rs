// 该文件是 Jufeng （飓风） 项目的一部分。
// src/input.rs - 影像获取
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

use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  raster::{ImageRef, RasterError},
};

/// 影像来源：返回带坐标参考信息的栅格文件
pub trait Acquire {
  type Error;
  fn acquire(&self) -> Result<ImageRef, Self::Error>;
}

mod tiles;
pub use self::tiles::{
  BoundingBox, PINELLAS_AREAS, TileError, TileFetcher, TileImageInput, TileMosaic, TileRange,
  TileSource,
};
#[cfg(feature = "tile_download")]
pub use self::tiles::HttpTileFetcher;

#[derive(Error, Debug)]
pub enum InputError {
  #[error("影像文件输入错误: {0}")]
  ImageFileInputError(#[from] RasterError),
  #[error("瓦片下载错误: {0}")]
  TileError(#[from] TileError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无法解析本地路径: {0}")]
  InvalidPath(String),
}

/// 本地上传的影像文件
pub struct ImageFileInput {
  path: PathBuf,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "file";
}

impl FromUrl for ImageFileInput {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::SchemeMismatch);
    }
    let path = crate::url_file_path(url).ok_or_else(|| InputError::InvalidPath(url.to_string()))?;
    Ok(ImageFileInput::new(path))
  }
}

impl ImageFileInput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }
}

impl Acquire for ImageFileInput {
  type Error = InputError;

  fn acquire(&self) -> Result<ImageRef, Self::Error> {
    info!("读取影像文件: {}", self.path.display());
    Ok(ImageRef::open(&self.path)?)
  }
}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  #[cfg(feature = "tile_download")]
  Tiles(TileImageInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::SCHEME {
      return Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?));
    }
    #[cfg(feature = "tile_download")]
    {
      if url.scheme() == TileImageInput::SCHEME {
        return Ok(InputWrapper::Tiles(TileImageInput::from_url(url)?));
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Acquire for InputWrapper {
  type Error = InputError;

  fn acquire(&self) -> Result<ImageRef, Self::Error> {
    match self {
      InputWrapper::ImageFile(input) => input.acquire(),
      #[cfg(feature = "tile_download")]
      InputWrapper::Tiles(input) => {
        let fetcher = HttpTileFetcher::new()?;
        Ok(input.acquire_with(&fetcher)?)
      }
    }
  }
}

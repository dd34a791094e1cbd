// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::RgbFrame, url_to_path};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Invalid path encoding: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

fn load_frame(path: &Path) -> Result<RgbFrame, ImageFileInputError> {
  let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
  debug!("读取图像 {:?}: {}x{}", path, image.width(), image.height());
  Ok(image.to_rgb8().into())
}

fn is_image_file(path: &Path) -> bool {
  path.is_file()
    && path
      .extension()
      .map(|ext| {
        let ext = ext.to_string_lossy().to_lowercase();
        IMAGE_EXTENSIONS.contains(&ext.as_str())
      })
      .unwrap_or(false)
}

/// 单张图像：`image:///path/to/food.jpg`
pub struct ImageFileInput {
  image: Option<RgbFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_to_path(url)?;
    Self::open(path)
  }
}

impl ImageFileInput {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, ImageFileInputError> {
    let frame = load_frame(path.as_ref())?;
    Ok(ImageFileInput { image: Some(frame) })
  }
}

impl Iterator for ImageFileInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 目录下的全部图像，按文件名排序：`folder:///path/to/photos`
pub struct ImageDirInput {
  files: std::vec::IntoIter<PathBuf>,
}

impl FromUrlWithScheme for ImageDirInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for ImageDirInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    let path = url_to_path(url)?;
    Self::open(path)
  }
}

impl ImageDirInput {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, ImageFileInputError> {
    let directory = directory.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if is_image_file(&path) {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {:?} 中共有 {} 张图像", directory, files.len());

    Ok(ImageDirInput {
      files: files.into_iter(),
    })
  }
}

impl Iterator for ImageDirInput {
  type Item = RgbFrame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      match load_frame(&path) {
        Ok(frame) => return Some(frame),
        Err(e) => error!("跳过无法读取的图像 {:?}: {}", path, e),
      }
    }
    None
  }
}

// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/frame.rs - RGB 帧定义
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

use std::io::Cursor;

use image::{ImageBuffer, ImageReader, Rgb, RgbImage, imageops::FilterType};
use tracing::debug;

use crate::model::InferenceError;

pub const RGB_CHANNELS: usize = 3;

/// 网络期望的通道顺序
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

impl std::str::FromStr for ChannelOrder {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "rgb" => Ok(ChannelOrder::Rgb),
      "bgr" => Ok(ChannelOrder::Bgr),
      other => Err(format!("未知通道顺序: {}", other)),
    }
  }
}

/// 解码后的 RGB 图像，HWC 交错存储，不可变
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RgbFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl RgbFrame {
  /// 由原始像素构造，`channels` 必须为 3
  pub fn from_raw(
    width: u32,
    height: u32,
    channels: usize,
    data: Vec<u8>,
  ) -> Result<Self, InferenceError> {
    if channels != RGB_CHANNELS {
      return Err(InferenceError::ChannelMismatch(channels));
    }

    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(InferenceError::ShapeMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 从内存中的编码图像（PNG/JPEG 等）解码
  pub fn decode(bytes: &[u8]) -> Result<Self, InferenceError> {
    if bytes.is_empty() {
      return Err(InferenceError::EmptyImage);
    }

    let image = ImageReader::new(Cursor::new(bytes))
      .with_guessed_format()?
      .decode()?;
    debug!("图像解码完成: {}x{}", image.width(), image.height());

    Ok(image.to_rgb8().into())
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn is_empty(&self) -> bool {
    self.width == 0 || self.height == 0
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  /// 缩放到网络输入尺寸，归一化到 [0,1]，输出 NCHW 排列的 `f32` 张量数据
  pub fn to_nchw_f32(
    &self,
    width: u32,
    height: u32,
    order: ChannelOrder,
  ) -> Result<Vec<f32>, InferenceError> {
    if self.is_empty() || width == 0 || height == 0 {
      return Err(InferenceError::EmptyImage);
    }

    let view: ImageBuffer<Rgb<u8>, &[u8]> =
      ImageBuffer::from_raw(self.width, self.height, &self.data[..]).ok_or(
        InferenceError::ShapeMismatch {
          expected: RGB_CHANNELS * self.width as usize * self.height as usize,
          actual: self.data.len(),
        },
      )?;
    let resized = image::imageops::resize(&view, width, height, FilterType::Triangle);

    let plane = (width * height) as usize;
    let mut tensor = vec![0f32; RGB_CHANNELS * plane];
    let channel_map: [usize; RGB_CHANNELS] = match order {
      ChannelOrder::Rgb => [0, 1, 2],
      ChannelOrder::Bgr => [2, 1, 0],
    };

    for (idx, pixel) in resized.pixels().enumerate() {
      for (plane_idx, &src) in channel_map.iter().enumerate() {
        tensor[plane_idx * plane + idx] = pixel[src] as f32 / 255.0;
      }
    }

    Ok(tensor)
  }

  pub fn to_rgb_image(&self) -> Option<RgbImage> {
    RgbImage::from_raw(self.width, self.height, self.data.to_vec())
  }
}

impl From<RgbImage> for RgbFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn rejects_non_rgb_channel_count() {
    let err = RgbFrame::from_raw(2, 2, 4, vec![0; 16]).unwrap_err();
    assert!(matches!(err, InferenceError::ChannelMismatch(4)));
  }

  #[test]
  fn rejects_mismatched_buffer_length() {
    let err = RgbFrame::from_raw(2, 2, 3, vec![0; 11]).unwrap_err();
    assert!(matches!(
      err,
      InferenceError::ShapeMismatch {
        expected: 12,
        actual: 11
      }
    ));
  }

  #[test]
  fn empty_frame_cannot_become_tensor() {
    let frame = RgbFrame::from_raw(0, 0, 3, Vec::new()).unwrap();
    assert!(frame.is_empty());
    assert!(matches!(
      frame.to_nchw_f32(416, 416, ChannelOrder::Rgb),
      Err(InferenceError::EmptyImage)
    ));
  }

  #[test]
  fn tensor_is_normalized_planar_and_channel_ordered() {
    // 单色图像缩放后像素不变
    let pixels = [255u8, 0, 51].repeat(4);
    let frame = RgbFrame::from_raw(2, 2, 3, pixels).unwrap();

    let rgb = frame.to_nchw_f32(3, 3, ChannelOrder::Rgb).unwrap();
    assert_eq!(rgb.len(), 27);
    assert!(rgb[..9].iter().all(|&v| (v - 1.0).abs() < 1e-6));
    assert!(rgb[9..18].iter().all(|&v| v.abs() < 1e-6));
    assert!(rgb[18..].iter().all(|&v| (v - 0.2).abs() < 1e-6));

    let bgr = frame.to_nchw_f32(3, 3, ChannelOrder::Bgr).unwrap();
    assert!(bgr[..9].iter().all(|&v| (v - 0.2).abs() < 1e-6));
    assert!(bgr[18..].iter().all(|&v| (v - 1.0).abs() < 1e-6));
  }

  #[test]
  fn decode_rejects_garbage_bytes() {
    assert!(matches!(
      RgbFrame::decode(&[]),
      Err(InferenceError::EmptyImage)
    ));
    assert!(RgbFrame::decode(b"definitely not an image").is_err());
  }

  #[test]
  fn channel_order_parses_case_insensitively() {
    assert_eq!("BGR".parse::<ChannelOrder>(), Ok(ChannelOrder::Bgr));
    assert_eq!("rgb".parse::<ChannelOrder>(), Ok(ChannelOrder::Rgb));
    assert!("rgba".parse::<ChannelOrder>().is_err());
  }
}

// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/postprocess.rs - 检测后处理
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

use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.4;

/// 像素坐标下的矩形框，原点在左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BBox {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 负的宽高按 0 计
  pub fn area(&self) -> i64 {
    self.width.max(0) as i64 * self.height.max(0) as i64
  }

  pub fn intersection_area(&self, other: &BBox) -> i64 {
    let x1 = self.x.max(other.x) as i64;
    let y1 = self.y.max(other.y) as i64;
    let x2 =
      (self.x as i64 + self.width.max(0) as i64).min(other.x as i64 + other.width.max(0) as i64);
    let y2 =
      (self.y as i64 + self.height.max(0) as i64).min(other.y as i64 + other.height.max(0) as i64);

    (x2 - x1).max(0) * (y2 - y1).max(0)
  }

  /// 计算两个边界框的 IoU，不相交或并集为空时为 0
  pub fn iou(&self, other: &BBox) -> f32 {
    let intersection = self.intersection_area(other);
    if intersection == 0 {
      return 0.0;
    }
    let union = self.area() + other.area() - intersection;
    if union > 0 {
      (intersection as f64 / union as f64) as f32
    } else {
      0.0
    }
  }
}

/// 抑制前的候选检测
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
  pub bbox: BBox,
  pub class_id: usize,
  pub confidence: f32,
}

mod decode;
mod nms;

pub use self::decode::{BOX_LEN, DecodeError, SCORE_OFFSET, decode};
pub use self::nms::{SuppressionMode, suppress, suppress_with};

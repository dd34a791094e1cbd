// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/postprocess/decode.rs - 检测框解码
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

use thiserror::Error;
use tracing::debug;

use super::{BBox, Candidate};
use crate::model::TensorView;

/// 预测向量前 4 个值为归一化的 `[cx, cy, w, h]`
pub const BOX_LEN: usize = 4;
/// 第 5 个值为目标置信度，类别分数从这里开始
pub const SCORE_OFFSET: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("检测头 {head} 的预测向量长度为 {len}, 至少需要 {min}")]
  RowTooShort { head: usize, len: usize, min: usize },
}

/// 将检测头输出解码为像素坐标下的候选框。
///
/// 每行取最大类别分数（并列取最小下标），严格大于 `confidence_threshold`
/// 才产生候选。输出顺序为检测头顺序、再按行顺序。
pub fn decode<T: TensorView>(
  heads: &[T],
  image_width: u32,
  image_height: u32,
  confidence_threshold: f32,
) -> Result<Vec<Candidate>, DecodeError> {
  let scale_x = image_width as f64;
  let scale_y = image_height as f64;
  let mut candidates = Vec::new();

  for (head_idx, head) in heads.iter().enumerate() {
    if head.rows() > 0 && head.cols() <= SCORE_OFFSET {
      return Err(DecodeError::RowTooShort {
        head: head_idx,
        len: head.cols(),
        min: SCORE_OFFSET + 1,
      });
    }

    for row_idx in 0..head.rows() {
      let row = head.row(row_idx);
      let (class_id, confidence) = best_class(&row[SCORE_OFFSET..]);
      if !(confidence > confidence_threshold) {
        continue;
      }

      let cx = (row[0] as f64 * scale_x) as i32;
      let cy = (row[1] as f64 * scale_y) as i32;
      let w = (row[2] as f64 * scale_x) as i32;
      let h = (row[3] as f64 * scale_y) as i32;

      candidates.push(Candidate {
        bbox: BBox {
          x: (cx as f64 - w as f64 / 2.0) as i32,
          y: (cy as f64 - h as f64 / 2.0) as i32,
          width: w,
          height: h,
        },
        class_id,
        confidence,
      });
    }
  }

  debug!("解码得到 {} 个候选框", candidates.len());
  Ok(candidates)
}

/// 取最大分数的类别；出现 NaN 时返回第一个 NaN，使该行被阈值过滤
fn best_class(scores: &[f32]) -> (usize, f32) {
  if let Some(idx) = scores.iter().position(|score| score.is_nan()) {
    return (idx, f32::NAN);
  }
  let mut class_id = 0usize;
  let mut best = scores[0];
  for (idx, &score) in scores.iter().enumerate().skip(1) {
    if score > best {
      best = score;
      class_id = idx;
    }
  }
  (class_id, best)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::HeadTensor;

  fn prediction(cx: f32, cy: f32, w: f32, h: f32, scores: &[f32]) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, 1.0];
    row.extend_from_slice(scores);
    row
  }

  #[test]
  fn converts_normalized_center_form_to_pixel_corners() {
    let head = HeadTensor::from_rows(&[prediction(0.5, 0.5, 0.25, 0.5, &[0.1, 0.9, 0.0])]).unwrap();
    let candidates = decode(&[head], 640, 480, 0.5).unwrap();

    assert_eq!(candidates.len(), 1);
    let candidate = candidates[0];
    assert_eq!(candidate.class_id, 1);
    assert!((candidate.confidence - 0.9).abs() < 1e-6);
    assert_eq!(candidate.bbox, BBox::new(240, 120, 160, 240));
  }

  #[test]
  fn truncates_pixel_values_toward_zero() {
    // cx = 33.3 -> 33, w = 9.99 -> 9, x = 33 - 4.5 = 28.5 -> 28
    let head = HeadTensor::from_rows(&[prediction(0.333, 0.0, 0.0999, 0.0, &[0.8])]).unwrap();
    let candidates = decode(&[head], 100, 100, 0.5).unwrap();
    assert_eq!(candidates[0].bbox, BBox::new(28, 0, 9, 0));

    // 靠近左上角的框允许为负坐标
    // cx = 1.5 -> 1, w = 25, x = 1 - 12.5 = -11.5 -> -11
    let head = HeadTensor::from_rows(&[prediction(0.015, 0.015, 0.25, 0.25, &[0.8])]).unwrap();
    let candidates = decode(&[head], 100, 100, 0.5).unwrap();
    assert_eq!(candidates[0].bbox, BBox::new(-11, -11, 25, 25));
  }

  #[test]
  fn never_emits_candidates_at_or_below_threshold() {
    let head = HeadTensor::from_rows(&[
      prediction(0.5, 0.5, 0.1, 0.1, &[0.5, 0.2]),
      prediction(0.5, 0.5, 0.1, 0.1, &[0.2, 0.50001]),
      prediction(0.5, 0.5, 0.1, 0.1, &[0.49, 0.3]),
      prediction(0.5, 0.5, 0.1, 0.1, &[f32::NAN, 0.3]),
    ])
    .unwrap();

    for threshold in [0.0f32, 0.3, 0.5, 0.7] {
      let candidates = decode(&[head.clone()], 416, 416, threshold).unwrap();
      assert!(candidates.iter().all(|c| c.confidence > threshold));
    }
    let candidates = decode(&[head], 416, 416, 0.5).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class_id, 1);
  }

  #[test]
  fn rows_with_any_nan_score_are_dropped() {
    let head = HeadTensor::from_rows(&[
      prediction(0.5, 0.5, 0.1, 0.1, &[0.2, f32::NAN, 0.9]),
      prediction(0.5, 0.5, 0.1, 0.1, &[0.2, 0.3, f32::NAN]),
      prediction(0.5, 0.5, 0.1, 0.1, &[0.2, 0.3, 0.8]),
    ])
    .unwrap();
    let candidates = decode(&[head], 10, 10, 0.5).unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0].class_id, 2);
    assert!((candidates[0].confidence - 0.8).abs() < 1e-6);
  }

  #[test]
  fn equal_scores_pick_the_first_class() {
    let head = HeadTensor::from_rows(&[prediction(0.5, 0.5, 0.1, 0.1, &[0.2, 0.7, 0.7])]).unwrap();
    let candidates = decode(&[head], 10, 10, 0.5).unwrap();
    assert_eq!(candidates[0].class_id, 1);
  }

  #[test]
  fn objectness_is_not_a_class_score() {
    let mut row = prediction(0.5, 0.5, 0.1, 0.1, &[0.1, 0.2]);
    row[4] = 0.99;
    let head = HeadTensor::from_rows(&[row]).unwrap();
    assert!(decode(&[head], 10, 10, 0.5).unwrap().is_empty());
  }

  #[test]
  fn order_follows_heads_then_rows() {
    let first = HeadTensor::from_rows(&[
      prediction(0.1, 0.1, 0.1, 0.1, &[0.6, 0.0]),
      prediction(0.2, 0.2, 0.1, 0.1, &[0.0, 0.7]),
    ])
    .unwrap();
    let second = HeadTensor::from_rows(&[prediction(0.3, 0.3, 0.1, 0.1, &[0.95, 0.0])]).unwrap();

    let heads = [first, second];
    let a = decode(&heads, 100, 100, 0.5).unwrap();
    let b = decode(&heads, 100, 100, 0.5).unwrap();
    assert_eq!(a, b);
    let xs: Vec<i32> = a.iter().map(|c| c.bbox.x).collect();
    assert_eq!(xs, vec![5, 15, 25]);
  }

  #[test]
  fn rows_without_class_scores_are_malformed() {
    let head = HeadTensor::from_rows(&[[0.5f32, 0.5, 0.1, 0.1, 1.0]]).unwrap();
    assert_eq!(
      decode(&[head], 10, 10, 0.5),
      Err(DecodeError::RowTooShort {
        head: 0,
        len: 5,
        min: 6
      })
    );
  }

  #[test]
  fn empty_heads_decode_to_nothing() {
    let heads: [HeadTensor; 0] = [];
    assert!(decode(&heads, 10, 10, 0.5).unwrap().is_empty());
  }
}

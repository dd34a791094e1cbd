// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/postprocess/nms.rs - 非极大值抑制
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

use tracing::debug;

use super::Candidate;

/// 抑制时是否区分类别
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SuppressionMode {
  /// 不同类别的框也互相抑制
  #[default]
  CrossClass,
  /// 仅抑制同类别的框
  PerClass,
}

impl SuppressionMode {
  fn compares(self, kept: &Candidate, other: &Candidate) -> bool {
    match self {
      SuppressionMode::CrossClass => true,
      SuppressionMode::PerClass => kept.class_id == other.class_id,
    }
  }
}

/// 跨类别贪心 NMS
pub fn suppress(
  candidates: &[Candidate],
  confidence_threshold: f32,
  iou_threshold: f32,
) -> Vec<Candidate> {
  suppress_with(
    candidates,
    confidence_threshold,
    iou_threshold,
    SuppressionMode::CrossClass,
  )
}

/// 贪心 NMS：先丢弃不高于 `confidence_threshold` 的候选，按置信度降序
/// （稳定排序，相同置信度先插入者优先）逐个保留，与已保留框 IoU 不小于
/// `iou_threshold` 的候选被丢弃。返回顺序即保留顺序。
pub fn suppress_with(
  candidates: &[Candidate],
  confidence_threshold: f32,
  iou_threshold: f32,
  mode: SuppressionMode,
) -> Vec<Candidate> {
  let mut order: Vec<&Candidate> = candidates
    .iter()
    .filter(|c| c.confidence > confidence_threshold)
    .collect();
  order.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Candidate> = Vec::with_capacity(order.len());
  for candidate in order {
    let overlapped = kept
      .iter()
      .any(|k| mode.compares(k, candidate) && k.bbox.iou(&candidate.bbox) >= iou_threshold);
    if !overlapped {
      kept.push(*candidate);
    }
  }

  debug!(
    "NMS: {} 个候选, 保留 {} 个 ({:?})",
    candidates.len(),
    kept.len(),
    mode
  );
  kept
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::postprocess::BBox;

  fn candidate(x: i32, y: i32, w: i32, h: i32, class_id: usize, confidence: f32) -> Candidate {
    Candidate {
      bbox: BBox::new(x, y, w, h),
      class_id,
      confidence,
    }
  }

  #[test]
  fn heavily_overlapping_duplicate_keeps_the_stronger_box() {
    let weak = candidate(0, 0, 100, 90, 46, 0.6);
    let strong = candidate(0, 0, 100, 100, 46, 0.8);
    assert!((weak.bbox.iou(&strong.bbox) - 0.9).abs() < 1e-6);

    let kept = suppress(&[weak, strong], 0.5, 0.4);
    assert_eq!(kept, vec![strong]);
  }

  #[test]
  fn lightly_overlapping_boxes_both_survive() {
    let a = candidate(0, 0, 11, 10, 46, 0.9);
    let b = candidate(9, 0, 11, 10, 47, 0.7);
    assert!((a.bbox.iou(&b.bbox) - 0.1).abs() < 1e-6);

    let kept = suppress(&[b, a], 0.5, 0.4);
    assert_eq!(kept, vec![a, b]);
  }

  #[test]
  fn empty_input_gives_empty_output() {
    assert!(suppress(&[], 0.5, 0.4).is_empty());
  }

  #[test]
  fn iou_equal_to_threshold_is_suppressed() {
    // IoU = 50 / 150 ≈ 0.333
    let a = candidate(0, 0, 10, 10, 0, 0.9);
    let b = candidate(5, 0, 10, 10, 0, 0.8);
    let iou = a.bbox.iou(&b.bbox);
    assert_eq!(suppress(&[a, b], 0.5, iou), vec![a]);
    assert_eq!(suppress(&[a, b], 0.5, iou + 1e-4), vec![a, b]);
  }

  #[test]
  fn equal_confidence_prefers_earlier_candidate() {
    let first = candidate(0, 0, 10, 10, 1, 0.7);
    let second = candidate(1, 1, 10, 10, 2, 0.7);
    assert_eq!(suppress(&[first, second], 0.5, 0.4), vec![first]);
    assert_eq!(suppress(&[second, first], 0.5, 0.4), vec![second]);
  }

  #[test]
  fn candidates_not_above_confidence_threshold_are_dropped() {
    let low = candidate(0, 0, 10, 10, 0, 0.5);
    let high = candidate(100, 100, 10, 10, 0, 0.51);
    assert_eq!(suppress(&[low, high], 0.5, 0.4), vec![high]);
  }

  #[test]
  fn suppression_crosses_classes_by_default() {
    let apple = candidate(0, 0, 100, 100, 47, 0.9);
    let orange = candidate(2, 2, 100, 100, 49, 0.8);

    assert_eq!(suppress(&[apple, orange], 0.5, 0.4), vec![apple]);
    assert_eq!(
      suppress_with(&[apple, orange], 0.5, 0.4, SuppressionMode::PerClass),
      vec![apple, orange]
    );
  }

  #[test]
  fn kept_boxes_never_overlap_beyond_threshold() {
    let mut candidates = Vec::new();
    for i in 0..8 {
      for j in 0..8 {
        let confidence = 0.51 + ((i * 8 + j) % 13) as f32 * 0.035;
        candidates.push(candidate(i * 7, j * 5, 20, 15, (i + j) as usize % 3, confidence));
      }
    }

    for iou_threshold in [0.1f32, 0.3, 0.4, 0.6] {
      let kept = suppress(&candidates, 0.5, iou_threshold);
      assert!(!kept.is_empty());
      for (idx, a) in kept.iter().enumerate() {
        for b in &kept[idx + 1..] {
          assert!(a.bbox.iou(&b.bbox) < iou_threshold);
        }
      }
      assert!(kept.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    }
  }
}

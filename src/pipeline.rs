// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/pipeline.rs - 检测与营养汇总流水线
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
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  frame::RgbFrame,
  model::{InferenceError, Model, RawOutputs, Vocabulary},
  nutrition::{NutritionCatalog, NutritionSummary, aggregate},
  postprocess::{
    Candidate, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_IOU_THRESHOLD, DecodeError, SuppressionMode,
    decode, suppress_with,
  },
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  pub confidence: f32,
  pub iou: f32,
  pub mode: SuppressionMode,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE_THRESHOLD,
      iou: DEFAULT_IOU_THRESHOLD,
      mode: SuppressionMode::default(),
    }
  }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ThresholdError {
  #[error("{name} 阈值 {value} 不在 (0, 1] 范围内")]
  OutOfRange { name: &'static str, value: f32 },
}

fn check_threshold(name: &'static str, value: f32) -> Result<f32, ThresholdError> {
  if value > 0.0 && value <= 1.0 {
    Ok(value)
  } else {
    Err(ThresholdError::OutOfRange { name, value })
  }
}

/// 命令行阈值参数解析，范围同 [`Thresholds::new`]
pub fn parse_threshold(s: &str) -> Result<f32, String> {
  let value: f32 = s.parse().map_err(|e| format!("无效的阈值 '{}': {}", s, e))?;
  check_threshold("threshold", value).map_err(|e| e.to_string())
}

impl Thresholds {
  /// 两个阈值都必须在 (0, 1] 内，NaN 被拒绝
  pub fn new(confidence: f32, iou: f32) -> Result<Self, ThresholdError> {
    Ok(Self {
      confidence: check_threshold("confidence", confidence)?,
      iou: check_threshold("iou", iou)?,
      ..Default::default()
    })
  }

  pub fn with_mode(mut self, mode: SuppressionMode) -> Self {
    self.mode = mode;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Input,
  Inference,
  Decode,
  Labeling,
}

impl std::fmt::Display for Stage {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let name = match self {
      Stage::Input => "input",
      Stage::Inference => "inference",
      Stage::Decode => "decode",
      Stage::Labeling => "labeling",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("输入阶段失败: {0}")]
  Input(#[source] InferenceError),
  #[error("推理阶段失败: {0}")]
  Inference(#[source] InferenceError),
  #[error("解码阶段失败: {0}")]
  Decode(#[from] DecodeError),
  #[error("标签阶段失败: 类别编号 {class_id} 超出词表范围 ({vocabulary_len})")]
  Labeling {
    class_id: usize,
    vocabulary_len: usize,
  },
}

impl PipelineError {
  pub fn stage(&self) -> Stage {
    match self {
      PipelineError::Input(_) => Stage::Input,
      PipelineError::Inference(_) => Stage::Inference,
      PipelineError::Decode(_) => Stage::Decode,
      PipelineError::Labeling { .. } => Stage::Labeling,
    }
  }
}

/// 单张图像的检测结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
  pub detections: Vec<String>,
  pub nutrition: NutritionSummary,
  /// 检测到但目录中没有营养数据的标签，按首次出现顺序去重
  pub unmatched: Vec<String>,
}

impl Report {
  pub fn new(
    detections: Vec<String>,
    nutrition: NutritionSummary,
    catalog: &NutritionCatalog,
  ) -> Self {
    let mut unmatched: Vec<String> = Vec::new();
    for label in &detections {
      if !catalog.contains(label) && !unmatched.contains(label) {
        unmatched.push(label.clone());
      }
    }
    Self {
      detections,
      nutrition,
      unmatched,
    }
  }
}

/// 检测 → 解码 → 抑制 → 标签映射 → 营养汇总
pub fn run<M>(
  model: &M,
  vocabulary: &Vocabulary,
  frame: &RgbFrame,
  thresholds: &Thresholds,
  catalog: &NutritionCatalog,
) -> Result<(Vec<String>, NutritionSummary), PipelineError>
where
  M: Model<Input = RgbFrame, Output = RawOutputs, Error = InferenceError>,
{
  if frame.is_empty() {
    return Err(PipelineError::Inference(InferenceError::EmptyImage));
  }

  let raw = model.infer(frame).map_err(PipelineError::Inference)?;
  let candidates = decode(
    raw.heads(),
    frame.width(),
    frame.height(),
    thresholds.confidence,
  )?;
  let kept = suppress_with(
    &candidates,
    thresholds.confidence,
    thresholds.iou,
    thresholds.mode,
  );
  let labels = to_labels(&kept, vocabulary)?;
  let summary = aggregate(&labels, catalog);

  debug!(
    "预测 {} 个, 候选 {} 个, 保留 {} 个",
    raw.num_predictions(),
    candidates.len(),
    labels.len()
  );
  Ok((labels, summary))
}

fn to_labels(kept: &[Candidate], vocabulary: &Vocabulary) -> Result<Vec<String>, PipelineError> {
  kept
    .iter()
    .map(|candidate| {
      vocabulary
        .label(candidate.class_id)
        .map(str::to_string)
        .ok_or(PipelineError::Labeling {
          class_id: candidate.class_id,
          vocabulary_len: vocabulary.len(),
        })
    })
    .collect()
}

/// 启动时构造一次的流水线上下文，之后只读共享
pub struct Pipeline<M> {
  model: M,
  vocabulary: Vocabulary,
  catalog: NutritionCatalog,
  thresholds: Thresholds,
}

impl<M> Pipeline<M>
where
  M: Model<Input = RgbFrame, Output = RawOutputs, Error = InferenceError>,
{
  pub fn new(model: M, vocabulary: Vocabulary, catalog: NutritionCatalog) -> Self {
    info!(
      "流水线就绪: 标签 {} 个, 营养目录 {} 条",
      vocabulary.len(),
      catalog.len()
    );
    Self {
      model,
      vocabulary,
      catalog,
      thresholds: Thresholds::default(),
    }
  }

  pub fn with_thresholds(mut self, thresholds: Thresholds) -> Self {
    self.thresholds = thresholds;
    self
  }

  pub fn thresholds(&self) -> &Thresholds {
    &self.thresholds
  }

  pub fn vocabulary(&self) -> &Vocabulary {
    &self.vocabulary
  }

  pub fn catalog(&self) -> &NutritionCatalog {
    &self.catalog
  }

  pub fn run(&self, frame: &RgbFrame) -> Result<(Vec<String>, NutritionSummary), PipelineError> {
    run(
      &self.model,
      &self.vocabulary,
      frame,
      &self.thresholds,
      &self.catalog,
    )
  }

  pub fn detect(&self, frame: &RgbFrame) -> Result<Report, PipelineError> {
    let (labels, summary) = self.run(frame)?;
    Ok(Report::new(labels, summary, &self.catalog))
  }

  /// 对外入口：编码图像字节 → 检测结果
  pub fn detect_and_aggregate(&self, image_bytes: &[u8]) -> Result<Report, PipelineError> {
    let frame = RgbFrame::decode(image_bytes).map_err(PipelineError::Input)?;
    self.detect(&frame)
  }
}

impl<M> Model for Pipeline<M>
where
  M: Model<Input = RgbFrame, Output = RawOutputs, Error = InferenceError>,
{
  type Input = RgbFrame;
  type Output = Report;
  type Error = PipelineError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.detect(input)
  }
}

// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;
use tracing::{debug, info};

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("模型文件读取错误 {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("标签词表为空: {0:?}")]
  EmptyVocabulary(PathBuf),
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("图像为空")]
  EmptyImage,
  #[error("通道数必须为 3, 实际为 {0}")]
  ChannelMismatch(usize),
  #[error("数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  ShapeMismatch { expected: usize, actual: usize },
  #[error("图像解码错误: {0}")]
  ImageDecode(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出格式错误: {0}")]
  MalformedOutput(String),
}

/// 检测头输出的只读视图：`rows` 个预测向量，每个长度为 `cols`
pub trait TensorView {
  fn rows(&self) -> usize;
  fn cols(&self) -> usize;
  fn row(&self, index: usize) -> &[f32];
}

/// 单个检测头的输出，按行连续存储
#[derive(Debug, Clone, PartialEq)]
pub struct HeadTensor {
  rows: usize,
  cols: usize,
  data: Box<[f32]>,
}

impl HeadTensor {
  pub fn new(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self, InferenceError> {
    let expected = rows.checked_mul(cols).ok_or_else(|| {
      InferenceError::MalformedOutput(format!("输出张量尺寸溢出: {} x {}", rows, cols))
    })?;
    if expected != data.len() {
      return Err(InferenceError::ShapeMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      rows,
      cols,
      data: data.into_boxed_slice(),
    })
  }

  /// 以最后一维为预测向量长度，其余维度展平为行。
  /// 行数或列数为 0 的张量视为无效输出。
  pub fn from_shape(shape: &[usize], data: Vec<f32>) -> Result<Self, InferenceError> {
    let (&cols, outer) = shape
      .split_last()
      .ok_or_else(|| InferenceError::MalformedOutput("输出张量没有维度".to_string()))?;
    let rows = outer
      .iter()
      .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
      .ok_or_else(|| InferenceError::MalformedOutput(format!("输出张量尺寸溢出: {:?}", shape)))?;
    if rows == 0 || cols == 0 {
      return Err(InferenceError::MalformedOutput(format!(
        "输出张量没有预测: {:?}",
        shape
      )));
    }
    Self::new(rows, cols, data)
  }

  /// 由预测向量逐行构造，主要用于测试与替身模型
  pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self, InferenceError> {
    let cols = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
    let mut data = Vec::with_capacity(rows.len() * cols);
    for row in rows {
      let row = row.as_ref();
      if row.len() != cols {
        return Err(InferenceError::ShapeMismatch {
          expected: cols,
          actual: row.len(),
        });
      }
      data.extend_from_slice(row);
    }
    Self::new(rows.len(), cols, data)
  }
}

impl TensorView for HeadTensor {
  fn rows(&self) -> usize {
    self.rows
  }

  fn cols(&self) -> usize {
    self.cols
  }

  fn row(&self, index: usize) -> &[f32] {
    &self.data[index * self.cols..(index + 1) * self.cols]
  }
}

/// 检测器原始输出，按检测头顺序排列
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawOutputs {
  heads: Vec<HeadTensor>,
}

impl RawOutputs {
  pub fn new(heads: Vec<HeadTensor>) -> Self {
    Self { heads }
  }

  pub fn push(&mut self, head: HeadTensor) {
    self.heads.push(head);
  }

  pub fn heads(&self) -> &[HeadTensor] {
    &self.heads
  }

  pub fn num_predictions(&self) -> usize {
    self.heads.iter().map(TensorView::rows).sum()
  }
}

/// 类别词表，行号即类别编号
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Vocabulary {
  labels: Box<[String]>,
}

impl Vocabulary {
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ModelLoadError> {
    let path = path.as_ref();
    info!("加载标签词表: {:?}", path);
    let content = std::fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
      path: path.to_path_buf(),
      source,
    })?;

    let vocabulary = Self::parse(&content);
    if vocabulary.is_empty() {
      return Err(ModelLoadError::EmptyVocabulary(path.to_path_buf()));
    }
    debug!("标签数量: {}", vocabulary.len());
    Ok(vocabulary)
  }

  /// 每行一个标签；整体首尾空白先被去除
  pub fn parse(content: &str) -> Self {
    let content = content.trim();
    if content.is_empty() {
      return Self::default();
    }
    content
      .split('\n')
      .map(|line| line.strip_suffix('\r').unwrap_or(line))
      .collect()
  }

  pub fn label(&self, class_id: usize) -> Option<&str> {
    self.labels.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.labels.len()
  }

  pub fn is_empty(&self) -> bool {
    self.labels.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.labels.iter().map(String::as_str)
  }
}

impl<S: Into<String>> FromIterator<S> for Vocabulary {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      labels: iter.into_iter().map(Into::into).collect(),
    }
  }
}

#[cfg(feature = "model_onnx")]
mod yolo3;
#[cfg(feature = "model_onnx")]
pub use self::yolo3::{Yolo3, Yolo3Builder};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn vocabulary_line_index_is_class_id() {
    let vocabulary = Vocabulary::parse("person\r\nbicycle\ntraffic light\n\n");
    assert_eq!(vocabulary.len(), 3);
    assert_eq!(vocabulary.label(0), Some("person"));
    assert_eq!(vocabulary.label(2), Some("traffic light"));
    assert_eq!(vocabulary.label(3), None);
  }

  #[test]
  fn blank_vocabulary_is_empty() {
    assert!(Vocabulary::parse(" \n\n ").is_empty());
  }

  #[test]
  fn vocabulary_file_must_exist_and_be_non_empty() {
    let missing = Vocabulary::from_file("/nonexistent/coco.names").unwrap_err();
    assert!(matches!(missing, ModelLoadError::Io { .. }));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.names");
    std::fs::write(&path, "\n").unwrap();
    let empty = Vocabulary::from_file(&path).unwrap_err();
    assert!(matches!(empty, ModelLoadError::EmptyVocabulary(_)));
  }

  #[test]
  fn head_tensor_flattens_leading_dimensions() {
    let head = HeadTensor::from_shape(&[1, 2, 3, 4], (0..24).map(|v| v as f32).collect()).unwrap();
    assert_eq!(head.rows(), 6);
    assert_eq!(head.cols(), 4);
    assert_eq!(head.row(5), &[20.0, 21.0, 22.0, 23.0]);
  }

  #[test]
  fn head_tensor_rejects_bad_shapes() {
    assert!(HeadTensor::from_shape(&[], vec![]).is_err());
    assert!(HeadTensor::from_shape(&[3, 0], vec![]).is_err());
    assert!(matches!(
      HeadTensor::from_shape(&[1, 0, 85], vec![]),
      Err(InferenceError::MalformedOutput(_))
    ));
    assert!(matches!(
      HeadTensor::from_shape(&[85], vec![0.0; 85]),
      Ok(head) if head.rows() == 1
    ));
    assert!(HeadTensor::new(2, 3, vec![0.0; 5]).is_err());
    assert!(HeadTensor::from_rows(&[vec![0.0f32; 3], vec![0.0f32; 2]]).is_err());
  }

  #[test]
  fn oversized_shapes_are_errors_not_overflows() {
    assert!(matches!(
      HeadTensor::from_shape(&[usize::MAX, 2, 85], vec![]),
      Err(InferenceError::MalformedOutput(_))
    ));
    assert!(matches!(
      HeadTensor::new(usize::MAX, 85, vec![]),
      Err(InferenceError::MalformedOutput(_))
    ));
  }

  #[test]
  fn raw_outputs_count_predictions_across_heads() {
    let mut raw = RawOutputs::default();
    raw.push(HeadTensor::from_rows(&[[0.0f32; 6]; 3]).unwrap());
    raw.push(HeadTensor::from_rows(&[[0.0f32; 6]; 2]).unwrap());
    assert_eq!(raw.heads().len(), 2);
    assert_eq!(raw.num_predictions(), 5);
  }
}

// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/nutrition.rs - 营养数据目录与汇总
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

use std::collections::{BTreeMap, HashMap};
use std::ops::{Add, AddAssign};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum CatalogError {
  #[error("营养目录读取错误 {path:?}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("营养目录格式错误: {0}")]
  Json(#[from] serde_json::Error),
}

/// 单个标签的营养数据，七个字段缺一不可
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NutritionRecord {
  pub calories: f64,
  pub carbs: f64,
  pub protein: f64,
  pub fat: f64,
  pub fiber: f64,
  pub vitamin_c: f64,
  pub potassium: f64,
}

/// 标签到营养数据的只读映射
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NutritionCatalog {
  records: HashMap<String, NutritionRecord>,
}

impl NutritionCatalog {
  /// 内置目录：香蕉、橙子、苹果（每 100 克）
  pub fn builtin() -> Self {
    [
      (
        "banana",
        NutritionRecord {
          calories: 89.0,
          carbs: 23.0,
          protein: 1.1,
          fat: 0.3,
          fiber: 2.6,
          vitamin_c: 8.7,
          potassium: 358.0,
        },
      ),
      (
        "orange",
        NutritionRecord {
          calories: 62.0,
          carbs: 15.4,
          protein: 1.2,
          fat: 0.2,
          fiber: 3.1,
          vitamin_c: 53.2,
          potassium: 237.0,
        },
      ),
      (
        "apple",
        NutritionRecord {
          calories: 95.0,
          carbs: 25.0,
          protein: 0.5,
          fat: 0.3,
          fiber: 4.4,
          vitamin_c: 8.4,
          potassium: 195.0,
        },
      ),
    ]
    .into_iter()
    .collect()
  }

  /// JSON 对象：`{ "banana": { "calories": 89, ... }, ... }`
  pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
    let records: HashMap<String, NutritionRecord> = serde_json::from_str(json)?;
    Ok(Self { records })
  }

  pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
    let path = path.as_ref();
    info!("加载营养目录: {:?}", path);
    let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let catalog = Self::from_json_str(&content)?;
    debug!("营养目录条目数量: {}", catalog.len());
    Ok(catalog)
  }

  pub fn get(&self, label: &str) -> Option<&NutritionRecord> {
    self.records.get(label)
  }

  pub fn contains(&self, label: &str) -> bool {
    self.records.contains_key(label)
  }

  pub fn len(&self) -> usize {
    self.records.len()
  }

  pub fn is_empty(&self) -> bool {
    self.records.is_empty()
  }
}

impl<S: Into<String>> FromIterator<(S, NutritionRecord)> for NutritionCatalog {
  fn from_iter<I: IntoIterator<Item = (S, NutritionRecord)>>(iter: I) -> Self {
    Self {
      records: iter
        .into_iter()
        .map(|(label, record)| (label.into(), record))
        .collect(),
    }
  }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Macros {
  #[serde(rename = "Carbs")]
  pub carbs: f64,
  #[serde(rename = "Protein")]
  pub protein: f64,
  #[serde(rename = "Fat")]
  pub fat: f64,
  #[serde(rename = "Fiber")]
  pub fiber: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Micros {
  #[serde(rename = "Vitamin C")]
  pub vitamin_c: f64,
  #[serde(rename = "Potassium")]
  pub potassium: f64,
}

/// 营养汇总，每个字段都是所有命中目录的标签之和
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NutritionSummary {
  pub total_calories: f64,
  pub macros: Macros,
  pub micros: Micros,
}

impl NutritionSummary {
  pub fn add_record(&mut self, record: &NutritionRecord) {
    self.total_calories += record.calories;
    self.macros.carbs += record.carbs;
    self.macros.protein += record.protein;
    self.macros.fat += record.fat;
    self.macros.fiber += record.fiber;
    self.micros.vitamin_c += record.vitamin_c;
    self.micros.potassium += record.potassium;
  }

  pub fn is_zero(&self) -> bool {
    *self == Self::default()
  }
}

impl AddAssign for NutritionSummary {
  fn add_assign(&mut self, rhs: Self) {
    self.total_calories += rhs.total_calories;
    self.macros.carbs += rhs.macros.carbs;
    self.macros.protein += rhs.macros.protein;
    self.macros.fat += rhs.macros.fat;
    self.macros.fiber += rhs.macros.fiber;
    self.micros.vitamin_c += rhs.micros.vitamin_c;
    self.micros.potassium += rhs.micros.potassium;
  }
}

impl Add for NutritionSummary {
  type Output = Self;

  fn add(mut self, rhs: Self) -> Self::Output {
    self += rhs;
    self
  }
}

/// 汇总标签列表的营养数据，目录中没有的标签被忽略。
///
/// 按标签字典序累加，因此同一组标签的任意排列得到逐位相同的结果。
pub fn aggregate<S: AsRef<str>>(labels: &[S], catalog: &NutritionCatalog) -> NutritionSummary {
  let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
  for label in labels {
    *counts.entry(label.as_ref()).or_default() += 1;
  }

  let mut summary = NutritionSummary::default();
  for (label, count) in counts {
    match catalog.get(label) {
      Some(record) => {
        for _ in 0..count {
          summary.add_record(record);
        }
      }
      None => debug!("标签 {} 不在营养目录中, 跳过", label),
    }
  }
  summary
}

// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/bin/simple_oneshot.rs - 单张图像检测与营养汇总
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
use url::Url;

use nutriscan::{
  FromUrl, Pipeline, Thresholds,
  input::InputWrapper,
  model::{Vocabulary, Yolo3Builder},
  nutrition::NutritionCatalog,
  output::OutputWrapper,
  pipeline::parse_threshold,
  postprocess::SuppressionMode,
  task::{OneShotTask, Task},
};
use tracing::info;

/// Nutriscan 项目参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// ONNX 模型，例如 yolov3:///models/yolov3.onnx?threads=4
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 类别标签文件，每行一个标签
  #[arg(long, value_name = "LABELS")]
  pub labels: PathBuf,
  /// 营养目录 JSON 文件，缺省时使用内置目录
  #[arg(long, value_name = "CATALOG")]
  pub catalog: Option<PathBuf>,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT", default_value = "stdout:")]
  pub output: Url,
  /// 类别置信度阈值，范围 (0, 1]
  #[arg(long, default_value_t = 0.5, value_parser = parse_threshold)]
  pub confidence: f32,
  /// NMS 的 IoU 阈值，范围 (0, 1]
  #[arg(long, default_value_t = 0.4, value_parser = parse_threshold)]
  pub iou: f32,
  /// 仅在同类别之间做 NMS
  #[arg(long)]
  pub per_class: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mode = if args.per_class {
    SuppressionMode::PerClass
  } else {
    SuppressionMode::CrossClass
  };
  let catalog = match &args.catalog {
    Some(path) => NutritionCatalog::from_json_file(path)?,
    None => NutritionCatalog::builtin(),
  };

  let input = InputWrapper::from_url(&args.input)?;
  let model = Yolo3Builder::from_url(&args.model)?.build()?;
  let vocabulary = Vocabulary::from_file(&args.labels)?;
  let pipeline = Pipeline::new(model, vocabulary, catalog)
    .with_thresholds(Thresholds::new(args.confidence, args.iou)?.with_mode(mode));
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, pipeline, output)?;

  Ok(())
}

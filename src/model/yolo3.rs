// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/model/yolo3.rs - YOLOv3 ONNX 检测器
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
use std::sync::Mutex;

use ort::session::Session;
use ort::value::Tensor;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{ChannelOrder, RGB_CHANNELS, RgbFrame},
  model::{HeadTensor, InferenceError, Model, ModelLoadError, RawOutputs},
  url_to_path,
};

const YOLO3_NUM_INPUTS: usize = 1;
const YOLO3_INPUT_W: u32 = 416;
const YOLO3_INPUT_H: u32 = 416;
const YOLO3_DEFAULT_THREADS: usize = 1;

pub struct Yolo3 {
  // ort 的 run 需要独占会话
  session: Mutex<Session>,
  order: ChannelOrder,
}

pub struct Yolo3Builder {
  model_path: PathBuf,
  threads: usize,
  order: ChannelOrder,
}

impl FromUrlWithScheme for Yolo3Builder {
  const SCHEME: &'static str = "yolov3";
}

impl FromUrl for Yolo3Builder {
  type Error = ModelLoadError;

  /// `yolov3:///path/to/model.onnx?threads=4&order=bgr`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelLoadError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let model_path =
      url_to_path(url).map_err(|e| ModelLoadError::ModelPathError(e.to_string()))?;
    let mut builder = Yolo3Builder::new(model_path);

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "threads" => {
          let threads = value
            .parse()
            .map_err(|_| ModelLoadError::ModelPathError(format!("无效的线程数: {}", value)))?;
          builder = builder.threads(threads);
        }
        "order" => {
          let order = value.parse().map_err(ModelLoadError::ModelPathError)?;
          builder = builder.order(order);
        }
        other => debug!("忽略未知模型参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl Yolo3Builder {
  pub fn new<P: AsRef<Path>>(model_path: P) -> Self {
    Yolo3Builder {
      model_path: model_path.as_ref().to_path_buf(),
      threads: YOLO3_DEFAULT_THREADS,
      order: ChannelOrder::default(),
    }
  }

  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  pub fn order(mut self, order: ChannelOrder) -> Self {
    self.order = order;
    self
  }

  pub fn build(self) -> Result<Yolo3, ModelLoadError> {
    info!("加载模型文件: {:?}", self.model_path);
    let metadata = std::fs::metadata(&self.model_path).map_err(|source| ModelLoadError::Io {
      path: self.model_path.clone(),
      source,
    })?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 ONNX Runtime 推理会话");
    let session = Session::builder()
      .map_err(|e| ModelLoadError::Backend(e.to_string()))?
      .with_intra_threads(self.threads)
      .map_err(|e| ModelLoadError::Backend(e.to_string()))?
      .commit_from_file(&self.model_path)
      .map_err(|e| ModelLoadError::Backend(e.to_string()))?;

    let num_inputs = session.inputs.len();
    if num_inputs != YOLO3_NUM_INPUTS {
      error!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLO3_NUM_INPUTS, num_inputs
      );
      return Err(ModelLoadError::ModelInvalid(format!(
        "预期模型输入数量为 {}, 实际为 {}",
        YOLO3_NUM_INPUTS, num_inputs
      )));
    }
    if session.outputs.is_empty() {
      return Err(ModelLoadError::ModelInvalid("模型没有输出".to_string()));
    }

    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", session.outputs.len());
    info!("模型加载完成");

    Ok(Yolo3 {
      session: Mutex::new(session),
      order: self.order,
    })
  }
}

impl Model for Yolo3 {
  type Input = RgbFrame;
  type Output = RawOutputs;
  type Error = InferenceError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    debug!("预处理输入: {}x{}", input.width(), input.height());
    let data = input.to_nchw_f32(YOLO3_INPUT_W, YOLO3_INPUT_H, self.order)?;
    let shape = [
      1usize,
      RGB_CHANNELS,
      YOLO3_INPUT_H as usize,
      YOLO3_INPUT_W as usize,
    ];
    let tensor = Tensor::from_array((shape, data.into_boxed_slice()))
      .map_err(|e| InferenceError::Backend(e.to_string()))?;

    let mut session = self
      .session
      .lock()
      .map_err(|_| InferenceError::Backend("推理会话锁已中毒".to_string()))?;

    debug!("执行模型推理");
    let outputs = session
      .run(ort::inputs![tensor])
      .map_err(|e| InferenceError::Backend(e.to_string()))?;

    let mut raw = RawOutputs::default();
    for (name, value) in outputs.iter() {
      let (shape, data) = value
        .try_extract_tensor::<f32>()
        .map_err(|e| InferenceError::MalformedOutput(format!("{}: {}", name, e)))?;
      let dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
      debug!("检测头 {}: 形状 {:?}", name, dims);
      raw.push(HeadTensor::from_shape(&dims, data.to_vec())?);
    }

    debug!("模型输出预测数量: {}", raw.num_predictions());
    Ok(raw)
  }
}

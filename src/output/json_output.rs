// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/output/json_output.rs - JSON 结果输出
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

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, frame::RgbFrame, output::Render, pipeline::Report, url_to_path,
};

#[derive(Error, Debug)]
pub enum JsonOutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("路径编码错误: {0}")]
  PathEncoding(#[from] std::string::FromUtf8Error),
  #[error("输出文件锁已损坏")]
  Poisoned,
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

fn to_json(report: &Report, pretty: bool) -> Result<String, serde_json::Error> {
  if pretty {
    serde_json::to_string_pretty(report)
  } else {
    serde_json::to_string(report)
  }
}

fn pretty_from_query(url: &Url) -> bool {
  url
    .query_pairs()
    .find(|(key, _)| key == "pretty")
    .map(|(_, value)| value.is_empty() || value == "true" || value == "1")
    .unwrap_or(false)
}

/// 结果打印到标准输出：`stdout:` 或 `stdout:?pretty`
#[derive(Debug, Default)]
pub struct StdoutOutput {
  pretty: bool,
}

impl StdoutOutput {
  pub fn new(pretty: bool) -> Self {
    Self { pretty }
  }
}

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = JsonOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Ok(Self::new(pretty_from_query(url)))
  }
}

impl Render<RgbFrame, Report> for StdoutOutput {
  type Error = JsonOutputError;

  fn render_result(&self, _frame: &RgbFrame, result: &Report) -> Result<(), Self::Error> {
    let json = to_json(result, self.pretty)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json)?;
    stdout.flush()?;
    Ok(())
  }
}

/// 结果写入文件，每帧一行 JSON：`file:///path/to/report.json`
pub struct JsonFileOutput {
  path: PathBuf,
  writer: Mutex<BufWriter<File>>,
}

impl FromUrlWithScheme for JsonFileOutput {
  const SCHEME: &'static str = "file";
}

impl FromUrl for JsonFileOutput {
  type Error = JsonOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(JsonOutputError::SchemeMismatch(format!(
        "期望输出方式 '{}', 实际输出方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    let path = url_to_path(url)?;
    Self::create(path)
  }
}

impl JsonFileOutput {
  pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, JsonOutputError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    info!("检测结果将写入文件: {:?}", path);

    Ok(Self {
      path: path.to_path_buf(),
      writer: Mutex::new(BufWriter::new(file)),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<RgbFrame, Report> for JsonFileOutput {
  type Error = JsonOutputError;

  fn render_result(&self, _frame: &RgbFrame, result: &Report) -> Result<(), Self::Error> {
    let json = to_json(result, false)?;
    let mut writer = self.writer.lock().map_err(|_| JsonOutputError::Poisoned)?;
    writeln!(writer, "{}", json)?;
    writer.flush()?;
    debug!("写入 {} 个检测结果到 {:?}", result.detections.len(), self.path);
    Ok(())
  }
}

// 该文件是 Nutriscan （果蔬识营） 项目的一部分。
// src/task.rs - 任务调度
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

use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};

use anyhow::Context;
use tracing::{info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 只处理第一帧，任何错误直接返回
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = std::time::Instant::now();
    let result = model.infer(&frame)?;
    let elapsed = now.elapsed();
    info!("推理完成，耗时: {:.2?}", elapsed);
    output.render_result(&frame, &result)?;
    info!("输出完成");

    Ok(())
  }
}

/// 逐帧处理直到输入耗尽、达到帧数上限或收到中断信号。
/// 单帧失败只记录警告，不影响后续帧。
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for ContinuousTask
{
  type Error = anyhow::Error;

  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      flag.store(false, Ordering::SeqCst);
    })
    .context("无法注册 Ctrl-C 处理函数")?;

    let stats = self.process(input, &model, &output, &running);
    info!(
      "任务完成: 共 {} 帧, 成功 {} 帧, 失败 {} 帧",
      stats.frames, stats.succeeded, stats.failed
    );
    Ok(())
  }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TaskStats {
  pub frames: usize,
  pub succeeded: usize,
  pub failed: usize,
}

impl ContinuousTask {
  /// 不注册信号处理的循环主体，`running` 置为 false 后在下一帧前退出
  pub fn process<F, D, I, M, O>(
    &self,
    input: I,
    model: &M,
    output: &O,
    running: &AtomicBool,
  ) -> TaskStats
  where
    I: Iterator<Item = F>,
    M: Model<Input = F, Output = D>,
    M::Error: std::fmt::Display,
    O: Render<F, D>,
    O::Error: std::fmt::Display,
  {
    let mut stats = TaskStats::default();
    for frame in input {
      if !running.load(Ordering::SeqCst) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
      stats.frames += 1;
      info!("处理第 {} 帧图像", stats.frames);

      let now = std::time::Instant::now();
      match model.infer(&frame) {
        Ok(result) => match output.render_result(&frame, &result) {
          Ok(()) => {
            stats.succeeded += 1;
            info!("第 {} 帧完成，耗时: {:.2?}", stats.frames, now.elapsed());
          }
          Err(e) => {
            stats.failed += 1;
            warn!("第 {} 帧输出失败: {}", stats.frames, e);
          }
        },
        Err(e) => {
          stats.failed += 1;
          warn!("第 {} 帧处理失败: {}", stats.frames, e);
        }
      }

      if self.frame_number.map(|n| stats.frames >= n).unwrap_or(false) {
        info!("达到指定帧数 {}, 退出任务循环", stats.frames);
        break;
      }
    }
    stats
  }
}

#[cfg(test)]
mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;

  struct Halve;

  #[derive(Debug, thiserror::Error)]
  #[error("奇数 {0}")]
  struct Odd(u32);

  impl Model for Halve {
    type Input = u32;
    type Output = u32;
    type Error = Odd;

    fn infer(&self, input: &u32) -> Result<u32, Odd> {
      if input % 2 == 0 {
        Ok(input / 2)
      } else {
        Err(Odd(*input))
      }
    }
  }

  #[derive(Default, Clone)]
  struct Collect(Rc<RefCell<Vec<u32>>>);

  impl Render<u32, u32> for Collect {
    type Error = std::io::Error;

    fn render_result(&self, _frame: &u32, result: &u32) -> Result<(), Self::Error> {
      self.0.borrow_mut().push(*result);
      Ok(())
    }
  }

  #[test]
  fn one_shot_uses_only_the_first_frame() {
    let output = Collect::default();
    OneShotTask
      .run_task(vec![4u32, 8].into_iter(), Halve, output.clone())
      .unwrap();
    assert_eq!(*output.0.borrow(), vec![2]);
  }

  #[test]
  fn one_shot_propagates_model_errors() {
    let output = Collect::default();
    assert!(
      OneShotTask
        .run_task(vec![3u32].into_iter(), Halve, output.clone())
        .is_err()
    );
    assert!(
      OneShotTask
        .run_task(Vec::<u32>::new().into_iter(), Halve, output.clone())
        .is_err()
    );
    assert!(output.0.borrow().is_empty());
  }

  #[test]
  fn continuous_skips_failed_frames() {
    let output = Collect::default();
    let running = AtomicBool::new(true);
    let stats =
      ContinuousTask::default().process(vec![2u32, 3, 6].into_iter(), &Halve, &output, &running);

    assert_eq!(
      stats,
      TaskStats {
        frames: 3,
        succeeded: 2,
        failed: 1
      }
    );
    assert_eq!(*output.0.borrow(), vec![1, 3]);
  }

  #[test]
  fn continuous_stops_at_frame_number_or_interrupt() {
    let output = Collect::default();
    let running = AtomicBool::new(true);
    let stats = ContinuousTask::default()
      .with_frame_number(Some(2))
      .process(vec![2u32, 4, 6].into_iter(), &Halve, &output, &running);
    assert_eq!(stats.frames, 2);

    let stopped = AtomicBool::new(false);
    let stats =
      ContinuousTask::default().process(vec![2u32].into_iter(), &Halve, &output, &stopped);
    assert_eq!(stats.frames, 0);
  }
}

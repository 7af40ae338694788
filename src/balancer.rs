//! 动态权重计算模块
//!
//! 按各节点最近一次上报的负载计算负载均衡权重：负载越低，权重越高。
//! 权重推送与调查周期解耦，独立定时运行。

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::queen::Event;
use crate::registry::{FleetSnapshot, Worker, WorkerId};
use crate::shell::{CommandError, ShellCommand};

/// 负载下限，避免为零
pub const EPSILON: f64 = 0.001;
pub const MAX_WEIGHT: u16 = 256;
pub const MIN_WEIGHT: u16 = 1;

/// 根据负载计算权重
///
/// `floor((255 / overloaded) * (overloaded + EPSILON - load)) + 1`，
/// 负载先限制在 `[EPSILON, overloaded]` 内，结果位于 `[1, 256]`。
pub fn weight_for_load(load: f64, overloaded: f64) -> u16 {
    let load = if load.is_nan() { overloaded } else { load.clamp(EPSILON, overloaded) };
    let scaled = (255.0 / overloaded) * (overloaded + EPSILON - load);
    // 吸收浮点误差，保证 load=EPSILON 时恰好得到 256
    let weight = (scaled + 1e-9).floor().max(0.0) as u16 + 1;
    weight.clamp(MIN_WEIGHT, MAX_WEIGHT)
}

/// 将单个节点的权重推送到负载均衡器
pub trait WeightPusher: Send + Sync + 'static {
    fn push(&self, name: &str, weight: u16)
        -> impl Future<Output = Result<(), CommandError>> + Send;
}

/// 带 `{name}`、`{weight}` 占位符的 shell 钩子
impl WeightPusher for ShellCommand {
    async fn push(&self, name: &str, weight: u16) -> Result<(), CommandError> {
        let weight = weight.to_string();
        self.substitute(&[("name", name), ("weight", &weight)])
            .run()
            .await
            .map(|_| ())
    }
}

/// 未配置权重命令时使用，权重仍会记录
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPush;

impl WeightPusher for NoPush {
    async fn push(&self, _name: &str, _weight: u16) -> Result<(), CommandError> {
        Ok(())
    }
}

/// 权重均衡器
pub struct WeightBalancer<W> {
    pusher: W,
    overloaded: f64,
    interval: Duration,
}

impl<W: WeightPusher> WeightBalancer<W> {
    pub fn new(pusher: W, overloaded: f64, interval: Duration) -> Self {
        Self {
            pusher,
            overloaded,
            interval,
        }
    }

    /// 计算并推送所有节点的权重
    ///
    /// 单个推送失败只记录日志，不影响其他节点。
    pub async fn rebalance(&self, workers: &[Worker]) -> Vec<(WorkerId, u16)> {
        let weights: Vec<(&Worker, u16)> = workers
            .iter()
            .map(|w| (w, weight_for_load(w.last_load, self.overloaded)))
            .collect();

        let results = join_all(
            weights
                .iter()
                .map(|(w, weight)| self.pusher.push(&w.name, *weight)),
        )
        .await;

        for ((worker, weight), result) in weights.iter().zip(results) {
            match result {
                Ok(()) => debug!("Set weight of {} to {}", worker.name, weight),
                Err(e) => warn!("Failed to push weight {} for {}: {}", weight, worker.name, e),
            }
        }
        weights.into_iter().map(|(w, weight)| (w.id, weight)).collect()
    }

    /// 按独立周期运行，直到控制循环退出
    pub fn spawn(
        self,
        fleet: watch::Receiver<Arc<FleetSnapshot>>,
        events: mpsc::Sender<Event>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let snapshot = Arc::clone(&fleet.borrow());
                if snapshot.workers.is_empty() {
                    continue;
                }
                let weights = self.rebalance(&snapshot.workers).await;
                if events.send(Event::WeightsComputed(weights)).await.is_err() {
                    break;
                }
            }
        })
    }
}

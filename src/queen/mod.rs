//! Queen模块实现 - 主控事件循环
//!
//! 控制循环是注册表与守卫状态的唯一写入者。调查结果、生命周期完成、
//! 冷却到期与权重更新都以 [`Event`] 形式经同一通道到达，并按序处理。
//!
//! ```text
//! Idle --load + decision--> ChangePending --completion--> CoolingDown --timer--> Idle
//! ```

pub mod decision;
pub mod lifecycle;
pub mod survey;

use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use metrics::gauge;
use tokio::sync::{mpsc, watch};

use crate::config::{ConfigError, MachineProfile, ScalerConfig};
use crate::provider::{Provider, ProviderError};
use crate::publisher::ConfigPublisher;
use crate::registry::{FleetSnapshot, Worker, WorkerId, WorkerRegistry};
use crate::retry::RetryPolicy;

use self::decision::{Decision, Guards, Limits};
use self::lifecycle::VictimPolicy;
use self::survey::SurveyReport;

const EVENT_QUEUE: usize = 64;

/// 控制循环事件
#[derive(Debug)]
pub enum Event {
    /// 单次调查的汇总负载
    Survey(SurveyReport),
    /// 扩容完成
    Provisioned(Result<Worker, ProviderError>),
    /// `id` 的缩容完成
    Deprovisioned {
        id: WorkerId,
        result: Result<(), ProviderError>,
    },
    /// 第 `generation` 轮冷却定时器到期
    CooldownElapsed { generation: u64 },
    /// 均衡器计算出的新权重
    WeightsComputed(Vec<(WorkerId, u16)>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    ScaleUp,
    ScaleDown,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    ChangePending(ChangeKind),
    CoolingDown,
}

impl Phase {
    pub fn guards(&self) -> Guards {
        Guards {
            waiting_on_change: matches!(self, Phase::ChangePending(_)),
            cooling_down: matches!(self, Phase::CoolingDown),
        }
    }
}

/// 与运行中的 [`ControlLoop`] 通信所需的通道端
#[derive(Debug, Clone)]
pub struct ControlHandle {
    pub events: mpsc::Sender<Event>,
    pub fleet: watch::Receiver<Arc<FleetSnapshot>>,
}

/// 主控循环
pub struct ControlLoop<P: Provider> {
    registry: WorkerRegistry,
    phase: Phase,
    current_load: Option<f64>,
    limits: Limits,
    machine: MachineProfile,
    cooldown: Duration,
    cooldown_generation: u64,
    retry: RetryPolicy,
    victim: Box<dyn VictimPolicy>,
    provider: Arc<P>,
    publisher: ConfigPublisher,
    config_dirty: bool,
    events: mpsc::Receiver<Event>,
    // 弱引用：所有外部发送端释放后循环即可退出
    self_tx: mpsc::WeakSender<Event>,
    fleet: watch::Sender<Arc<FleetSnapshot>>,
}

impl<P: Provider> ControlLoop<P> {
    pub fn new(
        config: &ScalerConfig,
        registry: WorkerRegistry,
        provider: Arc<P>,
        publisher: ConfigPublisher,
    ) -> Result<(Self, ControlHandle), ConfigError> {
        let victim = lifecycle::victim_policy(&config.victim_policy)
            .ok_or_else(|| ConfigError::VictimPolicy(config.victim_policy.clone()))?;
        let (tx, rx) = mpsc::channel(EVENT_QUEUE);
        let initial = FleetSnapshot {
            workers: registry.workers().to_vec(),
            phase: Phase::Idle,
            current_load: None,
        };
        let (fleet_tx, fleet_rx) = watch::channel(Arc::new(initial));

        let control = Self {
            registry,
            phase: Phase::Idle,
            current_load: None,
            limits: Limits::from(config),
            machine: config.machine.clone(),
            cooldown: config.cooldown_interval,
            cooldown_generation: 0,
            retry: RetryPolicy::polling(config.poll_interval, config.provision_attempts),
            victim,
            provider,
            publisher,
            config_dirty: false,
            events: rx,
            self_tx: tx.downgrade(),
            fleet: fleet_tx,
        };
        let handle = ControlHandle {
            events: tx,
            fleet: fleet_rx,
        };
        Ok((control, handle))
    }

    pub fn with_victim_policy(mut self, policy: Box<dyn VictimPolicy>) -> Self {
        self.victim = policy;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn registry(&self) -> &WorkerRegistry {
        &self.registry
    }

    /// 发布初始配置，然后处理事件直到所有发送端释放
    pub async fn run(mut self) {
        info!(
            "Control loop started with {} workers (min {}, max {})",
            self.registry.len(),
            self.limits.min_workers,
            self.limits.max_workers
        );
        self.publish_config().await;

        while let Some(event) = self.events.recv().await {
            self.handle(event).await;
        }
        info!("Control loop stopped");
    }

    pub async fn handle(&mut self, event: Event) {
        // 上次发布失败时，任意事件都会触发重试
        if self.config_dirty {
            self.publish_config().await;
        }
        match event {
            Event::Survey(report) => self.on_survey(report).await,
            Event::Provisioned(Ok(worker)) => {
                if self.phase != Phase::ChangePending(ChangeKind::ScaleUp) {
                    warn!("Unexpected provisioning completion for {} in {:?}", worker.name, self.phase);
                }
                info!("Adding worker {} ({})", worker.name, worker.public_address);
                self.registry.push(worker);
                self.publish_config().await;
                self.start_cooldown();
            }
            Event::Provisioned(Err(e)) => {
                error!("Scale-up failed, registry unchanged: {}", e);
                self.start_cooldown();
            }
            Event::Deprovisioned { id, result: Ok(()) } => {
                match self.registry.remove(id) {
                    Some(w) => info!("Removed worker {} ({})", w.name, w.id),
                    None => warn!("Deleted instance {} was not in the registry", id),
                }
                self.publish_config().await;
                self.start_cooldown();
            }
            Event::Deprovisioned { id, result: Err(e) } => {
                error!("Scale-down of {} failed, registry unchanged: {}", id, e);
                self.start_cooldown();
            }
            Event::CooldownElapsed { generation } => {
                if generation == self.cooldown_generation && self.phase == Phase::CoolingDown {
                    debug!("Cooldown elapsed");
                    self.phase = Phase::Idle;
                }
            }
            Event::WeightsComputed(weights) => {
                for (id, weight) in weights {
                    if !self.registry.set_weight(id, weight) {
                        continue;
                    }
                    if let Some(worker) = self.registry.get(id) {
                        gauge!(format!("weight.{}", worker.name)).set(f64::from(weight));
                    }
                }
            }
        }
        self.publish_snapshot();
    }

    async fn on_survey(&mut self, report: SurveyReport) {
        for (id, load) in &report.samples {
            self.registry.record_load(*id, *load);
        }
        let load = report.average;
        self.current_load = Some(load);
        info!("Load avg: {:.4} across {} samples", load, report.samples.len());

        gauge!("loadavg").set(load);
        gauge!("workers").set(self.registry.len() as f64);

        match decision::decide(load, self.registry.len(), self.phase.guards(), &self.limits) {
            Decision::ScaleUp => self.dispatch_scale_up(),
            Decision::ScaleDown => self.dispatch_scale_down(),
            Decision::NoAction => {}
        }
    }

    fn dispatch_scale_up(&mut self) {
        let Some(events) = self.self_tx.upgrade() else {
            return;
        };
        let name = self.registry.reserve_name();
        info!("Max threshold met, provisioning {}", name);
        let request = lifecycle::create_request(name, &self.machine);
        self.phase = Phase::ChangePending(ChangeKind::ScaleUp);
        lifecycle::spawn_scale_up(Arc::clone(&self.provider), request, self.retry, events);
    }

    fn dispatch_scale_down(&mut self) {
        let Some(events) = self.self_tx.upgrade() else {
            return;
        };
        let Some(victim) = self.victim.select(self.registry.workers()).cloned() else {
            return;
        };
        info!("Min threshold met, removing {} ({})", victim.name, victim.id);
        self.phase = Phase::ChangePending(ChangeKind::ScaleDown);
        lifecycle::spawn_scale_down(Arc::clone(&self.provider), victim, events);
    }

    /// 定时器只发送事件，阶段切换在此处完成
    fn start_cooldown(&mut self) {
        self.phase = Phase::CoolingDown;
        self.cooldown_generation += 1;
        let generation = self.cooldown_generation;
        let Some(events) = self.self_tx.upgrade() else {
            return;
        };
        let cooldown = self.cooldown;
        tokio::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let _ = events.send(Event::CooldownElapsed { generation }).await;
        });
    }

    /// 在调度线程内同步执行：重载退避期间事件处理会暂停，
    /// 最长为 [`RetryPolicy::reload`] 的 [`RetryPolicy::total_delay`]。
    async fn publish_config(&mut self) {
        match self.publisher.publish(self.registry.workers()).await {
            Ok(()) => self.config_dirty = false,
            Err(e) => {
                error!("Load balancer config out of sync, will retry: {}", e);
                self.config_dirty = true;
            }
        }
    }

    fn publish_snapshot(&self) {
        let snapshot = FleetSnapshot {
            workers: self.registry.workers().to_vec(),
            phase: self.phase,
            current_load: self.current_load,
        };
        self.fleet.send_replace(Arc::new(snapshot));
    }
}

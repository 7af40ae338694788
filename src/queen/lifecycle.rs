//! 工作节点生命周期管理 - 扩容/缩容一次性任务
//!
//! 每次变更运行于独立的 tokio 任务，无论成败都只向控制循环回报一个完成事件。

use std::fmt;
use std::sync::Arc;

use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::Event;
use crate::config::{MachineProfile, WorkerConfig};
use crate::provider::{CreateRequest, ListFilter, Provider, ProviderError};
use crate::registry::{Worker, WorkerRegistry};
use crate::retry::RetryPolicy;

/// 缩容时选择被移除的节点
pub trait VictimPolicy: Send + Sync + fmt::Debug {
    fn select<'a>(&self, workers: &'a [Worker]) -> Option<&'a Worker>;
}

/// 最近创建的节点(后进先出)
#[derive(Debug, Clone, Copy, Default)]
pub struct Newest;

impl VictimPolicy for Newest {
    fn select<'a>(&self, workers: &'a [Worker]) -> Option<&'a Worker> {
        workers.last()
    }
}

/// 最近上报负载最低的节点，负载相同时取最新节点
#[derive(Debug, Clone, Copy, Default)]
pub struct LeastLoaded;

impl VictimPolicy for LeastLoaded {
    fn select<'a>(&self, workers: &'a [Worker]) -> Option<&'a Worker> {
        workers
            .iter()
            .rev()
            .min_by(|a, b| a.last_load.total_cmp(&b.last_load))
    }
}

/// 按配置名称获取策略
pub fn victim_policy(name: &str) -> Option<Box<dyn VictimPolicy>> {
    match name {
        "newest" => Some(Box::new(Newest)),
        "least-loaded" => Some(Box::new(LeastLoaded)),
        _ => None,
    }
}

/// 按工作节点配置中列出的名称构建启动时的注册表
pub async fn discover_fleet<P: Provider>(
    provider: &P,
    config: &WorkerConfig,
) -> Result<WorkerRegistry, ProviderError> {
    if config.droplet_names.is_empty() {
        warn!("Worker config lists no droplets, starting with an empty fleet");
        return Ok(WorkerRegistry::new(config.name_prefix.clone(), Vec::new()));
    }
    let filter = ListFilter {
        names: config.droplet_names.clone(),
    };
    let workers = provider
        .list(&filter)
        .await?
        .iter()
        .map(Worker::from_instance)
        .collect::<Result<Vec<_>, _>>()?;
    info!("Discovered {} configured workers", workers.len());
    Ok(WorkerRegistry::new(config.name_prefix.clone(), workers))
}

pub fn create_request(name: String, machine: &MachineProfile) -> CreateRequest {
    CreateRequest {
        name,
        region: machine.region.clone(),
        size: machine.size.clone(),
        image: machine.image.clone(),
        private_networking: true,
    }
}

/// 创建实例并轮询至其可用
///
/// `retry` 次数耗尽时返回 [`ProviderError::NotReady`]；轮询中的服务商错误立即结束任务。
pub async fn provision<P: Provider>(
    provider: &P,
    request: &CreateRequest,
    retry: &RetryPolicy,
) -> Result<Worker, ProviderError> {
    let mut instance = provider.create(request).await?;
    info!("Created instance {} ({}), waiting for it to become active", instance.id, instance.name);

    let mut attempt = 0;
    while !instance.is_active() {
        if attempt >= retry.max_attempts {
            return Err(ProviderError::NotReady {
                id: instance.id,
                attempts: attempt,
            });
        }
        tokio::time::sleep(retry.delay(attempt)).await;
        attempt += 1;
        instance = provider.get(instance.id).await?;
        debug!("Polling {}. Status: {}", instance.name, instance.status);
    }

    let worker = Worker::from_instance(&instance)?;
    info!(
        "Instance {} active at {} / {}",
        worker.name, worker.private_address, worker.public_address
    );
    Ok(worker)
}

pub async fn deprovision<P: Provider>(provider: &P, victim: &Worker) -> Result<(), ProviderError> {
    provider.delete(victim.id).await?;
    info!("Deleted instance {} ({})", victim.id, victim.name);
    Ok(())
}

pub fn spawn_scale_up<P: Provider>(
    provider: Arc<P>,
    request: CreateRequest,
    retry: RetryPolicy,
    events: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = provision(provider.as_ref(), &request, &retry).await;
        if let Err(e) = &result {
            error!("Provisioning {} failed: {}", request.name, e);
        }
        if events.send(Event::Provisioned(result)).await.is_err() {
            error!("Control loop gone before provisioning of {} was reported", request.name);
        }
    })
}

pub fn spawn_scale_down<P: Provider>(
    provider: Arc<P>,
    victim: Worker,
    events: mpsc::Sender<Event>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = deprovision(provider.as_ref(), &victim).await;
        if let Err(e) = &result {
            error!("Deleting {} ({}) failed: {}", victim.name, victim.id, e);
        }
        let event = Event::Deprovisioned {
            id: victim.id,
            result,
        };
        if events.send(event).await.is_err() {
            error!("Control loop gone before removal of {} was reported", victim.name);
        }
    })
}

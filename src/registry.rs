//! 工作节点注册表
//!
//! 注册表归控制循环所有，其他组件只能读取不可变的 [`FleetSnapshot`]。

use crate::provider::{AddressKind, Instance, ProviderError};

/// 云服务商分配的实例ID
pub type WorkerId = u64;

/// 均衡器尚未计算前的初始权重
pub const DEFAULT_WEIGHT: u16 = 1;

/// 集群成员
#[derive(Debug, Clone, PartialEq)]
pub struct Worker {
    pub id: WorkerId,
    pub name: String,
    pub private_address: String,
    pub public_address: String,
    pub last_load: f64,
    pub weight: u16,
}

impl Worker {
    pub fn new(
        id: WorkerId,
        name: impl Into<String>,
        private_address: impl Into<String>,
        public_address: impl Into<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            private_address: private_address.into(),
            public_address: public_address.into(),
            last_load: 0.0,
            weight: DEFAULT_WEIGHT,
        }
    }

    /// 从实例网络信息中解析私有与公网地址
    pub fn from_instance(instance: &Instance) -> Result<Self, ProviderError> {
        Ok(Self::new(
            instance.id,
            instance.name.clone(),
            instance.require_address(AddressKind::Private)?,
            instance.require_address(AddressKind::Public)?,
        ))
    }
}

/// 有序节点列表，插入顺序即创建顺序
#[derive(Debug, Clone)]
pub struct WorkerRegistry {
    workers: Vec<Worker>,
    prefix: String,
    next_ordinal: u64,
}

impl WorkerRegistry {
    pub fn new(prefix: impl Into<String>, workers: Vec<Worker>) -> Self {
        let prefix = prefix.into();
        // 序号只增不减，避免删除后重新创建时名称冲突
        let highest = workers
            .iter()
            .filter_map(|w| w.name.strip_prefix(prefix.as_str()))
            .filter_map(|suffix| suffix.parse::<u64>().ok())
            .max()
            .unwrap_or(0);
        let next_ordinal = highest.max(workers.len() as u64) + 1;
        Self {
            workers,
            prefix,
            next_ordinal,
        }
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// 下一个新建节点将使用的名称
    pub fn candidate_name(&self) -> String {
        format!("{}{}", self.prefix, self.next_ordinal)
    }

    /// 占用候选名称，之后的节点不会再使用
    pub fn reserve_name(&mut self) -> String {
        let name = self.candidate_name();
        self.next_ordinal += 1;
        name
    }

    pub fn push(&mut self, worker: Worker) {
        if let Some(ordinal) = worker
            .name
            .strip_prefix(self.prefix.as_str())
            .and_then(|s| s.parse::<u64>().ok())
        {
            self.next_ordinal = self.next_ordinal.max(ordinal + 1);
        }
        self.workers.push(worker);
    }

    pub fn remove(&mut self, id: WorkerId) -> Option<Worker> {
        let idx = self.workers.iter().position(|w| w.id == id)?;
        Some(self.workers.remove(idx))
    }

    pub fn get(&self, id: WorkerId) -> Option<&Worker> {
        self.workers.iter().find(|w| w.id == id)
    }

    /// 记录负载样本，未知ID被忽略
    pub fn record_load(&mut self, id: WorkerId, load: f64) -> bool {
        match self.workers.iter_mut().find(|w| w.id == id) {
            Some(worker) => {
                worker.last_load = load;
                true
            }
            None => false,
        }
    }

    pub fn set_weight(&mut self, id: WorkerId, weight: u16) -> bool {
        match self.workers.iter_mut().find(|w| w.id == id) {
            Some(worker) => {
                worker.weight = weight;
                true
            }
            None => false,
        }
    }
}

/// 控制循环每次变更后发布的只读视图
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FleetSnapshot {
    pub workers: Vec<Worker>,
    pub phase: crate::queen::Phase,
    pub current_load: Option<f64>,
}

impl FleetSnapshot {
    pub fn by_private_address(&self, address: &str) -> Option<&Worker> {
        self.workers.iter().find(|w| w.private_address == address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: WorkerId, name: &str) -> Worker {
        Worker::new(id, name, format!("10.0.0.{id}"), format!("203.0.113.{id}"))
    }

    #[test]
    fn test_names_never_reused_after_removal() {
        let mut registry = WorkerRegistry::new("web", vec![worker(1, "web1"), worker(2, "web2")]);
        assert_eq!(registry.candidate_name(), "web3");

        let name = registry.reserve_name();
        registry.push(worker(3, &name));
        registry.remove(3);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.candidate_name(), "web4");
    }

    #[test]
    fn test_seeded_above_highest_discovered_ordinal() {
        let registry = WorkerRegistry::new("web", vec![worker(9, "web7")]);
        assert_eq!(registry.candidate_name(), "web8");
    }

    #[test]
    fn test_record_load_unknown_id() {
        let mut registry = WorkerRegistry::new("web", vec![worker(1, "web1")]);
        assert!(registry.record_load(1, 0.5));
        assert!(!registry.record_load(42, 0.5));
        assert_eq!(registry.get(1).map(|w| w.last_load), Some(0.5));
    }
}

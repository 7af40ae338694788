//! 扩缩容决策 - 纯函数，无副作用

/// 防止集群变更重叠的守卫标志
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Guards {
    pub waiting_on_change: bool,
    pub cooling_down: bool,
}

impl Guards {
    pub fn clear(&self) -> bool {
        !self.waiting_on_change && !self.cooling_down
    }
}

/// 阈值与规模上下限，进程生命周期内不变
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    pub overloaded: f64,
    pub underused: f64,
    pub min_workers: usize,
    pub max_workers: usize,
}

impl From<&crate::config::ScalerConfig> for Limits {
    fn from(cfg: &crate::config::ScalerConfig) -> Self {
        Self {
            overloaded: cfg.overloaded_threshold,
            underused: cfg.underused_threshold,
            min_workers: cfg.min_workers,
            max_workers: cfg.max_workers,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    ScaleUp,
    ScaleDown,
    NoAction,
}

pub fn should_scale_up(load: f64, size: usize, guards: Guards, limits: &Limits) -> bool {
    guards.clear() && load > limits.overloaded && size < limits.max_workers
}

pub fn should_scale_down(load: f64, size: usize, guards: Guards, limits: &Limits) -> bool {
    guards.clear() && load < limits.underused && size > limits.min_workers
}

/// 先判断扩容，再判断缩容
pub fn decide(load: f64, size: usize, guards: Guards, limits: &Limits) -> Decision {
    if should_scale_up(load, size, guards, limits) {
        Decision::ScaleUp
    } else if should_scale_down(load, size, guards, limits) {
        Decision::ScaleDown
    } else {
        Decision::NoAction
    }
}

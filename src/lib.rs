//! Overlord 核心库入口 - 负载均衡工作节点集群的自动扩缩容控制面
//!
//! queen 负责主控循环(负载调查、扩缩容决策、节点生命周期)，
//! drone 负责工作节点侧的调查应答。

pub mod balancer;
pub mod config;
pub mod drone;
pub mod metrics;
pub mod provider;
pub mod publisher;
pub mod queen;
pub mod registry;
pub mod retry;
pub mod shell;

use crate::config::ConfigError;
use crate::provider::ProviderError;
use crate::publisher::PublishError;
use crate::queen::survey::SurveyError;

/// 通用错误类型
#[derive(thiserror::Error, Debug)]
pub enum OverlordError {
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    #[error("调查传输错误: {0}")]
    Survey(#[from] SurveyError),

    #[error("云服务商错误: {0}")]
    Provider(#[from] ProviderError),

    #[error("负载均衡配置发布失败: {0}")]
    Publish(#[from] PublishError),
}

pub type Result<T> = std::result::Result<T, OverlordError>;

// 公开导出模块的公共接口
pub use config::{ScalerConfig, WorkerConfig};
pub use drone::DroneRespondent;
pub use queen::{ControlHandle, ControlLoop, Event, Phase};
pub use registry::{FleetSnapshot, Worker, WorkerId, WorkerRegistry};

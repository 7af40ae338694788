//! 云服务商接口 - 控制面只依赖此契约
//!
//! 控制循环只调用 [`Provider`] 的 list/create/get/delete，并读取返回的 [`Instance`]。

pub mod digitalocean;

use std::future::Future;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use digitalocean::DigitalOceanProvider;

/// 实例可用时上报的状态字符串
pub const ACTIVE_STATUS: &str = "active";

/// 云服务商错误类型
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider API returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("instance {id} not active after {attempts} polls")]
    NotReady { id: u64, attempts: u32 },
    #[error("instance {id} has no {kind} address")]
    MissingAddress { id: u64, kind: AddressKind },
    #[error("{0}")]
    Other(String),
}

/// 网卡类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressKind {
    Public,
    Private,
}

impl std::fmt::Display for AddressKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressKind::Public => f.write_str("public"),
            AddressKind::Private => f.write_str("private"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkInterface {
    #[serde(rename = "type")]
    pub kind: AddressKind,
    pub ip_address: String,
}

/// 云主机实例
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: u64,
    pub name: String,
    pub status: String,
    #[serde(default)]
    pub networks: Vec<NetworkInterface>,
}

impl Instance {
    pub fn is_active(&self) -> bool {
        self.status == ACTIVE_STATUS
    }

    /// 第一个类型为 `kind` 的地址
    pub fn address(&self, kind: AddressKind) -> Option<&str> {
        self.networks
            .iter()
            .find(|n| n.kind == kind)
            .map(|n| n.ip_address.as_str())
    }

    pub fn require_address(&self, kind: AddressKind) -> Result<String, ProviderError> {
        self.address(kind)
            .map(str::to_string)
            .ok_or(ProviderError::MissingAddress { id: self.id, kind })
    }
}

/// 单个工作节点的创建请求
#[derive(Debug, Clone, Serialize)]
pub struct CreateRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    pub private_networking: bool,
}

/// [`Provider::list`] 的过滤条件
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// 精确名称集合，空集合不匹配任何实例
    pub names: Vec<String>,
}

impl ListFilter {
    pub fn matches(&self, instance: &Instance) -> bool {
        self.names.iter().any(|n| *n == instance.name)
    }
}

/// 云服务商契约
pub trait Provider: Send + Sync + 'static {
    fn list(
        &self,
        filter: &ListFilter,
    ) -> impl Future<Output = Result<Vec<Instance>, ProviderError>> + Send;

    fn create(
        &self,
        request: &CreateRequest,
    ) -> impl Future<Output = Result<Instance, ProviderError>> + Send;

    fn get(&self, id: u64) -> impl Future<Output = Result<Instance, ProviderError>> + Send;

    fn delete(&self, id: u64) -> impl Future<Output = Result<(), ProviderError>> + Send;
}

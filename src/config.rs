//! 控制面静态配置
//!
//! 进程生命周期内不变。`overlord` 由命令行参数构建 [`ScalerConfig`]，
//! 启动其他组件前先调用 [`ScalerConfig::validate`]。

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting: {0}")]
    Missing(&'static str),
    #[error("thresholds must satisfy 0 < underused ({underused}) < overloaded ({overloaded}) <= 1")]
    Thresholds { underused: f64, overloaded: f64 },
    #[error("worker limits must satisfy 1 <= min ({min}) <= max ({max})")]
    Limits { min: usize, max: usize },
    #[error("interval `{0}` must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("invalid victim policy `{0}` (expected `newest` or `least-loaded`)")]
    VictimPolicy(String),
    #[error("error reading worker config {path}: {source}")]
    WorkerConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("error parsing worker config {path}: {source}")]
    WorkerConfigParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// 新建节点统一使用的机器规格
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MachineProfile {
    pub region: String,
    pub size: String,
    pub image: String,
}

impl Default for MachineProfile {
    fn default() -> Self {
        Self {
            region: "tor1".to_string(),
            size: "512mb".to_string(),
            image: String::new(),
        }
    }
}

/// 可选的 statsd 设置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsdConfig {
    pub addr: SocketAddr,
    pub prefix: String,
    #[serde(with = "secs")]
    pub interval: Duration,
}

/// 扩缩容控制面配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalerConfig {
    /// 调查端口绑定地址，`host:port`
    pub bind: String,
    pub reload_command: String,
    /// 按节点替换 `{name}` 与 `{weight}`
    pub weight_command: Option<String>,
    pub template_path: PathBuf,
    pub output_path: PathBuf,
    pub name_prefix: String,
    pub machine: MachineProfile,

    pub overloaded_threshold: f64,
    pub underused_threshold: f64,
    pub min_workers: usize,
    pub max_workers: usize,

    #[serde(with = "secs")]
    pub poll_interval: Duration,
    #[serde(with = "secs")]
    pub cooldown_interval: Duration,
    #[serde(with = "secs")]
    pub survey_deadline: Duration,
    #[serde(with = "secs")]
    pub query_interval: Duration,
    #[serde(with = "secs")]
    pub weight_interval: Duration,
    pub provision_attempts: u32,
    pub victim_policy: String,

    pub statsd: Option<StatsdConfig>,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8000".to_string(),
            reload_command: String::new(),
            weight_command: None,
            template_path: PathBuf::new(),
            output_path: PathBuf::new(),
            name_prefix: "worker".to_string(),
            machine: MachineProfile::default(),
            overloaded_threshold: 0.7,
            underused_threshold: 0.3,
            min_workers: 1,
            max_workers: 10,
            poll_interval: Duration::from_secs(3),
            cooldown_interval: Duration::from_secs(15),
            survey_deadline: Duration::from_secs(1),
            query_interval: Duration::from_secs(3),
            weight_interval: Duration::from_secs(60),
            provision_attempts: 40,
            victim_policy: "newest".to_string(),
            statsd: None,
        }
    }
}

impl ScalerConfig {
    /// 检查取值范围与必填项，返回发现的第一个错误
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required: [(&'static str, bool); 5] = [
            ("command", self.reload_command.trim().is_empty()),
            ("balancetemplate", self.template_path.as_os_str().is_empty()),
            ("balanceconfig", self.output_path.as_os_str().is_empty()),
            ("image", self.machine.image.trim().is_empty()),
            ("host", self.bind.trim().is_empty()),
        ];
        if let Some((name, _)) = required.iter().find(|(_, missing)| *missing) {
            return Err(ConfigError::Missing(name));
        }

        let (under, over) = (self.underused_threshold, self.overloaded_threshold);
        if !(under > 0.0 && under < over && over <= 1.0) {
            return Err(ConfigError::Thresholds {
                underused: under,
                overloaded: over,
            });
        }
        if self.min_workers < 1 || self.max_workers < self.min_workers {
            return Err(ConfigError::Limits {
                min: self.min_workers,
                max: self.max_workers,
            });
        }

        let intervals = [
            ("pollinterval", self.poll_interval),
            ("cooldowninterval", self.cooldown_interval),
            ("surveydeadline", self.survey_deadline),
            ("surveytimeout", self.query_interval),
            ("weightinterval", self.weight_interval),
        ];
        if let Some((name, _)) = intervals.iter().find(|(_, d)| d.is_zero()) {
            return Err(ConfigError::ZeroInterval(name));
        }
        if self.provision_attempts == 0 {
            return Err(ConfigError::ZeroInterval("provisionattempts"));
        }
        if let Some(statsd) = &self.statsd {
            if statsd.interval.is_zero() {
                return Err(ConfigError::ZeroInterval("statsdinterval"));
            }
        }

        match self.victim_policy.as_str() {
            "newest" | "least-loaded" => Ok(()),
            other => Err(ConfigError::VictimPolicy(other.to_string())),
        }
    }

    /// ZMQ 格式的调查端点
    pub fn survey_endpoint(&self) -> String {
        format!("tcp://{}", self.bind)
    }
}

/// 静态工作节点配置文件(JSON)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub name_prefix: String,
    #[serde(default)]
    pub droplet_names: Vec<String>,
}

impl WorkerConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read(path).map_err(|source| ConfigError::WorkerConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&data).map_err(|source| ConfigError::WorkerConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

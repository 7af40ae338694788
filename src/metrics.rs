//! 集群指标 - statsd 记录器
//!
//! 控制循环通过 `metrics::gauge!` 上报指标；未安装记录器时不产生任何输出。
//! [`StatsdRecorder`] 保留每个 gauge 的最新值，按固定间隔以 statsd 行格式经 UDP 发出。

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use metrics::{
    Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SetRecorderError,
    SharedString, Unit,
};
use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

type GaugeBuffer = Arc<Mutex<BTreeMap<String, f64>>>;

/// 单个 gauge 的写入句柄
struct BufferedGauge {
    name: String,
    pending: GaugeBuffer,
}

impl GaugeFn for BufferedGauge {
    fn increment(&self, value: f64) {
        *self.pending.lock().entry(self.name.clone()).or_insert(0.0) += value;
    }

    fn decrement(&self, value: f64) {
        *self.pending.lock().entry(self.name.clone()).or_insert(0.0) -= value;
    }

    fn set(&self, value: f64) {
        self.pending.lock().insert(self.name.clone(), value);
    }
}

/// statsd gauge 记录器，计数器与直方图被忽略
#[derive(Debug, Clone)]
pub struct StatsdRecorder {
    prefix: String,
    pending: GaugeBuffer,
}

impl StatsdRecorder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            pending: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// 取出缓冲的 gauge，按名称排序
    pub fn drain_lines(&self) -> Vec<String> {
        let pending = std::mem::take(&mut *self.pending.lock());
        pending
            .into_iter()
            .map(|(name, value)| format!("{}{}:{}|g", self.prefix, name, value))
            .collect()
    }

    /// 安装为全局记录器，并每隔 `interval` 向 `addr` 刷新
    pub fn install(
        self,
        addr: SocketAddr,
        interval: Duration,
    ) -> Result<JoinHandle<()>, SetRecorderError<Self>> {
        let flusher = self.clone();
        metrics::set_global_recorder(self)?;
        Ok(flusher.spawn_flusher(addr, interval))
    }

    pub fn spawn_flusher(self, addr: SocketAddr, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let bind: SocketAddr = if addr.is_ipv4() {
                ([0u8; 4], 0).into()
            } else {
                ([0u16; 8], 0).into()
            };
            let socket = match UdpSocket::bind(bind).await {
                Ok(socket) => socket,
                Err(e) => {
                    warn!("Statsd socket unavailable, metrics disabled: {}", e);
                    return;
                }
            };
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let lines = self.drain_lines();
                if lines.is_empty() {
                    continue;
                }
                match socket.send_to(lines.join("\n").as_bytes(), addr).await {
                    Ok(_) => debug!("Streamed {} gauges to statsd", lines.len()),
                    Err(e) => warn!("Statsd flush to {} failed: {}", addr, e),
                }
            }
        })
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, _key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::noop()
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(BufferedGauge {
            name: key.name().to_string(),
            pending: Arc::clone(&self.pending),
        }))
    }

    fn register_histogram(&self, _key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_value_wins() {
        let recorder = StatsdRecorder::new("autoscaler.");
        metrics::with_local_recorder(&recorder, || {
            metrics::gauge!("workers").set(2.0);
            metrics::gauge!("workers").set(3.0);
            metrics::gauge!("loadavg").set(0.5);
            metrics::counter!("ignored").increment(1);
        });
        assert_eq!(
            recorder.drain_lines(),
            vec!["autoscaler.loadavg:0.5|g", "autoscaler.workers:3|g"]
        );
        assert!(recorder.drain_lines().is_empty());
    }

    #[tokio::test]
    async fn test_flush_over_udp() {
        let receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = receiver.local_addr().unwrap();
        let recorder = StatsdRecorder::new("fleet.");
        metrics::with_local_recorder(&recorder, || metrics::gauge!("workers").set(4.0));
        let handle = recorder.clone().spawn_flusher(addr, Duration::from_millis(20));

        let mut buf = [0u8; 512];
        let n = tokio::time::timeout(Duration::from_secs(2), receiver.recv(&mut buf))
            .await
            .expect("no statsd datagram")
            .unwrap();
        assert_eq!(&buf[..n], b"fleet.workers:4|g");
        handle.abort();
    }
}

//! Drone端调查应答 - DEALER socket实现

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use sysinfo::{System, SystemExt};
use thiserror::Error;
use uuid::Uuid;
use zmq::{Context, Socket};

use crate::queen::survey::{PROBE, READY};

/// 网络通信错误类型
#[derive(Error, Debug)]
pub enum DroneError {
    #[error("ZMQ error: {0}")]
    Zmq(#[from] zmq::Error),
}

/// 上报给 Queen 的负载来源
pub trait LoadSource: Send {
    fn sample(&mut self) -> f64;
}

impl<F: FnMut() -> f64 + Send> LoadSource for F {
    fn sample(&mut self) -> f64 {
        self()
    }
}

/// 1分钟平均负载除以CPU核数
pub struct SystemLoad {
    sys: System,
    cpus: usize,
}

impl SystemLoad {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            cpus: num_cpus::get().max(1),
        }
    }
}

impl Default for SystemLoad {
    fn default() -> Self {
        Self::new()
    }
}

impl LoadSource for SystemLoad {
    fn sample(&mut self) -> f64 {
        <System as SystemExt>::load_average(&self.sys).one / self.cpus as f64
    }
}

/// Drone网络连接
pub struct DroneRespondent {
    _ctx: Context,
    socket: Socket,
    id: String,
    private_address: String,
    load: Box<dyn LoadSource>,
    hello_interval: Duration,
}

impl DroneRespondent {
    /// 连接Queen的调查端点
    pub fn connect(
        endpoint: &str,
        private_address: impl Into<String>,
        load: Box<dyn LoadSource>,
    ) -> Result<Self, DroneError> {
        let ctx = Context::new();
        let socket = ctx.socket(zmq::DEALER)?;
        let id = Uuid::new_v4().to_string();
        socket.set_identity(id.as_bytes())?;
        socket.set_linger(0)?;
        socket.connect(endpoint)?;
        info!("Drone {} connected to {}", id, endpoint);

        Ok(Self {
            _ctx: ctx,
            socket,
            id,
            private_address: private_address.into(),
            load,
            hello_interval: Duration::from_secs(5),
        })
    }

    pub fn with_hello_interval(mut self, interval: Duration) -> Self {
        self.hello_interval = interval;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// 向 Queen 通告本节点
    pub fn announce(&self) -> Result<(), DroneError> {
        self.socket.send(READY, zmq::DONTWAIT).or_else(|e| match e {
            // 发送队列已满时跳过本次通告
            zmq::Error::EAGAIN => Ok(()),
            e => Err(e),
        })?;
        Ok(())
    }

    /// 计算下一次通告间隔(±5%随机抖动)
    fn next_interval(&self) -> Duration {
        let base = self.hello_interval;
        let jitter = rand::random_range(0..=10);
        base + (base * jitter) / 100 - base / 20
    }

    /// 定期通告并应答调查，直到 socket 出错
    pub fn run(&mut self) -> Result<(), DroneError> {
        self.announce()?;
        let mut next_hello = Instant::now() + self.next_interval();
        loop {
            let timeout = next_hello.saturating_duration_since(Instant::now());
            self.serve(timeout)?;
            if Instant::now() >= next_hello {
                self.announce()?;
                next_hello = Instant::now() + self.next_interval();
            }
        }
    }

    /// 最多等待 `timeout`，应答所有排队的探测
    pub fn serve(&mut self, timeout: Duration) -> Result<usize, DroneError> {
        let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
        zmq::poll(&mut items, timeout.as_millis() as i64)?;
        if !items[0].is_readable() {
            return Ok(0);
        }

        let mut answered = 0;
        loop {
            let frames = match self.socket.recv_multipart(zmq::DONTWAIT) {
                Ok(frames) => frames,
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(e.into()),
            };
            if frames.len() != 2 || frames[1] != PROBE {
                warn!("Drone {} ignoring unexpected message ({} frames)", self.id, frames.len());
                continue;
            }

            let load = self.load.sample();
            let payload = format!("{},{}", self.private_address, load);
            debug!("Drone {} answering survey with {}", self.id, payload);
            self.socket
                .send_multipart([frames[0].as_slice(), payload.as_bytes()], 0)?;
            answered += 1;
        }
        Ok(answered)
    }
}

//! 负载调查模块 - Queen端ROUTER socket实现
//!
//! 每个周期向所有已知 Drone 广播 `CPU` 探测，在截止时间内收集
//! `"<私有地址>,<负载>"` 应答，并将平均值交给控制循环。
//!
//! 帧格式(ROUTER 身份帧之后)：
//!
//! ```text
//! queen -> drone : [survey id (u32 BE)] ["CPU"]
//! drone -> queen : [survey id (u32 BE)] ["10.0.0.5,0.42"]
//! drone -> queen : ["READY"]
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use zmq::{Context, Socket};

use super::Event;
use crate::registry::{FleetSnapshot, WorkerId};

/// 调查探测载荷
pub const PROBE: &[u8] = b"CPU";
/// Drone 上线通告，Queen 借此记录其身份
pub const READY: &[u8] = b"READY";

/// 调查传输错误类型
#[derive(Error, Debug)]
pub enum SurveyError {
    #[error("survey transport setup failed: {0}")]
    Setup(zmq::Error),
    #[error("survey transport I/O failed: {0}")]
    Io(zmq::Error),
}

/// 应答解析错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("response is not valid UTF-8")]
    Utf8,
    #[error("expected 2 comma-separated fields, got {0}")]
    FieldCount(usize),
    #[error("invalid load sample `{0}`")]
    Load(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub address: String,
    pub load: f64,
}

/// 单次调查周期的汇总结果
#[derive(Debug, Clone, PartialEq)]
pub struct SurveyReport {
    /// 与注册表匹配的样本，按到达顺序排列
    pub samples: Vec<(WorkerId, f64)>,
    pub average: f64,
}

pub fn parse_response(payload: &[u8]) -> Result<Sample, ParseError> {
    let text = std::str::from_utf8(payload).map_err(|_| ParseError::Utf8)?;
    let fields: Vec<&str> = text.trim().split(',').collect();
    if fields.len() != 2 {
        return Err(ParseError::FieldCount(fields.len()));
    }
    let raw = fields[1].trim();
    let load: f64 = raw.parse().map_err(|_| ParseError::Load(raw.to_string()))?;
    if !load.is_finite() || load < 0.0 {
        return Err(ParseError::Load(raw.to_string()));
    }
    Ok(Sample {
        address: fields[0].trim().to_string(),
        load,
    })
}

/// 将应答与快照匹配，并对已知节点的负载求平均
///
/// 没有可用样本时返回 `None`，本周期不产生汇总事件。
pub fn aggregate<'a, I>(payloads: I, fleet: &FleetSnapshot) -> Option<SurveyReport>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut samples = Vec::new();
    for payload in payloads {
        let sample = match parse_response(payload) {
            Ok(sample) => sample,
            Err(e) => {
                warn!(
                    "Discarding malformed survey response {:?}: {}",
                    String::from_utf8_lossy(payload),
                    e
                );
                continue;
            }
        };
        match fleet.by_private_address(&sample.address) {
            Some(worker) => samples.push((worker.id, sample.load)),
            None => warn!(
                "Discarding load {} from unknown address {}",
                sample.load, sample.address
            ),
        }
    }

    if samples.is_empty() {
        return None;
    }
    let average = samples.iter().map(|(_, load)| load).sum::<f64>() / samples.len() as f64;
    Some(SurveyReport { samples, average })
}

/// 调查服务端
pub struct SurveyServer {
    _ctx: Context,
    socket: Socket,
    peers: HashSet<Vec<u8>>,
    survey_id: u32,
    deadline: Duration,
}

impl SurveyServer {
    /// 绑定 ROUTER socket，失败即为启动期致命错误
    pub fn bind(endpoint: &str, deadline: Duration) -> Result<Self, SurveyError> {
        let ctx = Context::new();
        let socket = ctx.socket(zmq::ROUTER).map_err(SurveyError::Setup)?;
        socket.set_router_mandatory(true).map_err(SurveyError::Setup)?;
        socket.set_linger(0).map_err(SurveyError::Setup)?;
        socket.bind(endpoint).map_err(SurveyError::Setup)?;
        info!("Survey server bound to {}", endpoint);

        Ok(Self {
            _ctx: ctx,
            socket,
            peers: HashSet::new(),
            survey_id: 0,
            deadline,
        })
    }

    /// 获取当前绑定的endpoint
    pub fn endpoint(&self) -> Result<String, SurveyError> {
        self.socket
            .get_last_endpoint()
            .map(|ep| ep.unwrap_or_default())
            .map_err(SurveyError::Io)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// 最多等待 `timeout`，接收 Drone 的上线通告
    pub fn accept_peers(&mut self, timeout: Duration) -> Result<usize, SurveyError> {
        self.collect_until(Instant::now() + timeout, None)?;
        Ok(self.peers.len())
    }

    /// 执行一次调查，返回原始应答载荷
    pub fn survey(&mut self) -> Result<Vec<Vec<u8>>, SurveyError> {
        // 先处理积压的注册与迟到应答
        self.receive_pending(None)?;

        self.survey_id = self.survey_id.wrapping_add(1);
        let id = self.survey_id.to_be_bytes();
        let peers: Vec<Vec<u8>> = self.peers.iter().cloned().collect();
        for peer in peers {
            match self
                .socket
                .send_multipart([peer.as_slice(), &id[..], PROBE], zmq::DONTWAIT)
            {
                Ok(()) => {}
                Err(zmq::Error::EHOSTUNREACH) => {
                    debug!("Forgetting unreachable drone {:?}", String::from_utf8_lossy(&peer));
                    self.peers.remove(&peer);
                }
                Err(e) => return Err(SurveyError::Io(e)),
            }
        }

        let mut responses = Vec::new();
        self.collect_until(Instant::now() + self.deadline, Some(&mut responses))?;
        debug!(
            "Survey {} collected {} responses from {} drones",
            self.survey_id,
            responses.len(),
            self.peers.len()
        );
        Ok(responses)
    }

    fn collect_until(
        &mut self,
        deadline: Instant,
        mut responses: Option<&mut Vec<Vec<u8>>>,
    ) -> Result<(), SurveyError> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(());
            }
            let mut items = [self.socket.as_poll_item(zmq::POLLIN)];
            zmq::poll(&mut items, remaining.as_millis().max(1) as i64).map_err(SurveyError::Io)?;
            if items[0].is_readable() {
                self.receive_pending(responses.as_deref_mut())?;
            }
        }
    }

    /// 非阻塞地取出所有排队消息
    fn receive_pending(
        &mut self,
        mut responses: Option<&mut Vec<Vec<u8>>>,
    ) -> Result<(), SurveyError> {
        loop {
            let mut frames = match self.socket.recv_multipart(zmq::DONTWAIT) {
                Ok(frames) => frames,
                Err(zmq::Error::EAGAIN) => return Ok(()),
                Err(e) => return Err(SurveyError::Io(e)),
            };

            match frames.len() {
                2 if frames[1] == READY => {
                    let identity = frames.swap_remove(0);
                    if self.peers.insert(identity) {
                        debug!("Drone joined, {} known", self.peers.len());
                    }
                }
                3 => {
                    let payload = frames.pop().unwrap_or_default();
                    let current = frames[1] == self.survey_id.to_be_bytes();
                    self.peers.insert(frames.swap_remove(0));
                    match responses.as_deref_mut() {
                        Some(out) if current => out.push(payload),
                        _ => debug!(
                            "Dropping stale survey response {:?}",
                            String::from_utf8_lossy(&payload)
                        ),
                    }
                }
                n => warn!("Ignoring message with {} frames", n),
            }
        }
    }

    /// 在独立线程上启动汇总循环
    ///
    /// 控制循环的事件通道关闭后线程退出。
    pub fn spawn(
        self,
        fleet: watch::Receiver<Arc<FleetSnapshot>>,
        events: mpsc::Sender<Event>,
        query_interval: Duration,
    ) -> JoinHandle<()> {
        thread::spawn(move || self.run(fleet, events, query_interval))
    }

    fn run(
        mut self,
        fleet: watch::Receiver<Arc<FleetSnapshot>>,
        events: mpsc::Sender<Event>,
        query_interval: Duration,
    ) {
        while !events.is_closed() {
            debug!("Sending survey request");
            match self.survey() {
                Ok(payloads) => {
                    let snapshot = Arc::clone(&fleet.borrow());
                    match aggregate(payloads.iter().map(Vec::as_slice), &snapshot) {
                        Some(report) => {
                            if events.blocking_send(Event::Survey(report)).is_err() {
                                break;
                            }
                        }
                        None => debug!("No load samples this cycle"),
                    }
                }
                Err(e) => error!("Survey cycle abandoned: {}", e),
            }
            thread::sleep(query_interval);
        }
        info!("Survey server stopped");
    }
}

//! 工蜂(Worker)节点实现模块

pub mod respondent;

pub use respondent::{DroneError, DroneRespondent, LoadSource, SystemLoad};

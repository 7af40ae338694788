//! 权重均衡器测试


use std::sync::Arc;
use std::time::Duration;

use overlord::balancer::{weight_for_load, WeightBalancer, WeightPusher, MAX_WEIGHT, MIN_WEIGHT};
use overlord::queen::Event;
use overlord::shell::{CommandError, ShellCommand};
use parking_lot::Mutex;
use proptest::prelude::*;
use test_utils::{snapshot_of, workers};
use tokio::sync::{mpsc, watch};

/// Remembers every push; fails for names listed in `reject`.
#[derive(Default, Clone)]
struct RecordingPusher {
    pushed: Arc<Mutex<Vec<(String, u16)>>>,
    reject: Vec<String>,
}

impl WeightPusher for RecordingPusher {
    async fn push(&self, name: &str, weight: u16) -> Result<(), CommandError> {
        if self.reject.iter().any(|r| r == name) {
            return ShellCommand::new("exit 3").run().await.map(|_| ());
        }
        self.pushed.lock().push((name.to_string(), weight));
        Ok(())
    }
}

#[test]
fn test_weight_endpoints() {
    assert_eq!(weight_for_load(0.0, 0.7), 256);
    assert_eq!(weight_for_load(0.001, 0.7), 256);
    assert_eq!(weight_for_load(0.7, 0.7), 1);
    assert_eq!(weight_for_load(0.35, 0.7), 128);
    assert_eq!(weight_for_load(f64::NAN, 0.7), 1);
}

proptest! {
    #[test]
    fn prop_weight_in_range(load in -1.0f64..10.0, overloaded in 0.05f64..5.0) {
        let w = weight_for_load(load, overloaded);
        prop_assert!((MIN_WEIGHT..=MAX_WEIGHT).contains(&w));
    }

    #[test]
    fn prop_weight_never_increases_with_load(a in 0.0f64..1.0, b in 0.0f64..1.0) {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(weight_for_load(low, 0.7) >= weight_for_load(high, 0.7));
    }
}

#[tokio::test]
async fn test_rebalance_pushes_every_worker() {
    let mut fleet = workers(3);
    fleet[0].last_load = 0.0;
    fleet[1].last_load = 0.35;
    fleet[2].last_load = 0.9;

    let pusher = RecordingPusher::default();
    let balancer = WeightBalancer::new(pusher.clone(), 0.7, Duration::from_secs(5));
    let weights = balancer.rebalance(&fleet).await;

    assert_eq!(weights, vec![(1, 256), (2, 128), (3, 1)]);
    let mut pushed = pusher.pushed.lock().clone();
    pushed.sort();
    assert_eq!(
        pushed,
        vec![("web1".into(), 256), ("web2".into(), 128), ("web3".into(), 1)]
    );
}

#[tokio::test]
async fn test_failed_push_does_not_stop_others() {
    let pusher = RecordingPusher {
        reject: vec!["web2".into()],
        ..RecordingPusher::default()
    };
    let balancer = WeightBalancer::new(pusher.clone(), 0.7, Duration::from_secs(5));
    let weights = balancer.rebalance(&workers(3)).await;

    assert_eq!(weights.len(), 3);
    assert_eq!(pusher.pushed.lock().len(), 2);
}

#[tokio::test]
async fn test_shell_pusher_substitutes_placeholders() {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("weights");
    let command = ShellCommand::new(format!("echo {{name}}={{weight}} >> {}", out.display()));

    command.push("web1", 42).await.unwrap();
    assert_eq!(std::fs::read_to_string(&out).unwrap().trim(), "web1=42");
}

#[tokio::test]
async fn test_spawned_balancer_reports_weights() {
    let (_fleet_tx, fleet_rx) = watch::channel(Arc::new(snapshot_of(workers(2))));
    let (tx, mut rx) = mpsc::channel(4);
    let balancer = WeightBalancer::new(RecordingPusher::default(), 0.7, Duration::from_millis(20));
    let task = balancer.spawn(fleet_rx, tx);

    match tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap() {
        Some(Event::WeightsComputed(weights)) => {
            assert_eq!(weights, vec![(1, 256), (2, 256)]);
        }
        other => panic!("unexpected {other:?}"),
    }

    drop(rx);
    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("balancer should stop once the loop is gone")
        .unwrap();
}

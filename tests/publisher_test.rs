
use std::path::Path;

use overlord::publisher::{ConfigPublisher, PlaceholderTemplate, PublishError};
use overlord::shell::ShellCommand;
use test_utils::{test_publisher, workers, TEMPLATE};

#[tokio::test]
async fn test_publish_is_idempotent() {
    let (dir, publisher) = test_publisher("true");
    let mut fleet = workers(2);
    fleet[1].weight = 77;

    publisher.publish(&fleet).await.unwrap();
    let first = std::fs::read(dir.path().join("haproxy.cfg")).unwrap();
    publisher.publish(&fleet).await.unwrap();
    let second = std::fs::read(dir.path().join("haproxy.cfg")).unwrap();
    assert_eq!(first, second);

    let text = String::from_utf8(first).unwrap();
    assert_eq!(
        text,
        "backend web\n    balance roundrobin\n    server web1 203.0.113.1:80 weight 1 check\n    server web2 203.0.113.2:80 weight 77 check\n"
    );
}

#[tokio::test]
async fn test_write_leaves_no_temp_file() {
    let (dir, publisher) = test_publisher("true");
    publisher.publish(&workers(1)).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["haproxy.cfg".to_string()]);
}

#[tokio::test]
async fn test_reload_runs_after_write() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("balance.cfg");
    let marker = dir.path().join("reloaded");
    // 重载命令读取刚写入的文件
    let reload = format!("cp {} {}", output.display(), marker.display());
    let publisher = ConfigPublisher::new(
        Box::new(PlaceholderTemplate::new(TEMPLATE)),
        &output,
        ShellCommand::new(reload),
    );

    publisher.publish(&workers(3)).await.unwrap();
    let copied = std::fs::read_to_string(&marker).unwrap();
    assert_eq!(copied.matches("server ").count(), 3);
}

#[tokio::test]
async fn test_failed_reload_surfaces_error() {
    let (dir, publisher) = test_publisher("echo nope >&2; exit 1");
    let err = publisher.publish(&workers(1)).await.unwrap_err();

    assert!(matches!(err, PublishError::Reload(_)));
    assert!(err.to_string().contains("nope"));
    // 文件已写入，只有重载失败
    assert!(dir.path().join("haproxy.cfg").exists());
}

#[tokio::test]
async fn test_empty_fleet_renders_static_lines() {
    let (_dir, publisher) = test_publisher("true");
    let text = publisher.render(&[]).unwrap();
    assert_eq!(text, "backend web\n    balance roundrobin\n");
}

#[test]
fn test_missing_template_is_reported() {
    let err = PlaceholderTemplate::load(Path::new("/nonexistent/overlord/haproxy.tmpl")).unwrap_err();
    assert!(matches!(err, PublishError::Template { .. }));
}

#[test]
fn test_template_without_server_line_rejected() {
    let publisher = ConfigPublisher::new(
        Box::new(PlaceholderTemplate::new("global\n    daemon\n")),
        "unused.cfg",
        ShellCommand::new("true"),
    );
    assert!(matches!(
        publisher.render(&workers(1)),
        Err(PublishError::Render(_))
    ));
}

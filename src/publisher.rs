//! 负载均衡配置发布
//!
//! 将注册表渲染为负载均衡配置文件，原子替换后执行重载命令。
//!
//! [`PlaceholderTemplate`] 只做占位符替换：包含 `{name}` 的模板行按节点逐一输出，
//! 并替换 `{name}`、`{address}`、`{weight}`；其余行原样复制。
//!
//! ```text
//! backend workers
//!     balance roundrobin
//!     server {name} {address}:80 weight {weight} check
//! ```

use std::io;
use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::registry::Worker;
use crate::retry::RetryPolicy;
use crate::shell::{CommandError, ShellCommand};

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("error reading template {path}: {source}")]
    Template { path: PathBuf, source: io::Error },
    #[error("error rendering config: {0}")]
    Render(String),
    #[error("error writing config {path}: {source}")]
    Write { path: PathBuf, source: io::Error },
    #[error("reload failed: {0}")]
    Reload(#[from] CommandError),
}

/// 单条后端记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendEntry<'a> {
    pub name: &'a str,
    pub address: &'a str,
    pub weight: u16,
}

impl<'a> From<&'a Worker> for BackendEntry<'a> {
    fn from(w: &'a Worker) -> Self {
        Self {
            name: &w.name,
            address: &w.public_address,
            weight: w.weight,
        }
    }
}

/// 将后端记录渲染为配置内容
pub trait ConfigRenderer: Send + Sync {
    fn render(&self, entries: &[BackendEntry<'_>]) -> Result<String, PublishError>;
}

#[derive(Debug, Clone)]
pub struct PlaceholderTemplate {
    template: String,
}

impl PlaceholderTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// 读取模板，模板缺失属于启动期错误
    pub fn load(path: &Path) -> Result<Self, PublishError> {
        let template = std::fs::read_to_string(path).map_err(|source| PublishError::Template {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self::new(template))
    }
}

impl ConfigRenderer for PlaceholderTemplate {
    fn render(&self, entries: &[BackendEntry<'_>]) -> Result<String, PublishError> {
        if !self.template.contains("{name}") {
            return Err(PublishError::Render(
                "template has no `{name}` line to repeat".to_string(),
            ));
        }
        let mut out = String::with_capacity(self.template.len() + entries.len() * 64);
        for line in self.template.split_inclusive('\n') {
            if !line.contains("{name}") {
                out.push_str(line);
                continue;
            }
            for entry in entries {
                let weight = entry.weight.to_string();
                out.push_str(
                    &line
                        .replace("{name}", entry.name)
                        .replace("{address}", entry.address)
                        .replace("{weight}", &weight),
                );
            }
        }
        Ok(out)
    }
}

/// 配置发布器
pub struct ConfigPublisher {
    renderer: Box<dyn ConfigRenderer>,
    output: PathBuf,
    reload: ShellCommand,
    retry: RetryPolicy,
}

impl ConfigPublisher {
    pub fn new(
        renderer: Box<dyn ConfigRenderer>,
        output: impl Into<PathBuf>,
        reload: ShellCommand,
    ) -> Self {
        Self {
            renderer,
            output: output.into(),
            reload,
            retry: RetryPolicy::reload(),
        }
    }

    pub fn with_reload_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn output_path(&self) -> &Path {
        &self.output
    }

    /// 按注册表顺序渲染，输入不变则输出字节相同
    pub fn render(&self, workers: &[Worker]) -> Result<String, PublishError> {
        let entries: Vec<BackendEntry<'_>> = workers.iter().map(BackendEntry::from).collect();
        self.renderer.render(&entries)
    }

    /// 先写入同目录临时文件，再重命名覆盖目标
    pub async fn write(&self, contents: &str) -> Result<(), PublishError> {
        let file_name = self
            .output
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "balance.cfg".to_string());
        let tmp = self.output.with_file_name(format!(".{file_name}.tmp"));
        let write_err = |source: io::Error| PublishError::Write {
            path: self.output.clone(),
            source,
        };

        tokio::fs::write(&tmp, contents).await.map_err(&write_err)?;
        if let Err(source) = tokio::fs::rename(&tmp, &self.output).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(write_err(source));
        }
        Ok(())
    }

    /// 执行重载命令，失败时退避重试
    pub async fn reload(&self) -> Result<String, PublishError> {
        let mut attempt = 0;
        loop {
            match self.reload.run().await {
                Ok(out) => return Ok(out),
                Err(e) if attempt + 1 < self.retry.max_attempts => {
                    warn!("Reload attempt {} failed: {}", attempt + 1, e);
                    tokio::time::sleep(self.retry.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn publish(&self, workers: &[Worker]) -> Result<(), PublishError> {
        let contents = self.render(workers)?;
        self.write(&contents).await?;
        let out = self.reload().await?;
        info!(
            "Published {} workers to {} (reload output: '{}')",
            workers.len(),
            self.output.display(),
            out
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_template_without_name_line_rejected() {
        let tmpl = PlaceholderTemplate::new("global\n");
        assert!(matches!(tmpl.render(&[]), Err(PublishError::Render(_))));
    }

    #[test]
    fn test_lines_repeat_per_entry() {
        let tmpl = PlaceholderTemplate::new("backend\n  server {name} {address} {weight}\nend\n");
        let entries = [
            BackendEntry { name: "web1", address: "1.1.1.1", weight: 10 },
            BackendEntry { name: "web2", address: "2.2.2.2", weight: 256 },
        ];
        let out = tmpl.render(&entries).unwrap();
        assert_eq!(
            out,
            "backend\n  server web1 1.1.1.1 10\n  server web2 2.2.2.2 256\nend\n"
        );
    }
}

//! overlord: autoscaling master.
//!
//! ```text
//! overlord --command "systemctl reload haproxy" \
//!     --balancetemplate haproxy.cfg.tmpl --balanceconfig /etc/haproxy/haproxy.cfg \
//!     --workerconfig workers.json --token $DO_TOKEN --image 12345678
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{info, warn};

use overlord::balancer::{NoPush, WeightBalancer};
use overlord::config::{ConfigError, MachineProfile, StatsdConfig};
use overlord::metrics::StatsdRecorder;
use overlord::provider::DigitalOceanProvider;
use overlord::publisher::{ConfigPublisher, PlaceholderTemplate};
use overlord::queen::lifecycle::discover_fleet;
use overlord::queen::survey::SurveyServer;
use overlord::shell::ShellCommand;
use overlord::{ControlLoop, OverlordError, ScalerConfig, WorkerConfig};

#[derive(Parser, Debug)]
#[command(name = "overlord", about = "Autoscaling master for a load-balanced worker fleet")]
struct Cli {
    /// The IP address and port to bind the survey socket to.
    #[arg(long, default_value = "0.0.0.0:8000")]
    host: String,

    /// Command to run after writing the load balancer's new config file.
    #[arg(long)]
    command: String,

    /// Load balancer config template.
    #[arg(long = "balancetemplate")]
    balance_template: PathBuf,

    /// Load balancer config file to write.
    #[arg(long = "balanceconfig")]
    balance_config: PathBuf,

    /// Worker config file (JSON).
    #[arg(long = "workerconfig")]
    worker_config: PathBuf,

    /// DigitalOcean API token.
    #[arg(long, env = "DIGITALOCEAN_TOKEN", hide_env_values = true)]
    token: String,

    /// Image used when creating workers.
    #[arg(long)]
    image: String,

    #[arg(long, default_value = "tor1")]
    region: String,

    #[arg(long, default_value = "512mb")]
    size: String,

    /// Average load above which the fleet is overloaded.
    #[arg(long, default_value_t = 0.7)]
    overloaded: f64,

    /// Average load below which the fleet is underused.
    #[arg(long, default_value_t = 0.3)]
    underused: f64,

    #[arg(long, default_value_t = 1)]
    min: usize,

    #[arg(long, default_value_t = 10)]
    max: usize,

    /// Delay between provider status polls (`3s`, `500ms`).
    #[arg(long = "pollinterval", default_value = "3s", value_parser = humantime::parse_duration)]
    poll_interval: Duration,

    /// Provider status polls before giving up on a new worker.
    #[arg(long = "provisionattempts", default_value_t = 40)]
    provision_attempts: u32,

    /// Quiet period after a fleet change.
    #[arg(long = "cooldowninterval", default_value = "15s", value_parser = humantime::parse_duration)]
    cooldown_interval: Duration,

    /// How long to collect survey responses.
    #[arg(long = "surveydeadline", default_value = "1s", value_parser = humantime::parse_duration)]
    survey_deadline: Duration,

    /// Delay between surveys.
    #[arg(long = "surveytimeout", default_value = "3s", value_parser = humantime::parse_duration)]
    query_interval: Duration,

    /// Delay between weight pushes.
    #[arg(long = "weightinterval", default_value = "60s", value_parser = humantime::parse_duration)]
    weight_interval: Duration,

    /// Per-worker weight command; `{name}` and `{weight}` are substituted.
    #[arg(long = "weightcommand")]
    weight_command: Option<String>,

    /// Scale-down victim: `newest` or `least-loaded`.
    #[arg(long, default_value = "newest")]
    victim: String,

    /// Stream statsd gauges.
    #[arg(long)]
    statsd: bool,

    #[arg(long = "statsdaddr")]
    statsd_addr: Option<SocketAddr>,

    #[arg(long = "statsdprefix", default_value = "autoscaler.")]
    statsd_prefix: String,

    /// Delay between statsd flushes.
    #[arg(long = "statsdinterval", default_value = "2s", value_parser = humantime::parse_duration)]
    statsd_interval: Duration,
}

impl Cli {
    fn scaler_config(&self, name_prefix: String) -> Result<ScalerConfig, ConfigError> {
        let statsd = if self.statsd {
            let addr = self.statsd_addr.ok_or(ConfigError::Missing("statsdaddr"))?;
            Some(StatsdConfig {
                addr,
                prefix: self.statsd_prefix.clone(),
                interval: self.statsd_interval,
            })
        } else {
            None
        };

        let config = ScalerConfig {
            bind: self.host.clone(),
            reload_command: self.command.clone(),
            weight_command: self.weight_command.clone(),
            template_path: self.balance_template.clone(),
            output_path: self.balance_config.clone(),
            name_prefix,
            machine: MachineProfile {
                region: self.region.clone(),
                size: self.size.clone(),
                image: self.image.clone(),
            },
            overloaded_threshold: self.overloaded,
            underused_threshold: self.underused,
            min_workers: self.min,
            max_workers: self.max,
            poll_interval: self.poll_interval,
            cooldown_interval: self.cooldown_interval,
            survey_deadline: self.survey_deadline,
            query_interval: self.query_interval,
            weight_interval: self.weight_interval,
            provision_attempts: self.provision_attempts,
            victim_policy: self.victim.clone(),
            statsd,
        };
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), OverlordError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.token.trim().is_empty() {
        return Err(ConfigError::Missing("token").into());
    }
    let workers = WorkerConfig::load(&cli.worker_config)?;
    let config = cli.scaler_config(workers.name_prefix.clone())?;

    let provider = Arc::new(DigitalOceanProvider::new(cli.token.clone()));
    let registry = discover_fleet(provider.as_ref(), &workers).await?;

    let template = PlaceholderTemplate::load(&config.template_path)?;
    let publisher = ConfigPublisher::new(
        Box::new(template),
        config.output_path.clone(),
        ShellCommand::new(config.reload_command.clone()),
    );

    // 传输层初始化失败直接退出
    let survey = SurveyServer::bind(&config.survey_endpoint(), config.survey_deadline)?;

    let (control, handle) = ControlLoop::new(&config, registry, provider, publisher)?;
    if let Some(statsd) = &config.statsd {
        if StatsdRecorder::new(statsd.prefix.clone())
            .install(statsd.addr, statsd.interval)
            .is_err()
        {
            warn!("A metrics recorder is already installed, statsd disabled");
        }
    }

    survey.spawn(handle.fleet.clone(), handle.events.clone(), config.query_interval);
    match &config.weight_command {
        Some(cmd) => WeightBalancer::new(
            ShellCommand::new(cmd.clone()),
            config.overloaded_threshold,
            config.weight_interval,
        )
        .spawn(handle.fleet.clone(), handle.events.clone()),
        None => WeightBalancer::new(NoPush, config.overloaded_threshold, config.weight_interval)
            .spawn(handle.fleet.clone(), handle.events.clone()),
    };

    info!("Starting master at {}", config.bind);
    control.run().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args<'a>(extra: &[&'a str]) -> Vec<&'a str> {
        let mut args = vec![
            "overlord",
            "--command",
            "true",
            "--balancetemplate",
            "lb.tmpl",
            "--balanceconfig",
            "lb.cfg",
            "--workerconfig",
            "workers.json",
            "--token",
            "t",
            "--image",
            "ubuntu",
        ];
        args.extend_from_slice(extra);
        args
    }

    fn parse(extra: &[&str]) -> Cli {
        Cli::try_parse_from(args(extra)).unwrap()
    }

    #[test]
    fn test_default_intervals() {
        let config = parse(&[]).scaler_config("web".into()).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(3));
        assert_eq!(config.cooldown_interval, Duration::from_secs(15));
        assert_eq!(config.weight_interval, Duration::from_secs(60));
    }

    #[test]
    fn test_sub_second_durations() {
        let cli = parse(&["--surveydeadline", "500ms", "--surveytimeout", "1s 500ms"]);
        let config = cli.scaler_config("web".into()).unwrap();
        assert_eq!(config.survey_deadline, Duration::from_millis(500));
        assert_eq!(config.query_interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_bare_number_rejected() {
        assert!(Cli::try_parse_from(args(&[])).is_ok());
        assert!(Cli::try_parse_from(args(&["--pollinterval", "3"])).is_err());
    }
}

//! Standalone mode: scheduler plus in-process cluster in one process.
//!
//! In this mode, the daemon:
//! 1. Loads the config and the task classes under its `class_dirs`
//! 2. Builds a local cluster from the `[[agents]]` tables
//! 3. Runs the scheduler and the offer loop
//! 4. Optionally deploys and configures a demo environment
//! 5. On Ctrl-C, tears the environment down and prints a status summary

use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use offergrid_core::SchedulerConfig;
use offergrid_roster::{ClassCache, RoleSpec};
use offergrid_scheduler::{InMemoryMetrics, LocalCluster, Scheduler, SchedulerContext};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Environment id of the demo deployment.
pub const DEMO_ENV: &str = "demo";

/// `class=count` from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploySpec {
    pub class: String,
    pub count: usize,
}

impl FromStr for DeploySpec {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (class, count) = match s.split_once('=') {
            Some((class, count)) => {
                let count = count
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| format!("bad count in {s:?}: {e}"))?;
                (class.trim(), count)
            }
            None => (s.trim(), 1),
        };
        if class.is_empty() {
            return Err(format!("missing class name in {s:?}"));
        }
        if count == 0 {
            return Err(format!("count must be at least 1 in {s:?}"));
        }
        Ok(Self {
            class: class.to_string(),
            count,
        })
    }
}

pub fn parse_deploy(s: &str) -> Result<DeploySpec, String> {
    s.parse()
}

/// Load and validate `path`. Relative class directories are taken
/// relative to the config file.
pub fn load_config(path: &Path) -> anyhow::Result<SchedulerConfig> {
    let mut config = SchedulerConfig::from_file(path).with_context(|| format!("load config {}", path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
    config.class_dirs = config
        .class_dirs
        .into_iter()
        .map(|d| if d.is_relative() { base.join(d) } else { d })
        .collect();
    Ok(config)
}

/// `offergridd check`: config and every class directory must load.
pub fn check(path: &Path) -> anyhow::Result<()> {
    let config = load_config(path)?;
    let mut classes = 0;
    for dir in &config.class_dirs {
        classes += offergrid_core::class::load_dir(&config.class_repo, dir)
            .with_context(|| format!("read classes in {}", dir.display()))?
            .len();
    }
    println!(
        "{}: ok, {} agents, {} task classes",
        path.display(),
        config.agents.len(),
        classes
    );
    Ok(())
}

/// `offergridd classes`: one line per parsed class.
pub fn classes(dir: &Path, repo: &str) -> anyhow::Result<()> {
    let parsed = offergrid_core::class::load_dir(repo, dir).with_context(|| format!("read classes in {}", dir.display()))?;
    for class in parsed {
        println!(
            "{}\tmode={:?}\tcpu={}\tmem={}",
            class.id,
            class.control_mode,
            class.wants.cpu.unwrap_or(0.0),
            class.wants.memory.unwrap_or(0.0),
        );
    }
    Ok(())
}

/// `offergridd run`.
pub async fn run(path: &Path, deploy: Vec<DeploySpec>, offer_interval: u64) -> anyhow::Result<()> {
    let config = load_config(path)?;
    info!(config = %path.display(), agents = config.agents.len(), "offergrid daemon starting in standalone mode");

    let daemon = Standalone::start(config, Duration::from_secs(offer_interval.max(1))).await?;

    let deployed = if deploy.is_empty() {
        None
    } else {
        Some(daemon.deploy_demo(&deploy).await?)
    };

    tokio::signal::ctrl_c()
        .await
        .context("install Ctrl-C handler")?;
    info!("shutdown signal received");

    let summary = daemon.stop(deployed.as_deref()).await?;
    print!("{summary}");
    info!("offergrid daemon stopped");
    Ok(())
}

/// A running scheduler with its local cluster.
pub struct Standalone {
    scheduler: Arc<Scheduler>,
    metrics: Arc<InMemoryMetrics>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
}

impl Standalone {
    pub async fn start(config: SchedulerConfig, offer_interval: Duration) -> anyhow::Result<Self> {
        let classes = Arc::new(ClassCache::new());
        for dir in &config.class_dirs {
            classes
                .load_dir(&config.class_repo, dir)
                .await
                .with_context(|| format!("load classes in {}", dir.display()))?;
        }
        if classes.is_empty().await {
            warn!("no task classes loaded");
        }

        let (events_tx, events_rx) = mpsc::channel(1024);
        let cluster = Arc::new(LocalCluster::new(&config.agents, events_tx).context("build local cluster")?);
        let metrics = Arc::new(InMemoryMetrics::new());
        let ctx = SchedulerContext::new(config, cluster.clone())
            .with_metrics(metrics.clone())
            .with_classes(classes);
        let scheduler = Scheduler::new(ctx);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let workers = vec![
            tokio::spawn(scheduler.clone().run(events_rx, shutdown_rx.clone())),
            tokio::spawn(cluster.run_offers(offer_interval, shutdown_rx)),
        ];
        info!("scheduler started");

        Ok(Self {
            scheduler,
            metrics,
            shutdown,
            workers,
        })
    }

    #[cfg(test)]
    fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Build the demo environment, acquire one task per requested
    /// instance and configure them. Returns the locked task ids.
    pub async fn deploy_demo(&self, specs: &[DeploySpec]) -> anyhow::Result<Vec<String>> {
        let ctx = self.scheduler.context();
        for spec in specs {
            if ctx.classes.get_class(&spec.class).await.is_none() {
                bail!("unknown task class {:?}", spec.class);
            }
        }

        let root = ctx.roles.add_root(DEMO_ENV, RoleSpec::new(DEMO_ENV));
        let mut descriptors = Vec::new();
        for spec in specs {
            for i in 0..spec.count {
                let role = ctx.roles.add_child(root, RoleSpec::new(format!("{}{i}", spec.class)))?;
                descriptors.push(ctx.roles.descriptor(role, &spec.class)?);
            }
        }

        let handle = self.scheduler.handle();
        let task_ids = handle
            .acquire(DEMO_ENV, descriptors)
            .await
            .context("acquire demo tasks")?;
        handle
            .configure(DEMO_ENV, task_ids.clone())
            .await
            .context("configure demo tasks")?;
        info!(env_id = DEMO_ENV, tasks = task_ids.len(), "demo environment configured");
        Ok(task_ids)
    }

    /// Release the demo environment if there is one, kill every idle task
    /// and stop the loops. Returns the status summary.
    pub async fn stop(self, deployed: Option<&[String]>) -> anyhow::Result<String> {
        let ctx = self.scheduler.context();
        if let Some(task_ids) = deployed {
            if let Err(e) = self.scheduler.hooks().cleanup(DEMO_ENV).await {
                warn!(env_id = DEMO_ENV, error = %e, "cleanup hooks failed");
            }
            self.scheduler
                .handle()
                .release(DEMO_ENV, task_ids.to_vec())
                .await
                .context("release demo tasks")?;
            ctx.roles.remove_env(DEMO_ENV);
        }

        let report = self.scheduler.taskman().cleanup().await.context("kill idle tasks")?;
        if !report.is_ok() {
            warn!(running = ?report.running, "some tasks could not be killed");
        }
        let remaining = ctx.roster.len().await;

        let _ = self.shutdown.send(true);
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "background task failed");
            }
        }

        Ok(format!(
            "# killed {} tasks, {} left in roster\n{}",
            report.killed.len(),
            remaining,
            self.metrics.render()
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const READOUT: &str = "name: readout\ncontrol:\n  mode: direct\ncommand:\n  value: readout.exe\nwants:\n  cpu: 1\n  memory: 256\n";

    fn write_setup(dir: &Path) -> PathBuf {
        std::fs::create_dir_all(dir.join("classes")).unwrap();
        std::fs::write(dir.join("classes/readout.yaml"), READOUT).unwrap();
        let config = dir.join("offergrid.toml");
        std::fs::write(
            &config,
            r#"
class_dirs = ["classes"]
kill_ack_timeout_secs = 5
revive_refill_secs = 0

[[agents]]
hostname = "flp01"
cpus = 4.0
mem = 4096.0
ports = "9000-9100,30000-30100"
"#,
        )
        .unwrap();
        config
    }

    #[test]
    fn deploy_spec_parsing() {
        assert_eq!(
            parse_deploy("readout=3").unwrap(),
            DeploySpec {
                class: "readout".into(),
                count: 3
            }
        );
        assert_eq!(parse_deploy("qc").unwrap().count, 1);
        assert!(parse_deploy("=2").is_err());
        assert!(parse_deploy("qc=0").is_err());
        assert!(parse_deploy("qc=many").is_err());
    }

    #[test]
    fn class_dirs_resolve_against_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_setup(dir.path());
        let config = load_config(&path).unwrap();
        assert_eq!(config.class_dirs, vec![dir.path().join("classes")]);
        assert_eq!(config.agents.len(), 1);
        check(&path).unwrap();
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("offergrid.toml");
        std::fs::write(&path, "deploy_max_attempts = 0\n").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("deploy_max_attempts"));
    }

    #[tokio::test]
    async fn demo_deploys_and_tears_down() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&write_setup(dir.path())).unwrap();
        let daemon = Standalone::start(config, Duration::from_millis(10)).await.unwrap();

        let ids = daemon
            .deploy_demo(&[DeploySpec {
                class: "readout".into(),
                count: 2,
            }])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);
        let roster = daemon.scheduler().context().roster.clone();
        for id in &ids {
            assert_eq!(
                roster.get(id).await.unwrap().state,
                offergrid_core::State::Configured
            );
        }

        let summary = daemon.stop(Some(&ids)).await.unwrap();
        assert!(summary.starts_with("# killed 2 tasks, 0 left in roster"));
        assert!(summary.contains("offergrid_tasks_launched 2"));
    }

    #[tokio::test]
    async fn unknown_demo_class_fails_early() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&write_setup(dir.path())).unwrap();
        let daemon = Standalone::start(config, Duration::from_millis(10)).await.unwrap();
        let err = daemon
            .deploy_demo(&[DeploySpec {
                class: "nope".into(),
                count: 1,
            }])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown task class"));
        daemon.stop(None).await.unwrap();
    }
}

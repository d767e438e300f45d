use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use skiff_reconcile::{
    DEFAULT_ENDPOINT_SYNC_INTERVAL, DEFAULT_RECONCILE_INTERVAL, DEFAULT_RESTART_DELAY,
    DEFAULT_WATCH_COOLDOWN,
};

use crate::container_info::DEFAULT_CONTAINER_INFO_PORT;

/// Placement policy used for new tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Random,
    RoundRobin,
    FirstFit,
}

impl FromStr for SchedulerKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(SchedulerKind::Random),
            "round-robin" | "roundrobin" => Ok(SchedulerKind::RoundRobin),
            "first-fit" | "firstfit" => Ok(SchedulerKind::FirstFit),
            other => bail!("unknown scheduler '{other}' (expected random, round-robin or first-fit)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// etcd base URLs. Empty means an in-process store.
    pub etcd_servers: Vec<String>,
    pub machines: Vec<String>,
    pub scheduler: SchedulerKind,
    pub sync_interval: Duration,
    pub endpoint_sync_interval: Duration,
    pub watch_cooldown: Duration,
    pub loop_restart_delay: Duration,
    pub container_info_port: u16,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let etcd_servers = split_list(lookup("SKIFF_ETCD_SERVERS").as_deref().unwrap_or(""));

        let machines = split_list(lookup("SKIFF_MACHINES").as_deref().unwrap_or(""));
        if machines.is_empty() {
            bail!("SKIFF_MACHINES must list at least one machine");
        }

        let scheduler = lookup("SKIFF_SCHEDULER")
            .map(|s| s.parse())
            .transpose()?
            .unwrap_or(SchedulerKind::FirstFit);

        let sync_interval = secs(&lookup, "SKIFF_SYNC_INTERVAL_SECS", DEFAULT_RECONCILE_INTERVAL)?;
        let endpoint_sync_interval = secs(
            &lookup,
            "SKIFF_ENDPOINT_SYNC_INTERVAL_SECS",
            DEFAULT_ENDPOINT_SYNC_INTERVAL,
        )?;
        let watch_cooldown = secs(&lookup, "SKIFF_WATCH_COOLDOWN_SECS", DEFAULT_WATCH_COOLDOWN)?;
        let loop_restart_delay = secs(&lookup, "SKIFF_LOOP_RESTART_SECS", DEFAULT_RESTART_DELAY)?;

        let container_info_port = match lookup("SKIFF_CONTAINER_INFO_PORT") {
            Some(v) => v
                .trim()
                .parse()
                .with_context(|| format!("invalid SKIFF_CONTAINER_INFO_PORT '{v}'"))?,
            None => DEFAULT_CONTAINER_INFO_PORT,
        };

        let log_level = lookup("SKIFF_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            etcd_servers,
            machines,
            scheduler,
            sync_interval,
            endpoint_sync_interval,
            watch_cooldown,
            loop_restart_delay,
            container_info_port,
            log_level,
        })
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(v) => {
            let secs: u64 = v
                .trim()
                .parse()
                .with_context(|| format!("invalid {key} '{v}'"))?;
            Ok(Duration::from_secs(secs))
        }
        None => Ok(default),
    }
}

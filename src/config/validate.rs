// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, JobConfig, RawConfigFile};
use crate::errors::{Result, RungateError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::RungateError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.notify, raw.job))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_jobs(cfg)?;
    validate_global_config(cfg)?;
    for (id, job) in cfg.job.iter() {
        validate_job(id, job)?;
    }
    validate_job_dependencies(cfg)?;
    validate_dependency_graph(cfg)?;
    Ok(())
}

fn ensure_has_jobs(cfg: &RawConfigFile) -> Result<()> {
    if cfg.job.is_empty() {
        return Err(RungateError::ConfigError(
            "config must contain at least one [job.<id>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.connect_timeout_secs == 0 {
        return Err(RungateError::ConfigError(
            "[config].connect_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    // `:memory:` databases are private per connection, so the ledger's
    // in-memory database cannot double as the warehouse.
    let shares_memory_ledger =
        cfg.config.warehouse_path.is_none() && cfg.config.ledger_path.as_os_str() == ":memory:";
    if shares_memory_ledger {
        if let Some((id, _)) = cfg.job.iter().find(|(_, job)| job.uses_warehouse()) {
            return Err(RungateError::ConfigError(format!(
                "job '{id}' uses the warehouse, which needs [config].warehouse_path \
                 when ledger_path is \":memory:\""
            )));
        }
    }
    if cfg.config.source_count_timeout_secs == 0 {
        return Err(RungateError::ConfigError(
            "[config].source_count_timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.notify.timeout_secs == 0 {
        return Err(RungateError::ConfigError(
            "[notify].timeout_secs must be >= 1 (got 0)".to_string(),
        ));
    }
    if cfg.config.log_retention_days == 0 {
        return Err(RungateError::ConfigError(
            "[config].log_retention_days must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_job(id: &str, job: &JobConfig) -> Result<()> {
    if job.cmd.trim().is_empty() {
        return Err(config_error(id, "`cmd` must not be empty"));
    }

    for endpoint in job.preconditions.reachable.iter() {
        let valid = endpoint
            .rsplit_once(':')
            .map(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            .unwrap_or(false);
        if !valid {
            return Err(config_error(
                id,
                &format!("reachable endpoint '{endpoint}' must be host:port"),
            ));
        }
    }

    if let Some(ref sc) = job.source_count {
        match (&sc.sql, &sc.cmd) {
            (Some(_), None) | (None, Some(_)) => {}
            _ => {
                return Err(config_error(
                    id,
                    "source_count needs exactly one of `sql` or `cmd`",
                ));
            }
        }
    }

    for rollup in job.rollup.iter() {
        if !is_sql_identifier(&rollup.table) {
            return Err(config_error(
                id,
                &format!("rollup table '{}' is not a plain identifier", rollup.table),
            ));
        }
        if rollup.key.is_empty() {
            return Err(config_error(
                id,
                &format!("rollup into '{}' needs at least one key column", rollup.table),
            ));
        }
        if let Some(bad) = rollup.key.iter().find(|k| !is_sql_identifier(k)) {
            return Err(config_error(
                id,
                &format!("rollup key column '{bad}' is not a plain identifier"),
            ));
        }
    }

    for alert in job.alert.iter() {
        if alert.alert_type.trim().is_empty() {
            return Err(config_error(id, "alert_type must not be empty"));
        }
    }

    Ok(())
}

fn validate_job_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (id, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            if !cfg.job.contains_key(dep) {
                return Err(RungateError::ConfigError(format!(
                    "job '{}' has unknown dependency '{}' in `after`",
                    id, dep
                )));
            }
            if dep == id {
                return Err(RungateError::ConfigError(format!(
                    "job '{}' cannot depend on itself in `after`",
                    id
                )));
            }
        }
    }
    Ok(())
}

fn validate_dependency_graph(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: dep -> job
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in cfg.job.keys() {
        graph.add_node(id.as_str());
    }

    for (id, job) in cfg.job.iter() {
        for dep in job.after.iter() {
            graph.add_edge(dep.as_str(), id.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RungateError::DependencyCycle(format!(
            "cycle detected in job dependencies involving job '{}'",
            cycle.node_id()
        ))),
    }
}

fn config_error(job_id: &str, msg: &str) -> RungateError {
    RungateError::ConfigError(format!("job '{job_id}': {msg}"))
}

/// Table and column names are spliced into SQL, so only plain identifiers are
/// accepted.
pub fn is_sql_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use rungate::config::{
    AlertSpec, ConfigFile, ConfigSection, JobConfig, NotifySection, Preconditions,
    RawConfigFile, RollupSpec, SourceCount,
};
use rungate::types::RunDatePolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                notify: NotifySection::default(),
                job: BTreeMap::new(),
            },
        }
    }

    pub fn with_job(mut self, id: &str, job: JobConfig) -> Self {
        self.config.job.insert(id.to_string(), job);
        self
    }

    pub fn with_ledger_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config.ledger_path = path.into();
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `JobConfig`.
pub struct JobConfigBuilder {
    job: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            job: JobConfig {
                name: None,
                cmd: cmd.to_string(),
                run_date: RunDatePolicy::default(),
                after: vec![],
                source: None,
                target: None,
                params: BTreeMap::new(),
                preconditions: Preconditions::default(),
                source_count: None,
                processed_count: None,
                rollup: vec![],
                alert: vec![],
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.job.name = Some(name.to_string());
        self
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.job.after.push(dep.to_string());
        self
    }

    pub fn run_date(mut self, policy: RunDatePolicy) -> Self {
        self.job.run_date = policy;
        self
    }

    pub fn source(mut self, source: &str) -> Self {
        self.job.source = Some(source.to_string());
        self
    }

    pub fn target(mut self, target: &str) -> Self {
        self.job.target = Some(target.to_string());
        self
    }

    pub fn param(mut self, key: &str, value: &str) -> Self {
        self.job.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn require_env(mut self, name: &str) -> Self {
        self.job.preconditions.env.push(name.to_string());
        self
    }

    pub fn require_file(mut self, path: &str) -> Self {
        self.job.preconditions.files.push(PathBuf::from(path));
        self
    }

    pub fn require_reachable(mut self, endpoint: &str) -> Self {
        self.job.preconditions.reachable.push(endpoint.to_string());
        self
    }

    pub fn source_count_sql(mut self, query: &str) -> Self {
        self.job.source_count = Some(SourceCount {
            sql: Some(query.to_string()),
            cmd: None,
        });
        self
    }

    pub fn source_count_cmd(mut self, cmd: &str) -> Self {
        self.job.source_count = Some(SourceCount {
            sql: None,
            cmd: Some(cmd.to_string()),
        });
        self
    }

    pub fn processed_count(mut self, query: &str) -> Self {
        self.job.processed_count = Some(query.to_string());
        self
    }

    pub fn rollup(mut self, table: &str, key: &[&str], query: &str) -> Self {
        self.job.rollup.push(RollupSpec {
            table: table.to_string(),
            key: key.iter().map(|k| k.to_string()).collect(),
            query: query.to_string(),
        });
        self
    }

    pub fn alert(mut self, alert_type: &str, query: &str) -> Self {
        self.job.alert.push(AlertSpec {
            alert_type: alert_type.to_string(),
            query: query.to_string(),
        });
        self
    }

    pub fn build(self) -> JobConfig {
        self.job
    }
}

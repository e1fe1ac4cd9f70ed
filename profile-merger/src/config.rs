use std::{str::FromStr, time::Duration};

use envconfig::Envconfig;

use crate::batch::BatchLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkKind {
    Stdout,
    File,
    NoOp,
    Crm,
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdout" => Ok(SinkKind::Stdout),
            "file" => Ok(SinkKind::File),
            "noop" => Ok(SinkKind::NoOp),
            "crm" => Ok(SinkKind::Crm),
            other => Err(format!("Unknown sink: {other}")),
        }
    }
}

#[derive(Envconfig, Clone, Debug)]
pub struct Config {
    // A JSON-lines file, or a folder of them
    #[envconfig(default = "./export")]
    pub input_path: String,

    // Newline-delimited external ids known to the identity store. Unset means nothing matches.
    pub identity_path: Option<String>,

    #[envconfig(default = "stdout")]
    pub sink: SinkKind,

    #[envconfig(default = "./merge-output.jsonl")]
    pub output_path: String,

    #[envconfig(default = "true")]
    pub output_cleanup: bool,

    #[envconfig(default = "http://localhost:8000")]
    pub crm_base_url: String,

    #[envconfig(default = "")]
    pub crm_api_key: String,

    #[envconfig(default = "30")]
    pub crm_timeout_secs: u64,

    // Retries after the first call for 429s, 5xx and transport errors
    #[envconfig(default = "5")]
    pub crm_max_retries: u32,

    // Attached to every purchase update
    #[envconfig(default = "")]
    pub crm_app_id: String,

    #[envconfig(default = "75")]
    pub field_budget: usize,

    #[envconfig(default = "50")]
    pub deletion_chunk_size: usize,

    // Events with a higher merged count are only sent this many times
    #[envconfig(default = "10000")]
    pub max_event_count: u64,

    // 0 lets rayon pick
    #[envconfig(default = "0")]
    pub worker_threads: usize,

    // Once this many calls have gone out within the window, cool down before the next
    #[envconfig(default = "250")]
    pub rate_limit_calls: usize,

    #[envconfig(default = "60")]
    pub rate_limit_window_secs: u64,

    #[envconfig(default = "60")]
    pub rate_limit_cooldown_secs: u64,

    // e.g. 0.0.0.0:9102. Unset means metrics are recorded nowhere.
    pub metrics_bind: Option<String>,
}

impl Config {
    pub fn init_with_defaults() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    pub fn batch_limits(&self) -> BatchLimits {
        BatchLimits {
            field_budget: self.field_budget,
            deletion_chunk_size: self.deletion_chunk_size,
            max_event_count: self.max_event_count,
        }
    }

    pub fn crm_timeout(&self) -> Duration {
        Duration::from_secs(self.crm_timeout_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::init_from_hashmap(&HashMap::new()).unwrap();

        assert_eq!(config.batch_limits(), BatchLimits::default());
        assert_eq!(config.sink, SinkKind::Stdout);
        assert!(config.identity_path.is_none());
        assert_eq!(config.rate_limit_window(), Duration::from_secs(60));
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("FIELD_BUDGET".to_string(), "10".to_string()),
            ("DELETION_CHUNK_SIZE".to_string(), "5".to_string()),
            ("MAX_EVENT_COUNT".to_string(), "100".to_string()),
            ("IDENTITY_PATH".to_string(), "/tmp/ids.txt".to_string()),
        ]);
        let config = Config::init_from_hashmap(&env).unwrap();

        assert_eq!(
            config.batch_limits(),
            BatchLimits {
                field_budget: 10,
                deletion_chunk_size: 5,
                max_event_count: 100,
            }
        );
        assert_eq!(config.identity_path.as_deref(), Some("/tmp/ids.txt"));
    }

    #[test]
    fn test_sink_kind_parsing() {
        assert_eq!("CRM".parse::<SinkKind>(), Ok(SinkKind::Crm));
        assert_eq!("noop".parse::<SinkKind>(), Ok(SinkKind::NoOp));
        assert!("kafka".parse::<SinkKind>().is_err());
    }

    #[test]
    fn test_unknown_sink_is_a_config_error() {
        let env = HashMap::from([("SINK".to_string(), "kafka".to_string())]);
        assert!(Config::init_from_hashmap(&env).is_err());
    }
}

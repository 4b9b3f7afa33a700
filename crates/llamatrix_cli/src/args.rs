//! Command-line arguments and their merge into [`BridgeConfig`].

use std::path::PathBuf;

use clap::Parser;

use llamatrix_core::{BacklogPolicy, BridgeConfig, ConfigError};

/// An Ollama bridge bot for Matrix.
///
/// Settings come from the optional config file first, then from flags and
/// environment variables.
#[derive(Parser, Debug)]
#[command(name = "llamatrix", version, about, long_about = None)]
pub struct Cli {
    /// TOML config file
    #[arg(long, short = 'c', env = "LLAMATRIX_CONFIG")]
    pub config: Option<PathBuf>,

    /// The Matrix username of the account that the bot should use
    #[arg(long, short, env = "LLAMATRIX_USERNAME")]
    pub username: Option<String>,

    /// The password of the Matrix account
    #[arg(long, short, env = "LLAMATRIX_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// The homeserver the account lives on (server name or URL)
    #[arg(long, short = 's', env = "LLAMATRIX_HOMESERVER")]
    pub homeserver: Option<String>,

    /// The Ollama model to chat with
    #[arg(long, short, env = "LLAMATRIX_MODEL")]
    pub model: Option<String>,

    /// The URL of the Ollama server
    #[arg(long = "url", short = 'o', env = "LLAMATRIX_OLLAMA_URL")]
    pub backend_url: Option<String>,

    /// Command prefix required in multi-party rooms
    #[arg(long, env = "LLAMATRIX_PREFIX")]
    pub prefix: Option<String>,

    /// Turns of history sent with each prompt
    #[arg(long, env = "LLAMATRIX_HISTORY_LIMIT")]
    pub history_limit: Option<usize>,

    /// Seconds without output before a generation is abandoned
    #[arg(long)]
    pub idle_timeout: Option<u64>,

    /// Minimum milliseconds between two edits of a streamed reply
    #[arg(long)]
    pub edit_interval_ms: Option<u64>,

    /// Prompts arriving while busy: latest-wins, drop-while-busy or fifo:N
    #[arg(long, value_parser = parse_backlog)]
    pub backlog: Option<BacklogPolicy>,

    /// Retries when the Ollama server is unreachable
    #[arg(long)]
    pub retries: Option<u32>,

    /// Commands buffered per room before new ones are dropped
    #[arg(long)]
    pub inbox_capacity: Option<usize>,

    /// Enable debug logging
    #[arg(long, short)]
    pub verbose: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

fn parse_backlog(value: &str) -> Result<BacklogPolicy, String> {
    match value {
        "latest-wins" => Ok(BacklogPolicy::LatestWins),
        "drop-while-busy" => Ok(BacklogPolicy::DropWhileBusy),
        other => other
            .strip_prefix("fifo:")
            .and_then(|n| n.parse::<usize>().ok())
            .map(BacklogPolicy::Fifo)
            .ok_or_else(|| format!("unknown backlog policy {other:?}")),
    }
}

impl Cli {
    /// Load the config file (if any), apply overrides and validate.
    pub fn to_config(&self) -> Result<BridgeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)?,
            None => BridgeConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut BridgeConfig) {
        fn set<T: Clone>(target: &mut T, value: &Option<T>) {
            if let Some(value) = value {
                *target = value.clone();
            }
        }

        set(&mut config.username, &self.username);
        set(&mut config.password, &self.password);
        set(&mut config.homeserver, &self.homeserver);
        set(&mut config.model, &self.model);
        set(&mut config.backend_url, &self.backend_url);
        set(&mut config.command_prefix, &self.prefix);
        set(&mut config.idle_timeout_secs, &self.idle_timeout);
        set(&mut config.edit_interval_ms, &self.edit_interval_ms);
        set(&mut config.backlog, &self.backlog);
        set(&mut config.unreachable_retries, &self.retries);
        set(&mut config.inbox_capacity, &self.inbox_capacity);
        if self.history_limit.is_some() {
            config.history_limit = self.history_limit;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("llamatrix").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_flags_build_a_valid_config() {
        let cli = parse(&["-u", "llama", "-p", "secret", "-m", "llama3"]);
        let config = cli.to_config().unwrap();

        assert_eq!(config.username, "llama");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.homeserver, "matrix.org");
        assert_eq!(config.backend_url, "http://localhost:11434");
        assert_eq!(config.command_prefix, "!llama");
    }

    #[test]
    fn test_missing_model_is_rejected() {
        let cli = parse(&["-u", "llama", "-p", "secret"]);
        assert!(matches!(cli.to_config(), Err(ConfigError::Missing("model"))));
    }

    #[test]
    fn test_flags_override_config_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "username = \"from-file\"\npassword = \"secret\"\nmodel = \"mistral\"\nhistory_limit = 8"
        )
        .unwrap();
        let path = file.path().to_str().unwrap();

        let cli = parse(&["-c", path, "-m", "llama3", "--url", "http://gpu:11434", "--backlog", "fifo:4"]);
        let config = cli.to_config().unwrap();

        assert_eq!(config.username, "from-file");
        assert_eq!(config.model, "llama3");
        assert_eq!(config.backend_url, "http://gpu:11434");
        assert_eq!(config.history_limit, Some(8));
        assert_eq!(config.backlog, BacklogPolicy::Fifo(4));
    }

    #[test]
    fn test_backlog_values() {
        assert_eq!(parse_backlog("latest-wins"), Ok(BacklogPolicy::LatestWins));
        assert_eq!(parse_backlog("drop-while-busy"), Ok(BacklogPolicy::DropWhileBusy));
        assert_eq!(parse_backlog("fifo:2"), Ok(BacklogPolicy::Fifo(2)));
        assert!(parse_backlog("fifo:").is_err());
        assert!(parse_backlog("random").is_err());
    }
}

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use clap::Parser;
use serde_derive::Deserialize;

pub const SINGLE_SOUND_ENV_VAR: &str = "DOORBELL_SINGLE_SOUND";
pub const DOUBLE_SOUND_ENV_VAR: &str = "DOORBELL_DOUBLE_SOUND";

const DEFAULT_BROKER: &str = "192.168.0.100";

/// Plays a chime and posts to Slack when a doorbell button is pressed.
#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct Cli {
    /// TOML file with [mqtt], [sounds] and [slack] sections
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Sound played on a single press (.wav, .flac or .mp3)
    #[arg(long, env = SINGLE_SOUND_ENV_VAR)]
    pub single_sound: Option<PathBuf>,

    /// Sound played on a double press (.wav, .flac or .mp3)
    #[arg(long, env = DOUBLE_SOUND_ENV_VAR)]
    pub double_sound: Option<PathBuf>,

    /// Webhook for Slack messages
    #[arg(long = "doslack", value_name = "URL")]
    pub slack_webhook: Option<String>,

    /// MQTT broker host
    #[arg(long)]
    pub broker: Option<String>,

    /// MQTT broker port
    #[arg(long)]
    pub port: Option<u16>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub mqtt: MqttConfig,
    pub sounds: Option<SoundConfig>,
    pub slack: Option<SlackConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    #[serde(default = "default_broker")]
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: Option<String>,
    pub topics: Option<Vec<String>>,
    pub keep_alive_seconds: Option<u64>,
}

fn default_broker() -> String {
    DEFAULT_BROKER.to_string()
}

impl Default for MqttConfig {
    fn default() -> Self {
        MqttConfig {
            host: default_broker(),
            port: None,
            username: None,
            password: None,
            client_id: None,
            topics: None,
            keep_alive_seconds: None,
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SoundConfig {
    pub single: Option<PathBuf>,
    pub double: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SlackConfig {
    pub webhook_url: Option<String>,
}

/// Everything the process needs, after flags, environment and file are merged.
#[derive(Debug, Clone)]
pub struct Settings {
    pub mqtt: MqttConfig,
    pub single_sound: PathBuf,
    pub double_sound: PathBuf,
    pub slack_webhook: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }
}

impl Settings {
    pub fn resolve(cli: Cli, config: AppConfig) -> anyhow::Result<Self> {
        let sounds = config.sounds.unwrap_or_default();
        let single_sound = cli.single_sound.or(sounds.single);
        let double_sound = cli.double_sound.or(sounds.double);

        let (Some(single_sound), Some(double_sound)) = (single_sound, double_sound) else {
            bail!(
                "need to define {} and {}",
                SINGLE_SOUND_ENV_VAR,
                DOUBLE_SOUND_ENV_VAR
            );
        };

        let mut mqtt = config.mqtt;
        if let Some(broker) = cli.broker {
            mqtt.host = broker;
        }
        if cli.port.is_some() {
            mqtt.port = cli.port;
        }

        let slack_webhook = cli
            .slack_webhook
            .or(config.slack.and_then(|s| s.webhook_url))
            .filter(|url| !url.trim().is_empty());

        Ok(Settings {
            mqtt,
            single_sound,
            double_sound,
            slack_webhook,
        })
    }
}

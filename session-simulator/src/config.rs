use anyhow::{bail, Context, Result};
use common::StreamId;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use streaming_engine::EngineConfig;

/// 配置文件路径环境变量
pub const CONFIG_ENV: &str = "SESSION_SIMULATOR_CONFIG";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub session_name: String,
    /// 交付多少个样本后暂停读取
    pub max_samples: usize,
    pub engine: EngineConfig,
    pub streams: Vec<StreamConfig>,
}

/// 单路模拟流
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub stream_id: StreamId,
    pub medium: String,
    pub codec_name: String,
    /// 两次交付之间的间隔
    pub packet_interval_ms: u64,
    /// 单次交付的负载大小（H.264为图像NAL大小）
    pub payload_size: usize,
    /// 每N个包丢弃一个，0表示不丢包
    #[serde(default)]
    pub loss_every: u64,
    /// 模拟传输建立被拒绝
    #[serde(default)]
    pub refused: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_name: "simulated-camera".to_string(),
            max_samples: 300,
            engine: EngineConfig::default(),
            streams: vec![
                StreamConfig {
                    stream_id: 1,
                    medium: "video".to_string(),
                    codec_name: "H264".to_string(),
                    packet_interval_ms: 33,
                    payload_size: 1200,
                    loss_every: 0,
                    refused: false,
                },
                StreamConfig {
                    stream_id: 2,
                    medium: "audio".to_string(),
                    codec_name: "PCMA".to_string(),
                    packet_interval_ms: 20,
                    payload_size: 160,
                    loss_every: 50,
                    refused: false,
                },
            ],
        }
    }
}

impl Config {
    /// 从 `SESSION_SIMULATOR_CONFIG` 指向的TOML文件加载，未设置时使用默认配置
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::from_file(&path),
            Err(_) => Ok(Self::default()),
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).context("Invalid simulator config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate()?;

        if self.streams.is_empty() {
            bail!("At least one stream must be configured");
        }

        let mut ids = HashSet::new();
        for stream in &self.streams {
            if !ids.insert(stream.stream_id) {
                bail!("Duplicate stream id {}", stream.stream_id);
            }
            if stream.packet_interval_ms == 0 {
                bail!("Stream {}: packet_interval_ms must be greater than 0", stream.stream_id);
            }
            if stream.payload_size == 0 {
                bail!("Stream {}: payload_size must be greater than 0", stream.stream_id);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.streams.len(), 2);
        assert_eq!(config.streams[0].codec_name, "H264");
        assert_eq!(config.streams[1].codec_name, "PCMA");
    }

    #[test]
    fn test_parse_toml() {
        let config = Config::from_toml_str(
            r#"
            max_samples = 10

            [engine]
            receive_buffer_size = 2048

            [[streams]]
            stream_id = 5
            medium = "audio"
            codec_name = "MPA"
            packet_interval_ms = 26
            payload_size = 417
            "#,
        )
        .unwrap();

        assert_eq!(config.max_samples, 10);
        assert_eq!(config.session_name, "simulated-camera");
        assert_eq!(config.engine.receive_buffer_size, 2048);
        assert_eq!(config.streams.len(), 1);
        assert_eq!(config.streams[0].loss_every, 0);
        assert!(!config.streams[0].refused);
    }

    #[test]
    fn test_duplicate_stream_rejected() {
        let result = Config::from_toml_str(
            r#"
            [[streams]]
            stream_id = 1
            medium = "video"
            codec_name = "H264"
            packet_interval_ms = 33
            payload_size = 100

            [[streams]]
            stream_id = 1
            medium = "audio"
            codec_name = "PCMU"
            packet_interval_ms = 20
            payload_size = 160
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "session_name = \"lab\"").unwrap();
        file.flush().unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.session_name, "lab");
        assert_eq!(config.streams.len(), 2);
    }
}

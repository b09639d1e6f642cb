use common::{Result, StreamingError};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// 引擎配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// 每路流单次读取的接收缓冲区大小（字节）
    pub receive_buffer_size: usize,
    /// G.711/G.726 音频帧时长（毫秒）
    pub audio_frame_duration_ms: u32,
    /// H.264 参数集（SPS/PPS）是否拼接到下一个图像NAL之前
    pub h264_prepend_parameter_sets: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            receive_buffer_size: 1024 * 1024, // 1MB
            audio_frame_duration_ms: 20,
            h264_prepend_parameter_sets: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.receive_buffer_size == 0 {
            return Err(StreamingError::InvalidConfig(
                "receive_buffer_size must be greater than 0".to_string(),
            ));
        }

        if self.audio_frame_duration_ms == 0 || self.audio_frame_duration_ms > 1000 {
            return Err(StreamingError::InvalidConfig(format!(
                "audio_frame_duration_ms must be within 1..=1000, got {}",
                self.audio_frame_duration_ms
            )));
        }

        Ok(())
    }
}

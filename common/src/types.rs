use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// 流编号（会话内唯一，生命周期内稳定）
pub type StreamId = u32;

/// 样本属性
///
/// 由编解码分帧器在产出样本时填写，描述符生成时作为模板使用。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleAttributes {
    /// 是否为关键帧（H.264 IDR / MPEG-4 I-VOP）
    pub is_key_frame: bool,
    /// 解码器配置（H.264 SPS/PPS、MPEG-4 VOS/VOL）
    pub codec_config: Option<Bytes>,
    /// 音频采样率
    pub sample_rate: Option<u32>,
    /// 音频声道数
    pub channels: Option<u16>,
}

/// 媒体样本
///
/// 一个可解码单元。负载字节从接收缓冲区复制而来，回调返回后仍然有效。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaSample {
    /// 所属流编号
    pub stream_id: StreamId,
    /// 编码名称
    pub codec_name: String,
    /// 负载数据
    pub payload: Bytes,
    /// 显示时间戳
    pub presentation_time: Duration,
    /// 时长
    pub duration: Duration,
    /// 传输层交付的数据超出缓冲区容量
    pub truncated: bool,
    /// 样本属性
    pub attributes: SampleAttributes,
}

impl MediaSample {
    pub fn new(
        stream_id: StreamId,
        codec_name: impl Into<String>,
        payload: Bytes,
        presentation_time: Duration,
        duration: Duration,
    ) -> Self {
        Self {
            stream_id,
            codec_name: codec_name.into(),
            payload,
            presentation_time,
            duration,
            truncated: false,
            attributes: SampleAttributes::default(),
        }
    }

    /// 首次交付前的空样本
    pub fn empty(stream_id: StreamId, codec_name: impl Into<String>) -> Self {
        Self::new(stream_id, codec_name, Bytes::new(), Duration::ZERO, Duration::ZERO)
    }

    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    pub fn with_attributes(mut self, attributes: SampleAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }
}

/// 单路流描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDescriptor {
    pub stream_id: StreamId,
    pub codec_name: String,
    /// 代表样本（最近一次产出的样本）
    pub sample: MediaSample,
}

/// 会话媒体描述（按构造顺序排列）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    streams: Vec<StreamDescriptor>,
}

impl MediaDescriptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream_from_attributes(
        &mut self,
        stream_id: StreamId,
        codec_name: impl Into<String>,
        sample: MediaSample,
    ) {
        self.streams.push(StreamDescriptor {
            stream_id,
            codec_name: codec_name.into(),
            sample,
        });
    }

    pub fn streams(&self) -> &[StreamDescriptor] {
        &self.streams
    }

    pub fn stream(&self, stream_id: StreamId) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.stream_id == stream_id)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }
}

/// 传输层实时接收计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceptionCounters {
    /// 累计接收字节数
    pub total_bytes_received: u64,
    /// 期望接收的包数（按序列号推算）
    pub expected_packet_count: u64,
    /// 实际接收的包数
    pub received_packet_count: u64,
    /// 统计区间标记，传输层每次重置区间计数时递增
    pub reset_interval: u64,
}

/// 流统计快照
///
/// 每次查询时根据传输层计数重新计算，不做缓存。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamStatistics {
    /// 累计接收（KB）
    pub total_kbytes_received: f64,
    /// 丢包率（百分比）
    pub percent_packet_loss: f64,
    pub expected_packet_count: u64,
    pub received_packet_count: u64,
    pub reset_interval: u64,
}

impl StreamStatistics {
    pub fn from_counters(counters: &ReceptionCounters) -> Self {
        let percent_packet_loss = if counters.expected_packet_count == 0 {
            0.0
        } else {
            // 重复包会让接收数超过期望数
            let lost = counters
                .expected_packet_count
                .saturating_sub(counters.received_packet_count);
            lost as f64 * 100.0 / counters.expected_packet_count as f64
        };

        Self {
            total_kbytes_received: counters.total_bytes_received as f64 / 1000.0,
            percent_packet_loss,
            expected_packet_count: counters.expected_packet_count,
            received_packet_count: counters.received_packet_count,
            reset_interval: counters.reset_interval,
        }
    }
}

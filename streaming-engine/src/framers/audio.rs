// G.711 / G.726 定长帧重组
//
// 8kHz单声道。按帧时长把任意切分的负载重组为等长音频帧：
// - G.711（PCMA/PCMU）：每毫秒8字节，20ms为160字节
// - G.726：按编码名称后缀的码率（16/24/32/40 kbit/s）计算帧长

use super::{Chunk, FramedUnit};
use bytes::BytesMut;
use common::SampleAttributes;
use std::time::Duration;
use tracing::debug;

const SAMPLE_RATE: u32 = 8000;
const DEFAULT_G726_BITRATE_KBPS: u32 = 32;

/// 定长音频帧累积器
#[derive(Debug)]
pub struct AudioFrameAccumulator {
    frame_bytes: usize,
    bytes_per_ms: u64,
    frame_duration: Duration,
    buffer: BytesMut,
    next_presentation_time: Option<Duration>,
    truncated: bool,
}

impl AudioFrameAccumulator {
    pub fn new(bitrate_kbps: u32, frame_duration_ms: u32) -> Self {
        let frame_duration_ms = frame_duration_ms.max(1);
        let frame_bytes = ((bitrate_kbps as usize * frame_duration_ms as usize) / 8).max(1);

        Self {
            frame_bytes,
            bytes_per_ms: u64::from(bitrate_kbps / 8).max(1),
            frame_duration: Duration::from_millis(u64::from(frame_duration_ms)),
            buffer: BytesMut::with_capacity(frame_bytes * 2),
            next_presentation_time: None,
            truncated: false,
        }
    }

    /// G.711：每个采样8比特，64 kbit/s
    pub fn g711(frame_duration_ms: u32) -> Self {
        Self::new(64, frame_duration_ms)
    }

    /// G.726：码率取自编码名称的 `-NN` 后缀
    pub fn g726(codec_name: &str, frame_duration_ms: u32) -> Self {
        let bitrate = g726_bitrate_kbps(codec_name);
        debug!("G.726 framer for {} at {} kbit/s", codec_name, bitrate);
        Self::new(bitrate, frame_duration_ms)
    }

    pub fn frame_bytes(&self) -> usize {
        self.frame_bytes
    }

    pub fn frame_duration(&self) -> Duration {
        self.frame_duration
    }

    pub fn push(&mut self, chunk: &Chunk<'_>) -> Vec<FramedUnit> {
        if chunk.data.is_empty() {
            return Vec::new();
        }

        // 缓冲区为空时新帧与分片对齐，采用分片时间戳
        if self.buffer.is_empty() || self.next_presentation_time.is_none() {
            self.next_presentation_time = Some(chunk.presentation_time);
        }
        self.truncated |= chunk.truncated;
        self.buffer.extend_from_slice(chunk.data);

        let mut units = Vec::new();
        while self.buffer.len() >= self.frame_bytes {
            let payload = self.buffer.split_to(self.frame_bytes).freeze();
            let presentation_time = self.next_presentation_time.unwrap_or(chunk.presentation_time);

            units.push(FramedUnit {
                payload,
                presentation_time,
                duration: self.frame_duration,
                truncated: self.truncated,
                attributes: self.attributes(),
            });

            self.next_presentation_time = Some(presentation_time + self.frame_duration);
            // 剩余字节都来自当前分片
            self.truncated = chunk.truncated;
        }

        if self.buffer.is_empty() {
            self.next_presentation_time = None;
            self.truncated = false;
        }

        units
    }

    /// 交付不足一帧的残留数据
    pub fn flush(&mut self) -> Vec<FramedUnit> {
        if self.buffer.is_empty() {
            return Vec::new();
        }

        let payload = self.buffer.split().freeze();
        let duration = Duration::from_micros(payload.len() as u64 * 1000 / self.bytes_per_ms);
        let unit = FramedUnit {
            payload,
            presentation_time: self.next_presentation_time.unwrap_or_default(),
            duration,
            truncated: self.truncated,
            attributes: self.attributes(),
        };

        self.next_presentation_time = None;
        self.truncated = false;
        vec![unit]
    }

    fn attributes(&self) -> SampleAttributes {
        SampleAttributes {
            sample_rate: Some(SAMPLE_RATE),
            channels: Some(1),
            ..SampleAttributes::default()
        }
    }
}

/// 解析G.726码率，无法识别时使用32 kbit/s
fn g726_bitrate_kbps(codec_name: &str) -> u32 {
    codec_name
        .rsplit_once('-')
        .and_then(|(_, rate)| rate.parse::<u32>().ok())
        .filter(|rate| matches!(rate, 16 | 24 | 32 | 40))
        .unwrap_or(DEFAULT_G726_BITRATE_KBPS)
}

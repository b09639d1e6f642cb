//! H.264 分帧
//!
//! RTP接收源通常每次交付一个不带起始码的NAL单元；也接受以Annex B起始码
//! 开头的数据，此时按起始码拆分为多个NAL单元。
//!
//! NAL单元按访问单元（一帧图像）聚合后作为一个样本输出，Annex B格式
//! （`00 00 00 01` 前缀）。访问单元在以下情况结束：
//! - 时间戳变化
//! - 图像NAL之后出现AUD/SEI/SPS/PPS等起始类NAL
//! - 传输源关闭时的冲刷
//!
//! 下一个访问单元开始之前无法确认当前单元已完整，因此样本比对应分片晚一帧交付。
//! SPS/PPS 记录为解码器配置；关闭参数集前置时它们单独成样本，不进入访问单元。

use super::{find_start_code, Chunk, FramedUnit};
use bytes::{Bytes, BytesMut};
use common::SampleAttributes;
use std::time::Duration;
use tracing::debug;

/// Annex B 起始码
const NAL_START_CODE: &[u8] = &[0x00, 0x00, 0x00, 0x01];

const NAL_TYPE_IDR: u8 = 5;
const NAL_TYPE_SEI: u8 = 6;
const NAL_TYPE_SPS: u8 = 7;
const NAL_TYPE_PPS: u8 = 8;
const NAL_TYPE_AUD: u8 = 9;

/// NAL单元类型（低5位）
pub fn nal_unit_type(nal: &[u8]) -> Option<u8> {
    nal.first().map(|header| header & 0x1F)
}

/// 是否为编码片（图像数据）
fn is_vcl(nal_type: u8) -> bool {
    (1..=NAL_TYPE_IDR).contains(&nal_type)
}

/// 出现在图像NAL之后即开始新访问单元的NAL类型
fn starts_access_unit(nal_type: u8) -> bool {
    matches!(nal_type, NAL_TYPE_SEI | NAL_TYPE_SPS | NAL_TYPE_PPS | NAL_TYPE_AUD | 14..=18)
}

/// 把一次交付拆分为NAL单元
///
/// 不以起始码开头的数据视为单个NAL单元。
pub fn split_nal_units(data: &[u8]) -> Vec<&[u8]> {
    match find_start_code(data, 0) {
        Some((0, code_len)) => {
            let mut units = Vec::new();
            let mut start = code_len;

            while let Some((pos, next_len)) = find_start_code(data, start) {
                units.push(&data[start..pos]);
                start = pos + next_len;
            }
            units.push(&data[start..]);

            units.into_iter().filter(|unit| !unit.is_empty()).collect()
        }
        _ if data.is_empty() => Vec::new(),
        _ => vec![data],
    }
}

/// H.264 分帧器
#[derive(Debug)]
pub struct H264Framer {
    prepend_parameter_sets: bool,
    sps: Option<Bytes>,
    pps: Option<Bytes>,
    /// 正在聚合的访问单元（Annex B格式）
    access_unit: BytesMut,
    presentation_time: Duration,
    duration: Duration,
    truncated: bool,
    key_frame: bool,
    has_picture: bool,
}

impl H264Framer {
    pub fn new(prepend_parameter_sets: bool) -> Self {
        Self {
            prepend_parameter_sets,
            sps: None,
            pps: None,
            access_unit: BytesMut::new(),
            presentation_time: Duration::ZERO,
            duration: Duration::ZERO,
            truncated: false,
            key_frame: false,
            has_picture: false,
        }
    }

    /// 当前解码器配置（SPS + PPS，Annex B格式）
    pub fn codec_config(&self) -> Option<Bytes> {
        if self.sps.is_none() && self.pps.is_none() {
            return None;
        }

        let mut config = BytesMut::new();
        for parameter_set in [&self.sps, &self.pps].into_iter().flatten() {
            config.extend_from_slice(NAL_START_CODE);
            config.extend_from_slice(parameter_set);
        }
        Some(config.freeze())
    }

    pub fn push(&mut self, chunk: &Chunk<'_>) -> Vec<FramedUnit> {
        let mut units = Vec::new();

        if !self.access_unit.is_empty() && chunk.presentation_time != self.presentation_time {
            units.extend(self.take_access_unit());
        }

        for nal in split_nal_units(chunk.data) {
            let Some(nal_type) = nal_unit_type(nal) else {
                continue;
            };

            if self.has_picture && starts_access_unit(nal_type) {
                units.extend(self.take_access_unit());
            }

            if matches!(nal_type, NAL_TYPE_SPS | NAL_TYPE_PPS) {
                self.update_parameter_set(nal_type, nal);

                if !self.prepend_parameter_sets {
                    units.push(self.parameter_set_unit(chunk, nal));
                    continue;
                }
            }

            if self.access_unit.is_empty() {
                self.presentation_time = chunk.presentation_time;
                self.duration = chunk.duration;
            }
            self.access_unit.extend_from_slice(NAL_START_CODE);
            self.access_unit.extend_from_slice(nal);
            self.truncated |= chunk.truncated;
            self.has_picture |= is_vcl(nal_type);
            self.key_frame |= nal_type == NAL_TYPE_IDR;
        }

        units
    }

    /// 交付尚未结束的访问单元
    pub fn flush(&mut self) -> Vec<FramedUnit> {
        self.take_access_unit().into_iter().collect()
    }

    fn take_access_unit(&mut self) -> Option<FramedUnit> {
        if self.access_unit.is_empty() {
            return None;
        }

        let unit = FramedUnit {
            payload: self.access_unit.split().freeze(),
            presentation_time: self.presentation_time,
            duration: self.duration,
            truncated: self.truncated,
            attributes: SampleAttributes {
                is_key_frame: self.key_frame,
                codec_config: self.codec_config(),
                ..SampleAttributes::default()
            },
        };

        self.truncated = false;
        self.key_frame = false;
        self.has_picture = false;
        Some(unit)
    }

    fn parameter_set_unit(&self, chunk: &Chunk<'_>, nal: &[u8]) -> FramedUnit {
        let mut payload = BytesMut::with_capacity(NAL_START_CODE.len() + nal.len());
        payload.extend_from_slice(NAL_START_CODE);
        payload.extend_from_slice(nal);

        FramedUnit {
            payload: payload.freeze(),
            presentation_time: chunk.presentation_time,
            duration: Duration::ZERO,
            truncated: chunk.truncated,
            attributes: SampleAttributes {
                codec_config: self.codec_config(),
                ..SampleAttributes::default()
            },
        }
    }

    fn update_parameter_set(&mut self, nal_type: u8, nal: &[u8]) {
        let slot = if nal_type == NAL_TYPE_SPS { &mut self.sps } else { &mut self.pps };

        if slot.as_deref() != Some(nal) {
            debug!(
                "H.264 {} updated ({} bytes)",
                if nal_type == NAL_TYPE_SPS { "SPS" } else { "PPS" },
                nal.len()
            );
            *slot = Some(Bytes::copy_from_slice(nal));
        }
    }
}

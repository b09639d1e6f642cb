// MPEG-4 Part 2 视频分帧（MP4V-ES）
//
// 以起始码开头的分片开始一个新单元并交付上一个单元；其余分片视为
// 当前单元的后续片段。首个VOP/GOV之前的配置头（VOS/VO/VOL）作为
// 解码器配置保存，并拼接到随后的单元之前。

use super::{find_start_code, Chunk, FramedUnit};
use bytes::{Bytes, BytesMut};
use common::SampleAttributes;
use std::time::Duration;
use tracing::debug;

const START_CODE_PREFIX: &[u8] = &[0x00, 0x00, 0x01];

const VOS_START_CODE: u8 = 0xB0;
const USER_DATA_START_CODE: u8 = 0xB2;
const GOV_START_CODE: u8 = 0xB3;
const VISUAL_OBJECT_START_CODE: u8 = 0xB5;
const VOP_START_CODE: u8 = 0xB6;

/// 是否为配置类起始码（VOS、VO、VOL、用户数据）
fn is_config_start_code(code: u8) -> bool {
    matches!(code, 0x00..=0x2F | VOS_START_CODE | USER_DATA_START_CODE | VISUAL_OBJECT_START_CODE)
}

/// 单元内第一个VOP是否为I-VOP
fn contains_intra_vop(data: &[u8]) -> bool {
    let mut from = 0;
    while let Some((pos, len)) = find_start_code(data, from) {
        let code_pos = pos + len;
        if data.get(code_pos) == Some(&VOP_START_CODE) {
            // vop_coding_type：前两位，00 = I
            return data.get(code_pos + 1).map_or(false, |byte| byte >> 6 == 0);
        }
        from = code_pos;
    }
    false
}

/// MPEG-4 视频分帧器
#[derive(Debug, Default)]
pub struct Mpeg4Framer {
    config: Option<Bytes>,
    config_pending: bool,
    pending: BytesMut,
    pending_presentation_time: Duration,
    pending_duration: Duration,
    pending_truncated: bool,
}

impl Mpeg4Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前解码器配置
    pub fn codec_config(&self) -> Option<Bytes> {
        self.config.clone()
    }

    pub fn push(&mut self, chunk: &Chunk<'_>) -> Vec<FramedUnit> {
        if chunk.data.is_empty() {
            return Vec::new();
        }

        if !chunk.data.starts_with(START_CODE_PREFIX) {
            // 后续片段；起始片段丢失时也照常累积
            if self.pending.is_empty() {
                self.start_unit(chunk, &[]);
            }
            self.pending.extend_from_slice(chunk.data);
            self.pending_truncated |= chunk.truncated;
            return Vec::new();
        }

        let mut units: Vec<FramedUnit> = self.take_pending().into_iter().collect();
        let mut body = chunk.data;

        if chunk.data.get(3).copied().map_or(false, is_config_start_code) {
            let payload_start = self.find_payload_start(chunk.data);
            let (config, rest) = chunk.data.split_at(payload_start);
            self.store_config(config);
            body = rest;
        }

        if body.is_empty() {
            // 仅含配置，等待随后的VOP
            return units;
        }

        let config = if self.config_pending {
            self.config_pending = false;
            self.config.clone()
        } else {
            None
        };
        self.start_unit(chunk, config.as_deref().unwrap_or(&[]));
        self.pending.extend_from_slice(body);
        self.pending_truncated |= chunk.truncated;

        units
    }

    /// 交付尚未结束的单元
    pub fn flush(&mut self) -> Vec<FramedUnit> {
        self.take_pending().into_iter().collect()
    }

    /// 配置头之后第一个VOP或GOV的位置
    fn find_payload_start(&self, data: &[u8]) -> usize {
        let mut from = 0;
        while let Some((pos, len)) = find_start_code(data, from) {
            if matches!(data.get(pos + len), Some(&VOP_START_CODE) | Some(&GOV_START_CODE)) {
                return pos;
            }
            from = pos + len;
        }
        data.len()
    }

    fn store_config(&mut self, config: &[u8]) {
        if self.config.as_deref() != Some(config) {
            debug!("MPEG-4 decoder configuration updated ({} bytes)", config.len());
            self.config = Some(Bytes::copy_from_slice(config));
        }
        self.config_pending = true;
    }

    fn start_unit(&mut self, chunk: &Chunk<'_>, prefix: &[u8]) {
        self.pending.clear();
        self.pending.extend_from_slice(prefix);
        self.pending_presentation_time = chunk.presentation_time;
        self.pending_duration = chunk.duration;
        self.pending_truncated = false;
    }

    fn take_pending(&mut self) -> Option<FramedUnit> {
        if self.pending.is_empty() {
            return None;
        }

        let payload = self.pending.split().freeze();
        let is_key_frame = contains_intra_vop(&payload);
        let unit = FramedUnit {
            payload,
            presentation_time: self.pending_presentation_time,
            duration: self.pending_duration,
            truncated: self.pending_truncated,
            attributes: SampleAttributes {
                is_key_frame,
                codec_config: self.config.clone(),
                ..SampleAttributes::default()
            },
        };
        self.pending_truncated = false;
        Some(unit)
    }
}

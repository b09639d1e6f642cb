// MPEG音频分帧（MPEG-1/2/2.5，Layer I/II/III）
//
// 按帧头同步字（0xFFE）和帧头字段计算帧长，从任意切分的负载中
// 重建完整音频帧。同步字之前的垃圾字节和无效帧头会被跳过。

use super::{Chunk, FramedUnit};
use bytes::{Buf, BytesMut};
use common::SampleAttributes;
use std::time::Duration;
use tracing::{debug, warn};

const HEADER_LEN: usize = 4;

/// Layer I/II/III 比特率表（kbit/s），按 [版本组][层][索引]
const BITRATES_V1: [[u32; 15]; 3] = [
    [0, 32, 64, 96, 128, 160, 192, 224, 256, 288, 320, 352, 384, 416, 448],
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320, 384],
    [0, 32, 40, 48, 56, 64, 80, 96, 112, 128, 160, 192, 224, 256, 320],
];
const BITRATES_V2: [[u32; 15]; 3] = [
    [0, 32, 48, 56, 64, 80, 96, 112, 128, 144, 160, 176, 192, 224, 256],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
    [0, 8, 16, 24, 32, 40, 48, 56, 64, 80, 96, 112, 128, 144, 160],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MpegVersion {
    Mpeg1,
    Mpeg2,
    Mpeg25,
}

/// 解析后的帧头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MpaHeader {
    pub frame_length: usize,
    pub sample_rate: u32,
    pub samples_per_frame: u32,
    pub channels: u16,
}

impl MpaHeader {
    /// 解析4字节帧头，无效时返回 `None`
    pub fn parse(header: &[u8]) -> Option<Self> {
        if header.len() < HEADER_LEN || header[0] != 0xFF || header[1] & 0xE0 != 0xE0 {
            return None;
        }

        let version = match (header[1] >> 3) & 0x03 {
            0 => MpegVersion::Mpeg25,
            2 => MpegVersion::Mpeg2,
            3 => MpegVersion::Mpeg1,
            _ => return None,
        };
        // 0 = 保留，1 = Layer III，2 = Layer II，3 = Layer I
        let layer = match (header[1] >> 1) & 0x03 {
            1 => 3u8,
            2 => 2,
            3 => 1,
            _ => return None,
        };

        let bitrate_index = (header[2] >> 4) as usize;
        let sample_rate_index = ((header[2] >> 2) & 0x03) as usize;
        let padding = ((header[2] >> 1) & 0x01) as usize;
        // 自由格式（0）与无效值（15）都不支持
        if bitrate_index == 0 || bitrate_index == 15 || sample_rate_index == 3 {
            return None;
        }

        let table = if version == MpegVersion::Mpeg1 { &BITRATES_V1 } else { &BITRATES_V2 };
        let bitrate = table[usize::from(layer - 1)][bitrate_index] as usize * 1000;

        let base_rate = [44_100u32, 48_000, 32_000][sample_rate_index];
        let sample_rate = match version {
            MpegVersion::Mpeg1 => base_rate,
            MpegVersion::Mpeg2 => base_rate / 2,
            MpegVersion::Mpeg25 => base_rate / 4,
        };

        let (frame_length, samples_per_frame) = match layer {
            1 => ((12 * bitrate / sample_rate as usize + padding) * 4, 384),
            2 => (144 * bitrate / sample_rate as usize + padding, 1152),
            _ if version == MpegVersion::Mpeg1 => (144 * bitrate / sample_rate as usize + padding, 1152),
            _ => (72 * bitrate / sample_rate as usize + padding, 576),
        };

        let channels = if header[3] >> 6 == 0x03 { 1 } else { 2 };

        Some(Self {
            frame_length,
            sample_rate,
            samples_per_frame,
            channels,
        })
    }

    pub fn duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.samples_per_frame) * 1_000_000 / u64::from(self.sample_rate))
    }
}

/// MPEG音频分帧器
#[derive(Debug, Default)]
pub struct MpaFramer {
    buffer: BytesMut,
    next_presentation_time: Option<Duration>,
    truncated: bool,
}

impl MpaFramer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &Chunk<'_>) -> Vec<FramedUnit> {
        if chunk.data.is_empty() {
            return Vec::new();
        }

        if self.buffer.is_empty() || self.next_presentation_time.is_none() {
            self.next_presentation_time = Some(chunk.presentation_time);
        }
        self.truncated |= chunk.truncated;
        self.buffer.extend_from_slice(chunk.data);

        let mut units = Vec::new();
        loop {
            match find_sync(&self.buffer) {
                Some(0) => {}
                Some(skip) => {
                    debug!("MPEG audio resync, skipping {} bytes", skip);
                    self.buffer.advance(skip);
                }
                None => {
                    // 末尾的0xFF可能是下一个同步字的前半部分
                    let keep = usize::from(self.buffer.last() == Some(&0xFF));
                    let skip = self.buffer.len() - keep;
                    if skip > 0 {
                        debug!("MPEG audio: no sync word, dropping {} bytes", skip);
                        self.buffer.advance(skip);
                    }
                    break;
                }
            }

            if self.buffer.len() < HEADER_LEN {
                break;
            }

            let Some(header) = MpaHeader::parse(&self.buffer[..HEADER_LEN]) else {
                warn!("Invalid MPEG audio frame header, skipping sync byte");
                self.buffer.advance(1);
                continue;
            };

            if self.buffer.len() < header.frame_length {
                break;
            }

            let payload = self.buffer.split_to(header.frame_length).freeze();
            let presentation_time = self.next_presentation_time.unwrap_or(chunk.presentation_time);
            let duration = header.duration();

            units.push(FramedUnit {
                payload,
                presentation_time,
                duration,
                truncated: self.truncated,
                attributes: SampleAttributes {
                    sample_rate: Some(header.sample_rate),
                    channels: Some(header.channels),
                    ..SampleAttributes::default()
                },
            });

            self.next_presentation_time = Some(presentation_time + duration);
            self.truncated = chunk.truncated;
        }

        if self.buffer.is_empty() {
            self.next_presentation_time = None;
            self.truncated = false;
        }

        units
    }

    /// 不完整的帧无法解码，直接丢弃
    pub fn flush(&mut self) -> Vec<FramedUnit> {
        if !self.buffer.is_empty() {
            debug!("Discarding {} bytes of incomplete MPEG audio frame", self.buffer.len());
            self.buffer.clear();
        }
        self.next_presentation_time = None;
        self.truncated = false;
        Vec::new()
    }
}

fn find_sync(data: &[u8]) -> Option<usize> {
    data.windows(2)
        .position(|pair| pair[0] == 0xFF && pair[1] & 0xE0 == 0xE0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// MPEG-1 Layer III，128 kbit/s，44.1 kHz，无填充，立体声：417字节
    const MP3_HEADER: [u8; 4] = [0xFF, 0xFB, 0x90, 0x00];
    /// MPEG-1 Layer II，192 kbit/s，48 kHz，单声道：576字节
    const MP2_HEADER: [u8; 4] = [0xFF, 0xFD, 0xA4, 0xC0];

    fn frame(header: [u8; 4], fill: u8) -> Vec<u8> {
        let length = MpaHeader::parse(&header).unwrap().frame_length;
        let mut data = header.to_vec();
        data.resize(length, fill);
        data
    }

    fn chunk(data: &[u8], millis: u64) -> Chunk<'_> {
        Chunk {
            data,
            presentation_time: Duration::from_millis(millis),
            duration: Duration::ZERO,
            truncated: false,
        }
    }

    #[test]
    fn test_parse_mp3_header() {
        let header = MpaHeader::parse(&MP3_HEADER).unwrap();
        assert_eq!(header.frame_length, 417);
        assert_eq!(header.sample_rate, 44_100);
        assert_eq!(header.samples_per_frame, 1152);
        assert_eq!(header.channels, 2);
        assert_eq!(header.duration(), Duration::from_micros(26_122));
    }

    #[test]
    fn test_parse_mp2_header() {
        let header = MpaHeader::parse(&MP2_HEADER).unwrap();
        assert_eq!(header.frame_length, 576);
        assert_eq!(header.sample_rate, 48_000);
        assert_eq!(header.channels, 1);
        assert_eq!(header.duration(), Duration::from_millis(24));
    }

    #[test]
    fn test_parse_rejects_invalid_headers() {
        assert!(MpaHeader::parse(&[0xFF, 0xFB, 0x00, 0x00]).is_none()); // 自由格式
        assert!(MpaHeader::parse(&[0xFF, 0xFB, 0xF0, 0x00]).is_none()); // 比特率15
        assert!(MpaHeader::parse(&[0xFF, 0xFB, 0x9C, 0x00]).is_none()); // 采样率保留
        assert!(MpaHeader::parse(&[0xFF, 0xF9, 0x90, 0x00]).is_none()); // 层保留
        assert!(MpaHeader::parse(&[0xFF, 0xEB, 0x90, 0x00]).is_none()); // 版本保留
        assert!(MpaHeader::parse(&[0x00, 0xFB, 0x90, 0x00]).is_none());
        assert!(MpaHeader::parse(&[0xFF, 0xFB]).is_none());
    }

    #[test]
    fn test_frames_split_across_chunks() {
        let mut framer = MpaFramer::new();
        let mut data = frame(MP3_HEADER, 0x11);
        data.extend(frame(MP3_HEADER, 0x22));

        let mut units = framer.push(&chunk(&data[..300], 0));
        assert!(units.is_empty());
        units.extend(framer.push(&chunk(&data[300..], 10)));

        assert_eq!(units.len(), 2);
        assert_eq!(units[0].payload.len(), 417);
        assert_eq!(units[0].payload[4], 0x11);
        assert_eq!(units[1].payload[4], 0x22);
        assert_eq!(units[0].presentation_time, Duration::ZERO);
        assert_eq!(units[1].presentation_time, Duration::from_micros(26_122));
    }

    #[test]
    fn test_garbage_before_sync_skipped() {
        let mut framer = MpaFramer::new();
        let mut data = vec![0x00, 0x12, 0x34];
        data.extend(frame(MP2_HEADER, 0x00));

        let units = framer.push(&chunk(&data, 0));
        assert_eq!(units.len(), 1);
        assert_eq!(&units[0].payload[..4], &MP2_HEADER);
        assert_eq!(units[0].attributes.sample_rate, Some(48_000));
    }

    #[test]
    fn test_flush_discards_partial_frame() {
        let mut framer = MpaFramer::new();
        let data = frame(MP3_HEADER, 0x00);
        assert!(framer.push(&chunk(&data[..100], 0)).is_empty());
        assert!(framer.flush().is_empty());

        // 丢弃后重新同步
        let units = framer.push(&chunk(&data, 50));
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].presentation_time, Duration::from_millis(50));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn test_boundaries_independent_of_chunking(
            frame_count in 1usize..6,
            cuts in prop::collection::vec(1usize..700, 1..10)
        ) {
            let mut data = Vec::new();
            for i in 0..frame_count {
                // 填充字节避开0xFF，防止误同步
                data.extend(frame(MP3_HEADER, i as u8));
            }

            let mut framer = MpaFramer::new();
            let mut units = Vec::new();
            let mut offset = 0usize;
            for cut in cuts.iter().cycle() {
                if offset >= data.len() {
                    break;
                }
                let end = (offset + cut).min(data.len());
                units.extend(framer.push(&chunk(&data[offset..end], 0)));
                offset = end;
            }

            prop_assert_eq!(units.len(), frame_count);
            for (i, unit) in units.iter().enumerate() {
                prop_assert_eq!(unit.payload.len(), 417);
                prop_assert_eq!(unit.payload[4], i as u8);
            }
            for pair in units.windows(2) {
                prop_assert!(pair[0].presentation_time <= pair[1].presentation_time);
            }
        }
    }
}

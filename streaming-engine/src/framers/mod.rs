// 流媒体会话引擎 - 编解码分帧器
//
// 把传输层交付的原始负载分片重建为符合编解码规范的样本边界。
// 编解码集合固定且有限，按编码名称选择分帧变体：
//
// | 编码名称 | 分帧变体 |
// |---|---|
// | "H264" | H.264 |
// | "PCMA" / "PCMU" | G.711 |
// | 前缀 "G72" / "g72" | G.726 |
// | "MPA" / "mpa" | MPEG音频 |
// | "MP4V-ES" / "mp4-es" | MPEG-4视频 |
// | 其他 | 直通（每个分片一个样本） |

pub mod audio;
pub mod h264;
pub mod mpa;
pub mod mpeg4;

pub use audio::AudioFrameAccumulator;
pub use h264::H264Framer;
pub use mpa::MpaFramer;
pub use mpeg4::Mpeg4Framer;

use crate::config::EngineConfig;
use crate::streaming::live_source::{LiveFramedSource, ReadIssue};
use crate::streaming::source::{FrameDelivery, StreamHandle, TransportSource};
use crate::streaming::{SampleCallback, StreamClosedCallback};
use bytes::{Bytes, BytesMut};
use common::{MediaSample, SampleAttributes, StreamId, StreamStatistics};
use std::sync::Weak;
use std::time::Duration;
use tracing::trace;

/// 编解码族
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecFamily {
    H264,
    G711,
    G726,
    MpegAudio,
    Mpeg4Video,
    Passthrough,
}

impl CodecFamily {
    /// 按编码名称分派
    ///
    /// 大小写只匹配表中列出的形式，其余名称一律直通。
    pub fn from_codec_name(codec_name: &str) -> Self {
        match codec_name {
            "H264" => CodecFamily::H264,
            "PCMA" | "PCMU" => CodecFamily::G711,
            name if name.starts_with("G72") || name.starts_with("g72") => CodecFamily::G726,
            "MPA" | "mpa" => CodecFamily::MpegAudio,
            "MP4V-ES" | "mp4-es" => CodecFamily::Mpeg4Video,
            _ => CodecFamily::Passthrough,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CodecFamily::H264 => "h264",
            CodecFamily::G711 => "g711",
            CodecFamily::G726 => "g726",
            CodecFamily::MpegAudio => "mpeg-audio",
            CodecFamily::Mpeg4Video => "mpeg4-video",
            CodecFamily::Passthrough => "passthrough",
        }
    }
}

/// 一次交付的原始分片
#[derive(Debug, Clone, Copy)]
pub struct Chunk<'a> {
    pub data: &'a [u8],
    pub presentation_time: Duration,
    pub duration: Duration,
    pub truncated: bool,
}

/// 分帧产出的单元，尚未绑定流编号
#[derive(Debug, Clone, PartialEq)]
pub struct FramedUnit {
    pub payload: Bytes,
    pub presentation_time: Duration,
    pub duration: Duration,
    pub truncated: bool,
    pub attributes: SampleAttributes,
}

/// 各编解码分帧状态
enum FramerState {
    Passthrough,
    H264(H264Framer),
    Audio(AudioFrameAccumulator),
    MpegAudio(MpaFramer),
    Mpeg4Video(Mpeg4Framer),
}

impl FramerState {
    fn for_family(family: CodecFamily, codec_name: &str, config: &EngineConfig) -> Self {
        match family {
            CodecFamily::H264 => FramerState::H264(H264Framer::new(config.h264_prepend_parameter_sets)),
            CodecFamily::G711 => FramerState::Audio(AudioFrameAccumulator::g711(config.audio_frame_duration_ms)),
            CodecFamily::G726 => FramerState::Audio(AudioFrameAccumulator::g726(
                codec_name,
                config.audio_frame_duration_ms,
            )),
            CodecFamily::MpegAudio => FramerState::MpegAudio(MpaFramer::new()),
            CodecFamily::Mpeg4Video => FramerState::Mpeg4Video(Mpeg4Framer::new()),
            CodecFamily::Passthrough => FramerState::Passthrough,
        }
    }

    fn push(&mut self, chunk: &Chunk<'_>) -> Vec<FramedUnit> {
        match self {
            // 每个分片原样成为一个样本，负载在此复制出接收缓冲区
            FramerState::Passthrough => vec![FramedUnit {
                payload: Bytes::copy_from_slice(chunk.data),
                presentation_time: chunk.presentation_time,
                duration: chunk.duration,
                truncated: chunk.truncated,
                attributes: SampleAttributes::default(),
            }],
            FramerState::H264(framer) => framer.push(chunk),
            FramerState::Audio(framer) => framer.push(chunk),
            FramerState::MpegAudio(framer) => framer.push(chunk),
            FramerState::Mpeg4Video(framer) => framer.push(chunk),
        }
    }

    fn flush(&mut self) -> Vec<FramedUnit> {
        match self {
            FramerState::Passthrough => Vec::new(),
            FramerState::H264(framer) => framer.flush(),
            FramerState::Audio(framer) => framer.flush(),
            FramerState::MpegAudio(framer) => framer.flush(),
            FramerState::Mpeg4Video(framer) => framer.flush(),
        }
    }
}

/// 媒体分帧器
///
/// 每路活动流恰好一个，编解码族在构造时确定且不再改变。
/// 持有该流的帧源适配器，完成的样本经适配器转发给输出回调。
pub struct MediaFramer {
    family: CodecFamily,
    codec_name: String,
    source: LiveFramedSource,
    state: FramerState,
    working_sample: MediaSample,
    last_presentation_time: Option<Duration>,
}

impl MediaFramer {
    pub fn new(
        stream_id: StreamId,
        codec_name: &str,
        handle: StreamHandle,
        source: Weak<dyn TransportSource>,
        config: &EngineConfig,
    ) -> Self {
        let family = CodecFamily::from_codec_name(codec_name);

        Self {
            family,
            codec_name: codec_name.to_string(),
            source: LiveFramedSource::new(stream_id, handle, source),
            state: FramerState::for_family(family, codec_name, config),
            working_sample: MediaSample::empty(stream_id, codec_name),
            last_presentation_time: None,
        }
    }

    pub fn on_sample_set(&mut self, callback: Option<SampleCallback>) {
        self.source.on_sample_set(callback);
    }

    pub fn on_stream_closed_set(&mut self, callback: Option<StreamClosedCallback>) {
        self.source.on_closed_set(callback);
    }

    pub fn family(&self) -> CodecFamily {
        self.family
    }

    pub fn stream_number(&self) -> StreamId {
        self.source.stream_id()
    }

    pub fn codec_name(&self) -> &str {
        &self.codec_name
    }

    pub fn handle(&self) -> StreamHandle {
        self.source.handle()
    }

    /// 最近一次产出的样本，首次交付前为空样本
    pub fn working_sample(&self) -> &MediaSample {
        &self.working_sample
    }

    /// 实时接收统计，传输源已释放时返回 `None`
    pub fn qos_stats(&self) -> Option<StreamStatistics> {
        self.source
            .reception_counters()
            .map(|counters| StreamStatistics::from_counters(&counters))
    }

    pub fn is_available(&self) -> bool {
        self.source.is_available()
    }

    /// 传输源是否已报告永久关闭
    pub fn is_closed(&self) -> bool {
        self.source.is_closed()
    }

    pub fn is_awaiting_data(&self) -> bool {
        self.source.is_awaiting_data()
    }

    pub fn begin_reading(&mut self, buffer: BytesMut) -> ReadIssue {
        self.source.do_get_next_frame(buffer)
    }

    /// 处理一次读取完成
    ///
    /// 负载在各分帧变体内部复制，返回后接收缓冲区即可复用。
    pub fn on_frame_delivered(&mut self, delivery: &FrameDelivery) {
        self.source.frame_completed();

        let chunk = Chunk {
            data: delivery.payload(),
            presentation_time: delivery.presentation_time,
            duration: delivery.duration(),
            truncated: delivery.is_truncated(),
        };
        trace!(
            "Stream {} delivered {} bytes ({} truncated)",
            self.stream_number(),
            delivery.bytes_delivered,
            delivery.bytes_truncated
        );

        let units = self.state.push(&chunk);
        self.emit(units);
    }

    /// 传输源永久关闭：先交付残留的部分样本，再调用关闭委托
    pub fn on_source_closed(&mut self) -> bool {
        if self.source.is_closed() {
            return false;
        }

        let units = self.state.flush();
        self.emit(units);
        self.source.handle_closure()
    }

    pub fn stop(&mut self) {
        self.source.stop_getting_frames();
    }

    fn emit(&mut self, units: Vec<FramedUnit>) {
        for unit in units {
            // 时间戳单调不减
            let presentation_time = match self.last_presentation_time {
                Some(last) if unit.presentation_time < last => last,
                _ => unit.presentation_time,
            };
            self.last_presentation_time = Some(presentation_time);

            let sample = MediaSample::new(
                self.stream_number(),
                self.codec_name.clone(),
                unit.payload,
                presentation_time,
                unit.duration,
            )
            .with_truncated(unit.truncated)
            .with_attributes(unit.attributes);

            self.working_sample = sample.clone();
            self.source.deliver_sample(sample);
        }
    }
}

/// 在 `data[from..]` 中查找Annex B起始码，返回（位置，起始码长度）
pub(crate) fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    if data.len() < 3 {
        return None;
    }

    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }

    None
}

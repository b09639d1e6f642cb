// 模拟传输源
//
// 按配置的包间隔定时完成读取，生成对应编解码族的合成负载，
// 并维护与RTP接收源相同含义的接收计数（可按固定间隔模拟丢包）。

use crate::config::StreamConfig;
use bytes::{BufMut, Bytes, BytesMut};
use common::ReceptionCounters;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use streaming_engine::{
    CodecFamily, ReadRequest, StreamHandle, TransportEvent, TransportEventSender, TransportSource,
};
use tracing::{debug, trace};

const H264_SPS: &[u8] = &[0x67, 0x42, 0xC0, 0x1E, 0xDA, 0x01, 0x40, 0x16, 0xE8, 0x06, 0xD0, 0xA1];
const H264_PPS: &[u8] = &[0x68, 0xCE, 0x3C, 0x80];
/// MPEG-1 Layer III，128kbps，44.1kHz
const MPA_HEADER: &[u8] = &[0xFF, 0xFB, 0x90, 0x00];
const MPA_FRAME_SIZE: usize = 417;

/// 一次交付的合成负载
#[derive(Debug, Clone)]
pub struct GeneratedPacket {
    pub payload: Bytes,
    pub presentation_time: Duration,
    /// 是否开始新的一帧（同一帧的后续包立即交付）
    pub new_frame: bool,
}

/// 合成负载生成器
#[derive(Debug)]
pub enum PayloadGenerator {
    /// 每个包一个NAL单元（不带起始码），每个GOP以SPS/PPS/IDR开头
    H264 {
        nal_size: usize,
        gop: u64,
        next_frame: u64,
        queued: VecDeque<Bytes>,
        current_time: Duration,
    },
    /// 每个包一个完整的MPEG音频帧
    MpegAudio { next_packet: u64 },
    /// 每个包一个VOP，首个包携带VOS/VOL配置
    Mpeg4Video { vop_size: usize, next_packet: u64 },
    /// 定长填充负载
    Constant { fill: u8, size: usize, next_packet: u64 },
}

impl PayloadGenerator {
    pub fn for_stream(config: &StreamConfig) -> Self {
        match CodecFamily::from_codec_name(&config.codec_name) {
            CodecFamily::H264 => PayloadGenerator::H264 {
                nal_size: config.payload_size.max(2),
                gop: 30,
                next_frame: 0,
                queued: VecDeque::new(),
                current_time: Duration::ZERO,
            },
            CodecFamily::MpegAudio => PayloadGenerator::MpegAudio { next_packet: 0 },
            CodecFamily::Mpeg4Video => PayloadGenerator::Mpeg4Video {
                vop_size: config.payload_size.max(5),
                next_packet: 0,
            },
            CodecFamily::G711 if config.codec_name == "PCMU" => PayloadGenerator::Constant {
                fill: 0xFF,
                size: config.payload_size,
                next_packet: 0,
            },
            CodecFamily::G711 => PayloadGenerator::Constant {
                fill: 0xD5,
                size: config.payload_size,
                next_packet: 0,
            },
            CodecFamily::G726 | CodecFamily::Passthrough => PayloadGenerator::Constant {
                fill: 0x55,
                size: config.payload_size,
                next_packet: 0,
            },
        }
    }

    pub fn next_packet(&mut self, interval: Duration) -> GeneratedPacket {
        match self {
            PayloadGenerator::H264 {
                nal_size,
                gop,
                next_frame,
                queued,
                current_time,
            } => {
                if let Some(payload) = queued.pop_front() {
                    return GeneratedPacket {
                        payload,
                        presentation_time: *current_time,
                        new_frame: false,
                    };
                }

                let frame = *next_frame;
                *next_frame += 1;
                *current_time = interval * frame as u32;

                let payload = if frame % *gop == 0 {
                    queued.push_back(Bytes::from_static(H264_PPS));
                    queued.push_back(filled_nal(0x65, *nal_size));
                    Bytes::from_static(H264_SPS)
                } else {
                    filled_nal(0x41, *nal_size)
                };

                GeneratedPacket {
                    payload,
                    presentation_time: *current_time,
                    new_frame: true,
                }
            }
            PayloadGenerator::MpegAudio { next_packet } => {
                let mut frame = BytesMut::with_capacity(MPA_FRAME_SIZE);
                frame.put_slice(MPA_HEADER);
                frame.put_bytes(0x00, MPA_FRAME_SIZE - MPA_HEADER.len());
                next_constant(next_packet, frame.freeze(), interval)
            }
            PayloadGenerator::Mpeg4Video { vop_size, next_packet } => {
                let mut vop = BytesMut::with_capacity(*vop_size + 32);
                if *next_packet == 0 {
                    // VOS + VO + VOL
                    vop.put_slice(&[0x00, 0x00, 0x01, 0xB0, 0x01]);
                    vop.put_slice(&[0x00, 0x00, 0x01, 0xB5, 0x09]);
                    vop.put_slice(&[0x00, 0x00, 0x01, 0x20, 0x00, 0x84]);
                }
                // 每30个VOP一个I-VOP
                let coding_type = if *next_packet % 30 == 0 { 0x10 } else { 0x50 };
                vop.put_slice(&[0x00, 0x00, 0x01, 0xB6, coding_type]);
                vop.put_bytes(0x33, *vop_size - 5);
                next_constant(next_packet, vop.freeze(), interval)
            }
            PayloadGenerator::Constant {
                fill,
                size,
                next_packet,
            } => {
                let payload = Bytes::from(vec![*fill; *size]);
                next_constant(next_packet, payload, interval)
            }
        }
    }
}

fn filled_nal(header: u8, size: usize) -> Bytes {
    let mut nal = BytesMut::with_capacity(size);
    nal.put_u8(header);
    nal.put_bytes(0x9A, size - 1);
    nal.freeze()
}

fn next_constant(next_packet: &mut u64, payload: Bytes, interval: Duration) -> GeneratedPacket {
    let packet = *next_packet;
    *next_packet += 1;

    GeneratedPacket {
        payload,
        presentation_time: interval * packet as u32,
        new_frame: true,
    }
}

/// 模拟传输源
pub struct SimulatedSource {
    config: StreamConfig,
    events: TransportEventSender,
    generator: Mutex<PayloadGenerator>,
    awaiting: Arc<AtomicBool>,
    stopped: AtomicBool,
    counters: Mutex<ReceptionCounters>,
    handle: Mutex<Option<StreamHandle>>,
}

impl SimulatedSource {
    pub fn new(config: StreamConfig, events: TransportEventSender) -> Arc<Self> {
        let generator = PayloadGenerator::for_stream(&config);

        Arc::new(Self {
            config,
            events,
            generator: Mutex::new(generator),
            awaiting: Arc::new(AtomicBool::new(false)),
            stopped: AtomicBool::new(false),
            counters: Mutex::new(ReceptionCounters::default()),
            handle: Mutex::new(None),
        })
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// 发送会话级终止通知（RTCP BYE）
    pub fn send_goodbye(&self) -> bool {
        self.send_for_handle(TransportEvent::Goodbye)
    }

    /// 报告传输源永久关闭
    pub fn close(&self) -> bool {
        self.stopped.store(true, Ordering::SeqCst);
        self.send_for_handle(TransportEvent::SourceClosed)
    }

    fn send_for_handle(&self, event: fn(StreamHandle) -> TransportEvent) -> bool {
        let handle = *lock(&self.handle);
        match handle {
            Some(handle) => self.events.send(event(handle)).is_ok(),
            None => false,
        }
    }

    fn interval(&self) -> Duration {
        Duration::from_millis(self.config.packet_interval_ms)
    }

    /// 生成下一个未丢失的包并更新接收计数
    fn next_received_packet(&self) -> GeneratedPacket {
        let mut generator = lock(&self.generator);
        let mut counters = lock(&self.counters);

        loop {
            let packet = generator.next_packet(self.interval());
            counters.expected_packet_count += 1;

            let lost = self.config.loss_every > 0
                && counters.expected_packet_count % self.config.loss_every == 0;
            if lost {
                trace!(
                    "Stream {} dropped packet #{}",
                    self.config.stream_id,
                    counters.expected_packet_count
                );
                continue;
            }

            counters.received_packet_count += 1;
            counters.total_bytes_received += packet.payload.len() as u64;
            return packet;
        }
    }
}

impl TransportSource for SimulatedSource {
    fn get_next_frame(&self, request: ReadRequest) {
        if self.is_stopped() {
            return;
        }

        *lock(&self.handle) = Some(request.handle);
        self.awaiting.store(true, Ordering::SeqCst);

        let packet = self.next_received_packet();
        let delay = if packet.new_frame { self.interval() } else { Duration::ZERO };
        let duration_us = self.interval().as_micros() as u32;
        let events = self.events.clone();
        let awaiting = self.awaiting.clone();
        let stream_id = self.config.stream_id;

        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let delivery = request.complete(&packet.payload, packet.presentation_time, duration_us);
            awaiting.store(false, Ordering::SeqCst);

            if events.send(TransportEvent::FrameDelivered(delivery)).is_err() {
                debug!("Engine gone, dropping delivery for stream {}", stream_id);
            }
        });
    }

    fn is_currently_awaiting_data(&self) -> bool {
        self.awaiting.load(Ordering::SeqCst)
    }

    fn reception_counters(&self) -> ReceptionCounters {
        *lock(&self.counters)
    }

    fn stop_getting_frames(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// 锁中毒时沿用内部数据，计数器不存在跨字段不变量
fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use streaming_engine::transport_event_channel;

    fn stream(codec: &str, loss_every: u64) -> StreamConfig {
        StreamConfig {
            stream_id: 1,
            medium: "video".to_string(),
            codec_name: codec.to_string(),
            packet_interval_ms: 10,
            payload_size: 64,
            loss_every,
            refused: false,
        }
    }

    #[test]
    fn test_h264_gop_starts_with_parameter_sets() {
        let mut generator = PayloadGenerator::for_stream(&stream("H264", 0));
        let interval = Duration::from_millis(33);

        let sps = generator.next_packet(interval);
        let pps = generator.next_packet(interval);
        let idr = generator.next_packet(interval);
        let slice = generator.next_packet(interval);

        assert_eq!(sps.payload[0] & 0x1F, 7);
        assert_eq!(pps.payload[0] & 0x1F, 8);
        assert_eq!(idr.payload[0] & 0x1F, 5);
        assert_eq!(slice.payload[0] & 0x1F, 1);
        assert!(sps.new_frame && !pps.new_frame && !idr.new_frame && slice.new_frame);
        assert_eq!(idr.presentation_time, Duration::ZERO);
        assert_eq!(slice.presentation_time, interval);
    }

    #[test]
    fn test_pcma_packets() {
        let mut generator = PayloadGenerator::for_stream(&stream("PCMA", 0));
        let first = generator.next_packet(Duration::from_millis(20));
        let second = generator.next_packet(Duration::from_millis(20));

        assert_eq!(first.payload.len(), 64);
        assert!(first.payload.iter().all(|byte| *byte == 0xD5));
        assert_eq!(second.presentation_time, Duration::from_millis(20));
    }

    #[test]
    fn test_mpa_frames_are_complete() {
        let mut generator = PayloadGenerator::for_stream(&stream("MPA", 0));
        let packet = generator.next_packet(Duration::from_millis(26));

        assert_eq!(packet.payload.len(), MPA_FRAME_SIZE);
        assert_eq!(&packet.payload[..4], MPA_HEADER);
    }

    #[test]
    fn test_loss_counters() {
        let (tx, _rx) = transport_event_channel();
        let source = SimulatedSource::new(stream("raw", 4), tx);

        for _ in 0..6 {
            source.next_received_packet();
        }

        let counters = source.reception_counters();
        assert_eq!(counters.received_packet_count, 6);
        assert_eq!(counters.expected_packet_count, 7);
        assert_eq!(counters.total_bytes_received, 6 * 64);
    }

    #[test]
    fn test_goodbye_requires_handle() {
        let (tx, _rx) = transport_event_channel();
        let source = SimulatedSource::new(stream("raw", 0), tx);
        assert!(!source.send_goodbye());
    }
}

// 测试用传输源

use super::source::{
    FrameDelivery, ReadRequest, TransportEvent, TransportEventSender, TransportSource,
};
use common::ReceptionCounters;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// 手动驱动的传输源
///
/// 发出的读取暂存在队列里，由测试决定何时、以何种数据完成。
#[derive(Default)]
pub(crate) struct MockSource {
    pending: Mutex<Vec<ReadRequest>>,
    issued: AtomicUsize,
    stopped: AtomicBool,
    counters: Mutex<ReceptionCounters>,
}

impl MockSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn issued_count(&self) -> usize {
        self.issued.load(Ordering::SeqCst)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn take_pending(&self) -> Vec<ReadRequest> {
        std::mem::take(&mut *self.pending.lock().unwrap())
    }

    pub fn take_request(&self) -> Option<ReadRequest> {
        let mut pending = self.pending.lock().unwrap();
        if pending.is_empty() {
            None
        } else {
            Some(pending.remove(0))
        }
    }

    /// 以给定数据完成最早的一个读取
    pub fn complete(&self, data: &[u8], presentation_time: Duration, duration_us: u32) -> FrameDelivery {
        self.take_request()
            .expect("no outstanding read")
            .complete(data, presentation_time, duration_us)
    }

    pub fn set_counters(&self, counters: ReceptionCounters) {
        *self.counters.lock().unwrap() = counters;
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl TransportSource for MockSource {
    fn get_next_frame(&self, request: ReadRequest) {
        self.issued.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().unwrap().push(request);
    }

    fn is_currently_awaiting_data(&self) -> bool {
        !self.pending.lock().unwrap().is_empty()
    }

    fn reception_counters(&self) -> ReceptionCounters {
        *self.counters.lock().unwrap()
    }

    fn stop_getting_frames(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

/// 立即完成读取并通过事件通道投递的传输源
pub(crate) struct EchoSource {
    events: TransportEventSender,
    payload: Vec<u8>,
    frame_interval: Duration,
    delivered: AtomicUsize,
}

impl EchoSource {
    pub fn new(events: TransportEventSender, payload: &[u8], frame_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            events,
            payload: payload.to_vec(),
            frame_interval,
            delivered: AtomicUsize::new(0),
        })
    }

    pub fn delivered_count(&self) -> usize {
        self.delivered.load(Ordering::SeqCst)
    }
}

impl TransportSource for EchoSource {
    fn get_next_frame(&self, request: ReadRequest) {
        let index = self.delivered.fetch_add(1, Ordering::SeqCst) as u32;
        let delivery = request.complete(
            &self.payload,
            self.frame_interval * index,
            self.frame_interval.as_micros() as u32,
        );
        let _ = self.events.send(TransportEvent::FrameDelivered(delivery));
    }

    fn is_currently_awaiting_data(&self) -> bool {
        false
    }

    fn reception_counters(&self) -> ReceptionCounters {
        let received = self.delivered.load(Ordering::SeqCst) as u64;
        ReceptionCounters {
            total_bytes_received: received * self.payload.len() as u64,
            expected_packet_count: received,
            received_packet_count: received,
            reset_interval: 0,
        }
    }
}

use crate::device::DeviceHandle;
use crate::shutdown::ShutdownToken;
use std::time::{Duration, Instant};
use t2t_common::RECORD_SIZE;
use t2t_core::record::DecisionRecord;
use t2t_core::ring::RingGeometry;
use tracing::{debug, trace, warn};

/// Back-off between empty polls in the blocking helpers.
const IDLE_SLEEP: Duration = Duration::from_micros(10);

/// Single consumer of the decision-record ring.
///
/// The device produces records and advances PROD_IDX; this side reads them in
/// order and publishes CONS_IDX_SHADOW once per batch so hardware can reuse
/// the slots. Only one `DmaRing` per device exists at a time, see
/// [`DeviceHandle::ring`].
pub struct DmaRing<'a> {
    device: &'a DeviceHandle,
    base: *const u8,
    geometry: RingGeometry,
    consumer: u16,
}

impl<'a> DmaRing<'a> {
    pub(crate) fn new(
        device: &'a DeviceHandle,
        base: *const u8,
        geometry: RingGeometry,
        consumer: u16,
    ) -> Self {
        debug!(depth = geometry.depth(), consumer, "ring consumer attached");
        Self {
            device,
            base,
            geometry,
            consumer,
        }
    }

    pub fn depth(&self) -> usize {
        self.geometry.depth()
    }

    pub fn consumer_index(&self) -> u16 {
        self.consumer
    }

    /// Current hardware producer index.
    pub fn producer_index(&self) -> u16 {
        self.geometry.index(self.device.producer_index_raw())
    }

    /// Records produced but not yet consumed.
    pub fn pending(&self) -> usize {
        self.geometry.pending(self.producer_index(), self.consumer)
    }

    pub fn ring_empty(&self) -> bool {
        self.geometry.is_empty(self.producer_index(), self.consumer)
    }

    /// True when the next record from hardware would be dropped.
    ///
    /// Diagnostic only: by the time the caller acts on it the producer may
    /// have moved.
    pub fn ring_full(&self) -> bool {
        self.geometry.is_full(self.producer_index(), self.consumer)
    }

    /// The 64 bytes of slot `index`, borrowed in place.
    fn slot_bytes(&self, index: u16) -> &[u8] {
        // SAFETY: `base` points at a live, 64-byte aligned DMA region of
        // `geometry.bytes()` bytes owned by the device handle, which outlives
        // this ring. The slot lies between the consumer and the producer
        // index read after an acquire fence, so hardware has finished it and
        // cannot reuse it before the consumer index is next published.
        unsafe {
            std::slice::from_raw_parts(
                self.base.add(self.geometry.slot(index) * RECORD_SIZE),
                RECORD_SIZE,
            )
        }
    }

    /// Drains every record available now and returns how many were handled.
    ///
    /// Records reach `handler` in production order as views into their ring
    /// slots, valid for the duration of the call. The consumer index is
    /// published to hardware once, after the last record of the batch.
    pub fn poll<F>(&mut self, mut handler: F) -> usize
    where
        F: FnMut(&DecisionRecord),
    {
        let producer = self.producer_index();
        let mut consumed = 0;
        while self.consumer != producer {
            let bytes = self.slot_bytes(self.consumer);
            match DecisionRecord::view(bytes) {
                Ok(record) => handler(record),
                Err(e) => {
                    warn!(error = %e, "ring slot not viewable in place, copying");
                    if let Ok(record) = DecisionRecord::from_bytes(bytes) {
                        handler(&record);
                    }
                }
            }
            self.consumer = self.geometry.advance(self.consumer);
            consumed += 1;
        }
        if consumed > 0 {
            self.device.publish_consumer(self.consumer);
            trace!(consumed, consumer = self.consumer, "ring batch consumed");
        }
        consumed
    }

    /// Polls until at least one record was handled or `timeout` elapses.
    pub fn poll_timeout<F>(&mut self, mut handler: F, timeout: Duration) -> usize
    where
        F: FnMut(&DecisionRecord),
    {
        let deadline = Instant::now() + timeout;
        loop {
            let n = self.poll(&mut handler);
            if n > 0 || Instant::now() >= deadline {
                return n;
            }
            std::thread::sleep(IDLE_SLEEP);
        }
    }

    /// Consumes records until `shutdown` is cancelled. Returns the total.
    pub fn run<F>(&mut self, shutdown: &ShutdownToken, mut handler: F) -> u64
    where
        F: FnMut(&DecisionRecord),
    {
        let mut total = 0u64;
        while !shutdown.is_cancelled() {
            let n = self.poll(&mut handler);
            if n == 0 {
                std::thread::sleep(IDLE_SLEEP);
            }
            total += n as u64;
        }
        // Pick up whatever landed between the last poll and cancellation.
        total += self.poll(&mut handler) as u64;
        debug!(total, "ring consumer stopped");
        total
    }
}

impl Drop for DmaRing<'_> {
    fn drop(&mut self) {
        self.device.detach_consumer();
    }
}

//! GPU pass timing through timestamp queries.
//!
//! Timestamps are resolved every frame, but copied out and mapped only when
//! the previous readback has finished, so at most one map request is ever
//! outstanding and the frame loop never waits on it. Reported timings lag the
//! GPU by at least one frame.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{SplatError, SplatResult};

/// Default number of timestamp queries.
pub const DEFAULT_CAPACITY: u32 = 16;

const IDLE: u8 = 0;
const PENDING: u8 = 1;
const READY: u8 = 2;

/// Begin/end query indices reserved for one named interval.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TimestampSlots {
    pub begin: u32,
    pub end: u32,
}

// ============================================================================
// Ledger
// ============================================================================

/// Slot bookkeeping and tick conversion, independent of the device.
#[derive(Debug, Clone)]
pub struct TimestampLedger {
    capacity: u32,
    subscriptions: Vec<(String, TimestampSlots)>,
    ticks: Option<Vec<u64>>,
    period_ns: f64,
}

impl TimestampLedger {
    pub fn new(capacity: u32, period_ns: f32) -> Self {
        Self {
            capacity,
            subscriptions: Vec::new(),
            ticks: None,
            period_ns: period_ns as f64,
        }
    }

    /// Reserve a begin/end pair for `name`. Subscribing twice returns the same pair.
    pub fn subscribe(&mut self, name: &str) -> SplatResult<TimestampSlots> {
        if let Some(slots) = self.subscription(name) {
            return Ok(slots);
        }
        let begin = self.used();
        if begin + 2 > self.capacity {
            return Err(SplatError::device(format!(
                "timestamp query set full ({} slots), cannot subscribe '{}'",
                self.capacity, name
            )));
        }
        let slots = TimestampSlots { begin, end: begin + 1 };
        self.subscriptions.push((name.to_string(), slots));
        Ok(slots)
    }

    pub fn subscription(&self, name: &str) -> Option<TimestampSlots> {
        self.subscriptions
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, slots)| *slots)
    }

    /// Number of query slots handed out so far.
    pub fn used(&self) -> u32 {
        self.subscriptions.len() as u32 * 2
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Store a resolved readback.
    pub fn set_ticks(&mut self, ticks: Vec<u64>) {
        self.ticks = Some(ticks);
    }

    /// Milliseconds from the begin slot `begin` to the end slot following `end`.
    pub fn result_by_ids(&self, end: u32, begin: u32) -> SplatResult<f64> {
        let ticks = self
            .ticks
            .as_ref()
            .ok_or_else(|| SplatError::TimingUnavailable("no timestamps resolved yet".into()))?;
        let (last, first) = match (ticks.get(end as usize + 1), ticks.get(begin as usize)) {
            (Some(last), Some(first)) => (*last, *first),
            _ => {
                return Err(SplatError::TimingUnavailable(format!(
                    "slots {}..{} not in readback of {}",
                    begin,
                    end + 1,
                    ticks.len()
                )))
            }
        };
        Ok(last.saturating_sub(first) as f64 * self.period_ns / 1.0e6)
    }

    /// Milliseconds spent inside the named interval.
    pub fn result_by_name(&self, name: &str) -> SplatResult<f64> {
        let slots = self
            .subscription(name)
            .ok_or_else(|| SplatError::TimingUnavailable(format!("no subscription named '{}'", name)))?;
        self.result_by_ids(slots.begin, slots.begin)
    }

    /// Milliseconds from the start of `first` to the end of `last`.
    pub fn result_between(&self, last: &str, first: &str) -> SplatResult<f64> {
        match (self.subscription(last), self.subscription(first)) {
            (Some(l), Some(f)) => self.result_by_ids(l.begin, f.begin),
            _ => Err(SplatError::TimingUnavailable(format!(
                "no subscriptions for '{}'..'{}'",
                first, last
            ))),
        }
    }
}

// ============================================================================
// GPU timer
// ============================================================================

pub struct GpuTimer {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    result_buffer: wgpu::Buffer,
    ledger: TimestampLedger,
    readback: Arc<AtomicU8>,
    copy_encoded: bool,
}

impl GpuTimer {
    /// Requires a device created with `Features::TIMESTAMP_QUERY`.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, capacity: u32) -> SplatResult<Self> {
        if !device.features().contains(wgpu::Features::TIMESTAMP_QUERY) {
            return Err(SplatError::device("device lacks TIMESTAMP_QUERY"));
        }
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("pass timestamps"),
            ty: wgpu::QueryType::Timestamp,
            count: capacity,
        });
        let size = capacity as u64 * std::mem::size_of::<u64>() as u64;
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp resolve"),
            size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let result_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("timestamp result"),
            size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            query_set,
            resolve_buffer,
            result_buffer,
            ledger: TimestampLedger::new(capacity, queue.get_timestamp_period()),
            readback: Arc::new(AtomicU8::new(IDLE)),
            copy_encoded: false,
        })
    }

    pub fn subscribe(&mut self, name: &str) -> SplatResult<TimestampSlots> {
        self.ledger.subscribe(name)
    }

    pub fn subscription(&self, name: &str) -> Option<TimestampSlots> {
        self.ledger.subscription(name)
    }

    pub fn ledger(&self) -> &TimestampLedger {
        &self.ledger
    }

    /// Timestamp writes for a compute pass that opens and/or closes `name`.
    pub fn compute_pass_writes(
        &self,
        name: &str,
        begin: bool,
        end: bool,
    ) -> Option<wgpu::ComputePassTimestampWrites<'_>> {
        let slots = self.subscription(name)?;
        if !begin && !end {
            return None;
        }
        Some(wgpu::ComputePassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: begin.then_some(slots.begin),
            end_of_pass_write_index: end.then_some(slots.end),
        })
    }

    pub fn render_pass_writes(&self, name: &str) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        let slots = self.subscription(name)?;
        Some(wgpu::RenderPassTimestampWrites {
            query_set: &self.query_set,
            beginning_of_pass_write_index: Some(slots.begin),
            end_of_pass_write_index: Some(slots.end),
        })
    }

    /// Resolve this frame's queries, and copy them out if the result buffer is free.
    pub fn encode_resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let used = self.ledger.used();
        if used == 0 {
            return;
        }
        encoder.resolve_query_set(&self.query_set, 0..used, &self.resolve_buffer, 0);
        if self.readback.load(Ordering::Acquire) == IDLE && !self.copy_encoded {
            let size = used as u64 * std::mem::size_of::<u64>() as u64;
            encoder.copy_buffer_to_buffer(&self.resolve_buffer, 0, &self.result_buffer, 0, size);
            self.copy_encoded = true;
        }
    }

    /// Advance the readback. Call after the frame's submit.
    ///
    /// Starts a map if a fresh copy was submitted and nothing is outstanding,
    /// or collects a finished map. Otherwise does nothing.
    pub fn resolve_results(&mut self) {
        match self.readback.load(Ordering::Acquire) {
            IDLE if self.copy_encoded => {
                self.copy_encoded = false;
                self.readback.store(PENDING, Ordering::Release);
                let state = Arc::clone(&self.readback);
                self.result_buffer
                    .slice(..)
                    .map_async(wgpu::MapMode::Read, move |result| match result {
                        Ok(()) => state.store(READY, Ordering::Release),
                        Err(e) => {
                            log::warn!("Timestamp readback failed: {}", e);
                            state.store(IDLE, Ordering::Release);
                        }
                    });
            }
            READY => {
                let used = self.ledger.used() as usize;
                let ticks = {
                    let data = self.result_buffer.slice(..).get_mapped_range();
                    bytemuck::cast_slice::<u8, u64>(&data)[..used].to_vec()
                };
                self.result_buffer.unmap();
                self.ledger.set_ticks(ticks);
                self.readback.store(IDLE, Ordering::Release);
            }
            _ => {}
        }
    }

    pub fn result_by_name(&self, name: &str) -> SplatResult<f64> {
        self.ledger.result_by_name(name)
    }

    pub fn result_by_ids(&self, end: u32, begin: u32) -> SplatResult<f64> {
        self.ledger.result_by_ids(end, begin)
    }

    pub fn result_between(&self, last: &str, first: &str) -> SplatResult<f64> {
        self.ledger.result_between(last, first)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_reserves_pairs() {
        let mut ledger = TimestampLedger::new(6, 1.0);
        assert_eq!(ledger.subscribe("a").unwrap(), TimestampSlots { begin: 0, end: 1 });
        assert_eq!(ledger.subscribe("b").unwrap(), TimestampSlots { begin: 2, end: 3 });
        assert_eq!(ledger.subscribe("a").unwrap(), TimestampSlots { begin: 0, end: 1 });
        assert_eq!(ledger.used(), 4);
        ledger.subscribe("c").unwrap();
        assert!(matches!(ledger.subscribe("d"), Err(SplatError::Device(_))));
    }

    #[test]
    fn test_unavailable_before_readback() {
        let mut ledger = TimestampLedger::new(4, 1.0);
        ledger.subscribe("render").unwrap();
        assert!(matches!(
            ledger.result_by_name("render"),
            Err(SplatError::TimingUnavailable(_))
        ));
        assert!(ledger.result_by_name("missing").unwrap_err().is_transient());
    }

    #[test]
    fn test_ticks_to_milliseconds() {
        let mut ledger = TimestampLedger::new(4, 2.0);
        ledger.subscribe("first").unwrap();
        ledger.subscribe("second").unwrap();
        ledger.set_ticks(vec![1_000_000, 1_500_000, 2_000_000, 4_000_000]);

        // 500k ticks at 2ns each
        assert!((ledger.result_by_name("first").unwrap() - 1.0).abs() < 1e-9);
        assert!((ledger.result_by_name("second").unwrap() - 4.0).abs() < 1e-9);
        assert!((ledger.result_between("second", "first").unwrap() - 6.0).abs() < 1e-9);
        assert!((ledger.result_by_ids(2, 0).unwrap() - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_reversed_ticks_clamp_to_zero() {
        let mut ledger = TimestampLedger::new(2, 1.0);
        ledger.subscribe("x").unwrap();
        ledger.set_ticks(vec![10, 5]);
        assert_eq!(ledger.result_by_name("x").unwrap(), 0.0);
    }
}

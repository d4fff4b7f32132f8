//! GPU → CPU read-back
//!
//! Each storage declared with `read_back` owns a small ring of mappable
//! staging buffers. A frame copies the storage into a free ring buffer, then
//! starts an asynchronous map of it. Maps are collected at the start of a
//! later frame (or by a blocking `read`), oldest first, so frame N's map
//! never holds up frame N+1's encoding and no frame's values are skipped
//! while an older map is still in flight.
//!
//! When every ring buffer is in flight the storage is not copied that frame.

use std::collections::VecDeque;

use crate::backend::{BufferDesc, BufferKey, GpuBackend, MapReceiver};
use crate::errors::{Result, WeaveError};
use crate::shader::EVENT_PAYLOAD;

/// Staging buffers per read-back storage.
pub const READBACK_RING: usize = 3;

struct InFlight {
    index: usize,
    receiver: MapReceiver,
}

pub struct ReadbackSlot {
    label: String,
    pub size: u64,
    staging: Vec<BufferKey>,
    /// Started maps, in submission order.
    in_flight: VecDeque<InFlight>,
    latest: Option<Vec<f32>>,
}

impl ReadbackSlot {
    pub fn new(backend: &mut impl GpuBackend, name: &str, size: u64) -> Self {
        let staging = (0..READBACK_RING)
            .map(|i| {
                backend.create_buffer(&BufferDesc {
                    label: format!("{name} (read-back {i})"),
                    size,
                    usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                })
            })
            .collect();
        Self {
            label: name.to_string(),
            size,
            staging,
            in_flight: VecDeque::with_capacity(READBACK_RING),
            latest: None,
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        !self.in_flight.is_empty()
    }

    /// Values of the most recent completed read-back.
    #[must_use]
    pub fn latest(&self) -> Option<&[f32]> {
        self.latest.as_deref()
    }

    fn free_index(&self) -> Option<usize> {
        (0..self.staging.len()).find(|i| self.in_flight.iter().all(|f| f.index != *i))
    }

    /// Staging buffer the next copy goes into, `None` while all are mapped.
    #[must_use]
    pub fn next_staging(&self) -> Option<BufferKey> {
        self.free_index().map(|i| self.staging[i])
    }

    /// Maps the buffer returned by [`ReadbackSlot::next_staging`].
    pub fn start(&mut self, backend: &mut impl GpuBackend) {
        let Some(index) = self.free_index() else {
            return;
        };
        let receiver = backend.map_read(self.staging[index], self.size);
        self.in_flight.push_back(InFlight { index, receiver });
    }

    /// Collects finished maps, oldest first, and returns their values.
    ///
    /// The backend must have been polled beforehand. A failed map is logged
    /// and its buffer returns to the ring.
    pub fn collect(&mut self, backend: &mut impl GpuBackend) -> Vec<Vec<f32>> {
        let mut completed = Vec::new();
        while let Some(front) = self.in_flight.front() {
            let outcome = match front.receiver.try_recv() {
                Ok(outcome) => outcome,
                Err(flume::TryRecvError::Empty) => break,
                Err(flume::TryRecvError::Disconnected) => {
                    Err(WeaveError::Readback("map request was dropped".to_string()))
                }
            };
            let index = front.index;
            self.in_flight.pop_front();

            match outcome.and_then(|()| self.read(backend, index)) {
                Ok(values) => {
                    self.latest = Some(values.clone());
                    completed.push(values);
                }
                Err(e) => log::warn!("Read-back of '{}' failed: {e}", self.label),
            }
        }
        completed
    }

    fn read(&self, backend: &mut impl GpuBackend, index: usize) -> Result<Vec<f32>> {
        let bytes = backend.read_mapped(self.staging[index], self.size)?;
        Ok(bytemuck::pod_collect_to_vec(&bytes))
    }

    pub fn release(&mut self, backend: &mut impl GpuBackend) {
        self.in_flight.clear();
        for buffer in self.staging.drain(..) {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Payload of an `Event` read-back, if its `updated` flag is set.
#[must_use]
pub fn fired_event(values: &[f32]) -> Option<&[f32]> {
    let (flag, data) = values.split_first()?;
    if flag.to_bits() == 0 {
        return None;
    }
    data.get(..EVENT_PAYLOAD)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::backend::{GpuCommand, RecordingBackend};

    #[test]
    fn ring_keeps_every_frame_in_order() {
        let mut backend = RecordingBackend::new(4, 4);
        backend.defer_maps(1);
        let source = backend.create_buffer(&BufferDesc {
            label: "source".to_string(),
            size: 4,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
        });
        let mut slot = ReadbackSlot::new(&mut backend, "values", 4);

        let frame = |backend: &mut RecordingBackend, slot: &mut ReadbackSlot, value: f32| {
            backend.poll(false);
            let completed = slot.collect(backend);
            backend.write_buffer(source, 0, bytemuck::bytes_of(&value));
            if let Some(destination) = slot.next_staging() {
                let copy = GpuCommand::CopyBuffer {
                    source,
                    destination,
                    size: 4,
                };
                assert!(backend.submit(&[copy]).unwrap());
                slot.start(backend);
            }
            completed
        };

        assert!(frame(&mut backend, &mut slot, 1.0).is_empty());
        assert!(frame(&mut backend, &mut slot, 2.0).is_empty());
        assert_eq!(frame(&mut backend, &mut slot, 3.0), vec![vec![1.0]]);
        assert_eq!(frame(&mut backend, &mut slot, 4.0), vec![vec![2.0]]);
        assert_eq!(slot.latest(), Some(&[2.0][..]));

        slot.release(&mut backend);
        assert_eq!(backend.live_buffers(), 1);
    }

    #[test]
    fn event_fires_only_with_flag() {
        let idle = [0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 0.0];
        assert!(fired_event(&idle).is_none());

        let mut fired = idle;
        fired[0] = f32::from_bits(1);
        assert_eq!(fired_event(&fired), Some(&[1.0, 2.0, 3.0, 4.0][..]));
    }
}

//! Physical frame allocator
//!
//! Frames are slots in a host-allocated arena, addressed by index plus a
//! generation counter. Freeing bumps the generation, so a stale handle
//! held past a free is detected instead of silently reading another
//! quantum's memory. Free lists are partitioned per core to keep the
//! common allocation path contention-free; a core that exhausts its
//! partition falls back to stealing from the others before reporting
//! out-of-memory.

use core_types::{MemoryError, PAGE_SIZE};

/// Generation-checked handle to a physical frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId {
    index: u32,
    generation: u32,
}

impl FrameId {
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug)]
struct FrameSlot {
    generation: u32,
    /// `Some` while allocated
    data: Option<Box<[u8]>>,
}

/// Sizing for the frame arena
#[derive(Debug, Clone, Copy)]
pub struct FrameAllocConfig {
    pub total_frames: usize,
    pub core_count: usize,
}

/// Arena-backed frame allocator with per-core free lists
#[derive(Debug)]
pub struct FrameAllocator {
    slots: Vec<FrameSlot>,
    free_lists: Vec<Vec<u32>>,
    free_count: usize,
}

impl FrameAllocator {
    pub fn new(config: FrameAllocConfig) -> Self {
        let core_count = config.core_count.max(1);
        let mut slots = Vec::with_capacity(config.total_frames);
        let mut free_lists = vec![Vec::new(); core_count];
        for index in 0..config.total_frames {
            slots.push(FrameSlot {
                generation: 0,
                data: None,
            });
            free_lists[index % core_count].push(index as u32);
        }
        // Pop order matches ascending index within each partition.
        for list in &mut free_lists {
            list.reverse();
        }
        Self {
            slots,
            free_lists,
            free_count: config.total_frames,
        }
    }

    /// Number of frames currently free
    pub fn free_frames(&self) -> usize {
        self.free_count
    }

    /// Number of frames currently allocated
    pub fn allocated_frames(&self) -> usize {
        self.slots.len() - self.free_count
    }

    /// Allocates a zero-filled frame, preferring `core`'s partition
    pub fn allocate(&mut self, core: usize) -> Result<FrameId, MemoryError> {
        let partitions = self.free_lists.len();
        let home = core % partitions;
        let index = (0..partitions)
            .map(|offset| (home + offset) % partitions)
            .find_map(|list| self.free_lists[list].pop())
            .ok_or(MemoryError::OutOfMemory {
                requested: 1,
                available: 0,
            })?;
        let slot = &mut self.slots[index as usize];
        slot.data = Some(vec![0u8; PAGE_SIZE as usize].into_boxed_slice());
        self.free_count -= 1;
        Ok(FrameId {
            index,
            generation: slot.generation,
        })
    }

    /// Releases a frame back to its partition
    ///
    /// A mismatched generation means the handle was already freed; that
    /// is a kernel bug, reported as a fatal error.
    pub fn free(&mut self, frame: FrameId) -> Result<(), MemoryError> {
        let slot = self
            .slots
            .get_mut(frame.index as usize)
            .ok_or(MemoryError::StaleFrame {
                index: frame.index,
                generation: frame.generation,
            })?;
        if slot.generation != frame.generation || slot.data.is_none() {
            return Err(MemoryError::StaleFrame {
                index: frame.index,
                generation: frame.generation,
            });
        }
        slot.generation = slot.generation.wrapping_add(1);
        slot.data = None;
        let partitions = self.free_lists.len();
        self.free_lists[frame.index as usize % partitions].push(frame.index);
        self.free_count += 1;
        Ok(())
    }

    /// Read access to a frame's bytes
    pub fn data(&self, frame: FrameId) -> Result<&[u8], MemoryError> {
        let slot = self
            .slots
            .get(frame.index as usize)
            .ok_or(MemoryError::StaleFrame {
                index: frame.index,
                generation: frame.generation,
            })?;
        match &slot.data {
            Some(data) if slot.generation == frame.generation => Ok(data),
            _ => Err(MemoryError::StaleFrame {
                index: frame.index,
                generation: frame.generation,
            }),
        }
    }

    /// Write access to a frame's bytes
    pub fn data_mut(&mut self, frame: FrameId) -> Result<&mut [u8], MemoryError> {
        let slot = self
            .slots
            .get_mut(frame.index as usize)
            .ok_or(MemoryError::StaleFrame {
                index: frame.index,
                generation: frame.generation,
            })?;
        match &mut slot.data {
            Some(data) if slot.generation == frame.generation => Ok(data),
            _ => Err(MemoryError::StaleFrame {
                index: frame.index,
                generation: frame.generation,
            }),
        }
    }
}

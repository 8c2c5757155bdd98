//! Fakes for physical memory, page allocation and the CPU.

use crate::addresses::{PhysicalAddress, Size4K};
use crate::cpu::CpuControl;
use crate::info::PAGE_SIZE;
use crate::phys_mapper::PhysMapper;
use crate::pool::PageAllocator;
use std::cell::RefCell;
use std::collections::BTreeMap;

#[repr(C, align(4096))]
struct Frame([u8; 4096]);

/// Sparse physical memory. Frames spring into existence zeroed on first touch.
#[derive(Default)]
pub struct SimulatedMemory {
    frames: RefCell<BTreeMap<u64, Box<Frame>>>,
}

impl SimulatedMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every touched frame, keyed by frame address.
    pub fn snapshot(&self) -> Vec<(u64, Vec<u8>)> {
        self.frames
            .borrow()
            .iter()
            .map(|(address, frame)| (*address, frame.0.to_vec()))
            .collect()
    }
}

impl PhysMapper for SimulatedMemory {
    unsafe fn phys_to_mut<'a, T>(&self, at: PhysicalAddress) -> &'a mut T {
        let offset = usize::try_from(at.offset::<Size4K>()).unwrap();
        assert!(offset + size_of::<T>() <= 4096, "{at} straddles a frame");
        assert_eq!(offset % align_of::<T>(), 0, "{at} is misaligned");

        let mut frames = self.frames.borrow_mut();
        let frame = frames
            .entry(at.align_down::<Size4K>().as_u64())
            .or_insert_with(|| Box::new(Frame([0; 4096])));
        // Boxed frames never move and live as long as `self`.
        let ptr = frame.0.as_mut_ptr().wrapping_add(offset).cast::<T>();
        unsafe { &mut *ptr }
    }
}

/// Hands out aligned page ranges from `[next, end)` and never frees them.
pub struct BumpPageAllocator {
    next: u64,
    end: u64,
}

impl BumpPageAllocator {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { next: start, end }
    }
}

impl PageAllocator for BumpPageAllocator {
    fn allocate_aligned_pages(&mut self, pages: u64, alignment: u64) -> Option<PhysicalAddress> {
        let base = self.next.next_multiple_of(alignment.max(PAGE_SIZE));
        let end = base + pages * PAGE_SIZE;
        if end > self.end {
            return None;
        }
        self.next = end;
        Some(PhysicalAddress::new(base))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CpuEvent {
    WriteProtect(bool),
    ExecuteDisable,
}

/// Records every change to `CR0.WP` and `EFER.NXE`.
pub struct FakeCpu {
    write_protect: bool,
    events: Vec<CpuEvent>,
}

impl FakeCpu {
    /// A CPU with write protection on, as firmware leaves it.
    pub const fn new() -> Self {
        Self {
            write_protect: true,
            events: Vec::new(),
        }
    }

    pub fn events(&self) -> &[CpuEvent] {
        &self.events
    }
}

impl CpuControl for FakeCpu {
    fn write_protect_enabled(&self) -> bool {
        self.write_protect
    }

    fn set_write_protect(&mut self, enabled: bool) {
        self.write_protect = enabled;
        self.events.push(CpuEvent::WriteProtect(enabled));
    }

    fn enable_execute_disable(&mut self) {
        self.events.push(CpuEvent::ExecuteDisable);
    }
}

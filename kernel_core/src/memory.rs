//! Memory manager
//!
//! Owns address spaces, regions, shared backings, and the frame arena.
//! Regions inside a space never overlap; pages are demand-populated on
//! fault; sharing goes through reference-counted physical backings with
//! copy-on-write at region granularity.
//!
//! Permission checks resolve through the ABI tags of every quantum
//! attached to the space: the installed permission set is the
//! intersection of what each attached convention allows, so a region
//! shared between a `Portable` and a `Native64` quantum is never more
//! permissive than the strictest mapper.

use crate::compress;
use crate::frame_alloc::{FrameAllocConfig, FrameAllocator, FrameId};
use core_types::{
    AbiTag, AccessType, AddressSpaceId, BackingKind, MemoryError, MemoryPerms, RegionId,
    VirtRange, PAGE_SIZE,
};
use std::collections::{BTreeMap, HashMap};

/// Lowest address handed out when the kernel picks a placement itself
const AUTO_MAP_BASE: u64 = 0x1000_0000;

/// Internal handle to a reference-counted physical backing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct BackingId(u64);

/// Residency state of one page
#[derive(Debug, Clone)]
enum PageSlot {
    /// Never touched; reads and writes populate a zero frame
    Empty,
    Resident(FrameId),
    Compressed(Vec<u8>),
}

#[derive(Debug)]
enum RegionBacking {
    Anonymous { pages: Vec<PageSlot> },
    Shared { backing: BackingId },
}

#[derive(Debug)]
struct Region {
    id: RegionId,
    range: VirtRange,
    perms: MemoryPerms,
    backing: RegionBacking,
}

#[derive(Debug)]
struct SharedBacking {
    pages: Vec<PageSlot>,
    refs: usize,
}

#[derive(Debug)]
struct Space {
    id: AddressSpaceId,
    /// Keyed by range start; BTreeMap keeps neighbour lookup cheap
    regions: BTreeMap<u64, Region>,
    /// ABI tags of attached quanta, with attach counts
    abi_users: HashMap<AbiTag, usize>,
    refs: usize,
}

impl Space {
    /// Smallest layout ceiling across every attached convention
    fn layout_end(&self) -> u64 {
        self.abi_users
            .keys()
            .map(|tag| tag.layout_end())
            .min()
            .unwrap_or(AbiTag::Native64.layout_end())
    }

    /// Resolves requested permissions through every attached convention
    fn resolve_perms(&self, requested: MemoryPerms) -> MemoryPerms {
        self.abi_users
            .keys()
            .fold(requested, |perms, tag| perms.intersect(tag.resolve_perms(requested)))
    }

    fn region_containing(&self, address: u64) -> Option<&Region> {
        self.regions
            .range(..=address)
            .next_back()
            .map(|(_, region)| region)
            .filter(|region| region.range.contains(address))
    }
}

/// How a page fault was resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// A zero frame was populated
    Populated,
    /// A compressed page was expanded back into a frame
    Decompressed,
    /// The whole region was privatized before the write
    CopiedOnWrite,
    /// The page was already resident; nothing to do
    AlreadyResident,
}

/// Snapshot of one region, for callers outside the manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionInfo {
    pub id: RegionId,
    pub range: VirtRange,
    pub perms: MemoryPerms,
    pub kind: BackingKind,
    pub resident_pages: usize,
    pub compressed_pages: usize,
}

/// Aggregate counters for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    pub spaces: usize,
    pub regions: usize,
    pub free_frames: usize,
    pub allocated_frames: usize,
}

/// Audit trail of memory manager activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEvent {
    SpaceCreated {
        space: AddressSpaceId,
        abi: AbiTag,
    },
    SpaceReleased {
        space: AddressSpaceId,
    },
    RegionMapped {
        space: AddressSpaceId,
        region: RegionId,
        range: VirtRange,
        kind: BackingKind,
    },
    RegionUnmapped {
        space: AddressSpaceId,
        region: RegionId,
    },
    FaultResolved {
        space: AddressSpaceId,
        address: u64,
        resolution: FaultResolution,
    },
    RegionCompressed {
        space: AddressSpaceId,
        region: RegionId,
        pages: usize,
    },
    RegionShared {
        source: AddressSpaceId,
        target: AddressSpaceId,
        region: RegionId,
        refs: usize,
    },
}

/// The memory manager
#[derive(Debug)]
pub struct MemoryManager {
    spaces: HashMap<AddressSpaceId, Space>,
    backings: HashMap<BackingId, SharedBacking>,
    frames: FrameAllocator,
    next_backing: u64,
    events: Vec<MemoryEvent>,
}

impl MemoryManager {
    pub fn new(config: FrameAllocConfig) -> Self {
        Self {
            spaces: HashMap::new(),
            backings: HashMap::new(),
            frames: FrameAllocator::new(config),
            next_backing: 0,
            events: Vec::new(),
        }
    }

    // ---- address space lifecycle -------------------------------------

    /// Creates a space with one attached quantum of the given convention
    pub fn create_space(&mut self, abi: AbiTag) -> AddressSpaceId {
        let id = AddressSpaceId::new();
        let mut abi_users = HashMap::new();
        abi_users.insert(abi, 1);
        self.spaces.insert(
            id,
            Space {
                id,
                regions: BTreeMap::new(),
                abi_users,
                refs: 1,
            },
        );
        self.events.push(MemoryEvent::SpaceCreated { space: id, abi });
        id
    }

    /// Attaches another quantum to an existing space
    pub fn retain_space(&mut self, space: AddressSpaceId, abi: AbiTag) -> Result<(), MemoryError> {
        let entry = self.space_mut(space)?;
        *entry.abi_users.entry(abi).or_insert(0) += 1;
        entry.refs += 1;
        Ok(())
    }

    /// Detaches a quantum; the last detach tears the space down
    pub fn release_space(
        &mut self,
        space: AddressSpaceId,
        abi: AbiTag,
    ) -> Result<(), MemoryError> {
        let entry = self.space_mut(space)?;
        if let Some(count) = entry.abi_users.get_mut(&abi) {
            *count -= 1;
            if *count == 0 {
                entry.abi_users.remove(&abi);
            }
        }
        entry.refs -= 1;
        if entry.refs > 0 {
            return Ok(());
        }
        let regions: Vec<RegionId> = entry.regions.values().map(|r| r.id).collect();
        for region in regions {
            self.unmap(space, region)?;
        }
        self.spaces.remove(&space);
        self.events.push(MemoryEvent::SpaceReleased { space });
        Ok(())
    }

    pub fn space_exists(&self, space: AddressSpaceId) -> bool {
        self.spaces.contains_key(&space)
    }

    // ---- mapping -----------------------------------------------------

    /// Maps a new region into a space
    pub fn map(
        &mut self,
        space: AddressSpaceId,
        range: VirtRange,
        perms: MemoryPerms,
        kind: BackingKind,
    ) -> Result<RegionId, MemoryError> {
        let entry = self.space_ref(space)?;
        if range.is_empty() || !range.is_page_aligned() || range.end > entry.layout_end() {
            return Err(MemoryError::OutOfAddressSpace { space, range });
        }
        if entry
            .regions
            .values()
            .any(|region| region.range.overlaps(&range))
        {
            return Err(MemoryError::Overlap { space, range });
        }
        let pages = range.page_count() as usize;
        let backing = match kind {
            BackingKind::Anonymous => RegionBacking::Anonymous {
                pages: vec![PageSlot::Empty; pages],
            },
            BackingKind::CompressedResident => {
                let zero = compress::compress(&vec![0u8; PAGE_SIZE as usize]);
                RegionBacking::Anonymous {
                    pages: vec![PageSlot::Compressed(zero); pages],
                }
            }
            BackingKind::Shared => {
                let backing = self.fresh_backing(pages);
                RegionBacking::Shared { backing }
            }
        };
        let id = RegionId::new();
        let region = Region {
            id,
            range,
            perms,
            backing,
        };
        self.space_mut(space)?.regions.insert(range.start, region);
        self.events.push(MemoryEvent::RegionMapped {
            space,
            region: id,
            range,
            kind,
        });
        Ok(id)
    }

    /// Maps a region at a kernel-chosen free range
    pub fn map_anywhere(
        &mut self,
        space: AddressSpaceId,
        len: u64,
        perms: MemoryPerms,
        kind: BackingKind,
    ) -> Result<(RegionId, VirtRange), MemoryError> {
        let range = self.find_free_range(space, len)?;
        let id = self.map(space, range, perms, kind)?;
        Ok((id, range))
    }

    /// Removes a region and releases whatever backs it
    ///
    /// Unmapping an id that no longer exists is a double free and fatal.
    pub fn unmap(&mut self, space: AddressSpaceId, region: RegionId) -> Result<(), MemoryError> {
        let entry = self.space_mut(space)?;
        let start = entry
            .regions
            .values()
            .find(|r| r.id == region)
            .map(|r| r.range.start)
            .ok_or(MemoryError::UnknownRegion(region))?;
        let removed = match entry.regions.remove(&start) {
            Some(removed) => removed,
            None => return Err(MemoryError::UnknownRegion(region)),
        };
        match removed.backing {
            RegionBacking::Anonymous { pages } => {
                self.free_pages(pages)?;
            }
            RegionBacking::Shared { backing } => {
                self.release_backing(backing)?;
            }
        }
        self.events
            .push(MemoryEvent::RegionUnmapped { space, region });
        Ok(())
    }

    /// Finds a page-aligned free range of at least `len` bytes
    pub fn find_free_range(
        &self,
        space: AddressSpaceId,
        len: u64,
    ) -> Result<VirtRange, MemoryError> {
        let entry = self.space_ref(space)?;
        let len = len.div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut cursor = AUTO_MAP_BASE;
        for region in entry.regions.values() {
            if region.range.end <= cursor {
                continue;
            }
            if region.range.start >= cursor.saturating_add(len) {
                break;
            }
            cursor = region.range.end;
        }
        let range = VirtRange::from_span(cursor, len);
        if range.end > entry.layout_end() {
            return Err(MemoryError::OutOfAddressSpace { space, range });
        }
        Ok(range)
    }

    // ---- faults ------------------------------------------------------

    /// Resolves a page fault at `address`
    ///
    /// `core` is a placement hint for frame allocation. Returns a
    /// recoverable error for bad accesses and a fatal one for corrupt
    /// kernel state.
    pub fn handle_page_fault(
        &mut self,
        space: AddressSpaceId,
        address: u64,
        access: AccessType,
        core: usize,
    ) -> Result<FaultResolution, MemoryError> {
        let entry = self.space_ref(space)?;
        let region = entry
            .region_containing(address)
            .ok_or(MemoryError::SegmentationFault {
                space,
                address,
                access,
            })?;
        let resolved = entry.resolve_perms(region.perms);
        if !resolved.allows(access) {
            return Err(MemoryError::SegmentationFault {
                space,
                address,
                access,
            });
        }
        let range = region.range;
        let page = range.page_index(address);
        let shared_backing = match &region.backing {
            RegionBacking::Anonymous { .. } => None,
            RegionBacking::Shared { backing } => Some(*backing),
        };

        let resolution = match shared_backing {
            None => self.populate_anonymous_page(space, range.start, page, core)?,
            Some(backing) => {
                let refs = self.backing_ref(backing)?.refs;
                if access == AccessType::Write && refs > 1 {
                    self.privatize_region(space, range.start, backing, core)?;
                    self.populate_anonymous_page(space, range.start, page, core)?;
                    FaultResolution::CopiedOnWrite
                } else {
                    self.populate_backing_page(backing, page, core)?
                }
            }
        };
        self.events.push(MemoryEvent::FaultResolved {
            space,
            address,
            resolution,
        });
        Ok(resolution)
    }

    fn populate_anonymous_page(
        &mut self,
        space: AddressSpaceId,
        start: u64,
        page: usize,
        core: usize,
    ) -> Result<FaultResolution, MemoryError> {
        // Allocate before re-borrowing the region mutably.
        let current = {
            let entry = self.space_ref(space)?;
            let region = entry
                .regions
                .get(&start)
                .ok_or_else(|| MemoryError::Internal("region vanished during fault".to_string()))?;
            match &region.backing {
                RegionBacking::Anonymous { pages } => pages[page].clone(),
                RegionBacking::Shared { .. } => {
                    return Err(MemoryError::Internal(
                        "anonymous fault path reached a shared region".to_string(),
                    ))
                }
            }
        };
        let (slot, resolution) = match current {
            PageSlot::Resident(_) => return Ok(FaultResolution::AlreadyResident),
            PageSlot::Empty => {
                let frame = self.frames.allocate(core)?;
                (PageSlot::Resident(frame), FaultResolution::Populated)
            }
            PageSlot::Compressed(encoded) => {
                let bytes = compress::decompress(&encoded, PAGE_SIZE as usize)?;
                let frame = self.frames.allocate(core)?;
                self.frames.data_mut(frame)?.copy_from_slice(&bytes);
                (PageSlot::Resident(frame), FaultResolution::Decompressed)
            }
        };
        let entry = self.space_mut(space)?;
        if let Some(Region {
            backing: RegionBacking::Anonymous { pages },
            ..
        }) = entry.regions.get_mut(&start)
        {
            pages[page] = slot;
        }
        Ok(resolution)
    }

    fn populate_backing_page(
        &mut self,
        backing: BackingId,
        page: usize,
        core: usize,
    ) -> Result<FaultResolution, MemoryError> {
        let current = self.backing_ref(backing)?.pages[page].clone();
        let (slot, resolution) = match current {
            PageSlot::Resident(_) => return Ok(FaultResolution::AlreadyResident),
            PageSlot::Empty => {
                let frame = self.frames.allocate(core)?;
                (PageSlot::Resident(frame), FaultResolution::Populated)
            }
            PageSlot::Compressed(encoded) => {
                let bytes = compress::decompress(&encoded, PAGE_SIZE as usize)?;
                let frame = self.frames.allocate(core)?;
                self.frames.data_mut(frame)?.copy_from_slice(&bytes);
                (PageSlot::Resident(frame), FaultResolution::Decompressed)
            }
        };
        self.backing_mut(backing)?.pages[page] = slot;
        Ok(resolution)
    }

    /// Breaks sharing for one mapper: fresh private frames carrying a
    /// copy of the backing's current contents, backing refcount down one
    fn privatize_region(
        &mut self,
        space: AddressSpaceId,
        start: u64,
        backing: BackingId,
        core: usize,
    ) -> Result<(), MemoryError> {
        let page_count = self.backing_ref(backing)?.pages.len();
        let mut private = Vec::with_capacity(page_count);
        for page in 0..page_count {
            let slot = self.backing_ref(backing)?.pages[page].clone();
            let copied = match slot {
                PageSlot::Empty => PageSlot::Empty,
                PageSlot::Resident(frame) => {
                    let bytes = self.frames.data(frame)?.to_vec();
                    let fresh = self.frames.allocate(core)?;
                    self.frames.data_mut(fresh)?.copy_from_slice(&bytes);
                    PageSlot::Resident(fresh)
                }
                PageSlot::Compressed(encoded) => PageSlot::Compressed(encoded),
            };
            private.push(copied);
        }
        self.release_backing(backing)?;
        let entry = self.space_mut(space)?;
        if let Some(region) = entry.regions.get_mut(&start) {
            region.backing = RegionBacking::Anonymous { pages: private };
        }
        Ok(())
    }

    // ---- sharing and compression -------------------------------------

    /// Shares a region from `source` into `target`
    ///
    /// An anonymous region is promoted to a shared backing first. The
    /// target gets its own region id at a kernel-chosen range; both now
    /// reference the same physical pages until one of them writes.
    pub fn share_region(
        &mut self,
        source: AddressSpaceId,
        region: RegionId,
        target: AddressSpaceId,
    ) -> Result<RegionId, MemoryError> {
        let entry = self.space_ref(source)?;
        let (start, range, perms) = entry
            .regions
            .values()
            .find(|r| r.id == region)
            .map(|r| (r.range.start, r.range, r.perms))
            .ok_or(MemoryError::UnknownRegion(region))?;

        // Promote anonymous pages into a fresh backing.
        let existing = {
            let entry = self.space_ref(source)?;
            let src = entry
                .regions
                .get(&start)
                .ok_or(MemoryError::UnknownRegion(region))?;
            match &src.backing {
                RegionBacking::Shared { backing } => Some(*backing),
                RegionBacking::Anonymous { .. } => None,
            }
        };
        let backing = match existing {
            Some(backing) => backing,
            None => {
                let taken = {
                    let entry = self.space_mut(source)?;
                    let src = entry
                        .regions
                        .get_mut(&start)
                        .ok_or(MemoryError::UnknownRegion(region))?;
                    match &mut src.backing {
                        RegionBacking::Anonymous { pages } => std::mem::take(pages),
                        RegionBacking::Shared { .. } => {
                            return Err(MemoryError::Internal(
                                "region backing changed during promotion".to_string(),
                            ))
                        }
                    }
                };
                let id = BackingId(self.next_backing);
                self.next_backing += 1;
                self.backings.insert(
                    id,
                    SharedBacking {
                        pages: taken,
                        refs: 1,
                    },
                );
                let entry = self.space_mut(source)?;
                if let Some(src) = entry.regions.get_mut(&start) {
                    src.backing = RegionBacking::Shared { backing: id };
                }
                id
            }
        };

        let target_range = self.find_free_range(target, range.len())?;
        {
            let entry = self.space_ref(target)?;
            if entry
                .regions
                .values()
                .any(|r| r.range.overlaps(&target_range))
            {
                return Err(MemoryError::Overlap {
                    space: target,
                    range: target_range,
                });
            }
        }
        let new_id = RegionId::new();
        self.backing_mut(backing)?.refs += 1;
        let refs = self.backing_ref(backing)?.refs;
        self.space_mut(target)?.regions.insert(
            target_range.start,
            Region {
                id: new_id,
                range: target_range,
                perms,
                backing: RegionBacking::Shared { backing },
            },
        );
        self.events.push(MemoryEvent::RegionShared {
            source,
            target,
            region: new_id,
            refs,
        });
        Ok(new_id)
    }

    /// Compresses every resident page of an anonymous region
    pub fn compress_region(
        &mut self,
        space: AddressSpaceId,
        region: RegionId,
    ) -> Result<usize, MemoryError> {
        let entry = self.space_ref(space)?;
        let start = entry
            .regions
            .values()
            .find(|r| r.id == region)
            .map(|r| r.range.start)
            .ok_or(MemoryError::UnknownRegion(region))?;
        let page_count = {
            let entry = self.space_ref(space)?;
            let src = entry
                .regions
                .get(&start)
                .ok_or(MemoryError::UnknownRegion(region))?;
            match &src.backing {
                RegionBacking::Shared { .. } => return Err(MemoryError::NotCompressible(region)),
                RegionBacking::Anonymous { pages } => pages.len(),
            }
        };
        let mut compressed = 0;
        for page in 0..page_count {
            let slot = {
                let entry = self.space_ref(space)?;
                let src = entry
                    .regions
                    .get(&start)
                    .ok_or(MemoryError::UnknownRegion(region))?;
                match &src.backing {
                    RegionBacking::Anonymous { pages } => pages[page].clone(),
                    RegionBacking::Shared { .. } => {
                        return Err(MemoryError::Internal(
                            "region backing changed during compression".to_string(),
                        ))
                    }
                }
            };
            if let PageSlot::Resident(frame) = slot {
                let encoded = compress::compress(self.frames.data(frame)?);
                self.frames.free(frame)?;
                let entry = self.space_mut(space)?;
                if let Some(Region {
                    backing: RegionBacking::Anonymous { pages },
                    ..
                }) = entry.regions.get_mut(&start)
                {
                    pages[page] = PageSlot::Compressed(encoded);
                }
                compressed += 1;
            }
        }
        self.events.push(MemoryEvent::RegionCompressed {
            space,
            region,
            pages: compressed,
        });
        Ok(compressed)
    }

    // ---- byte access -------------------------------------------------

    /// Reads bytes through the fault path, honoring permissions
    pub fn read_bytes(
        &mut self,
        space: AddressSpaceId,
        address: u64,
        len: usize,
    ) -> Result<Vec<u8>, MemoryError> {
        let mut out = Vec::with_capacity(len);
        let mut cursor = address;
        let end = address + len as u64;
        while cursor < end {
            self.handle_page_fault(space, cursor, AccessType::Read, 0)?;
            let page_base = cursor / PAGE_SIZE * PAGE_SIZE;
            let offset = (cursor - page_base) as usize;
            let take = ((PAGE_SIZE - (cursor - page_base)) as usize).min((end - cursor) as usize);
            let frame = self.resident_frame(space, cursor)?;
            out.extend_from_slice(&self.frames.data(frame)?[offset..offset + take]);
            cursor += take as u64;
        }
        Ok(out)
    }

    /// Writes bytes through the fault path, honoring permissions
    pub fn write_bytes(
        &mut self,
        space: AddressSpaceId,
        address: u64,
        bytes: &[u8],
    ) -> Result<(), MemoryError> {
        let mut cursor = address;
        let end = address + bytes.len() as u64;
        let mut written = 0usize;
        while cursor < end {
            self.handle_page_fault(space, cursor, AccessType::Write, 0)?;
            let page_base = cursor / PAGE_SIZE * PAGE_SIZE;
            let offset = (cursor - page_base) as usize;
            let take = ((PAGE_SIZE - (cursor - page_base)) as usize).min((end - cursor) as usize);
            let frame = self.resident_frame(space, cursor)?;
            self.frames.data_mut(frame)?[offset..offset + take]
                .copy_from_slice(&bytes[written..written + take]);
            cursor += take as u64;
            written += take;
        }
        Ok(())
    }

    /// Frame backing an address, after the fault path has run
    fn resident_frame(
        &self,
        space: AddressSpaceId,
        address: u64,
    ) -> Result<FrameId, MemoryError> {
        let entry = self.space_ref(space)?;
        let region = entry
            .region_containing(address)
            .ok_or(MemoryError::SegmentationFault {
                space,
                address,
                access: AccessType::Read,
            })?;
        let page = region.range.page_index(address);
        let slot = match &region.backing {
            RegionBacking::Anonymous { pages } => &pages[page],
            RegionBacking::Shared { backing } => &self.backing_ref(*backing)?.pages[page],
        };
        match slot {
            PageSlot::Resident(frame) => Ok(*frame),
            _ => Err(MemoryError::Internal(
                "page not resident after fault resolution".to_string(),
            )),
        }
    }

    // ---- introspection -----------------------------------------------

    pub fn region_info(
        &self,
        space: AddressSpaceId,
        region: RegionId,
    ) -> Result<RegionInfo, MemoryError> {
        let entry = self.space_ref(space)?;
        let found = entry
            .regions
            .values()
            .find(|r| r.id == region)
            .ok_or(MemoryError::UnknownRegion(region))?;
        let (kind, pages): (BackingKind, &[PageSlot]) = match &found.backing {
            RegionBacking::Anonymous { pages } => (BackingKind::Anonymous, pages),
            RegionBacking::Shared { backing } => (
                BackingKind::Shared,
                &self.backing_ref(*backing)?.pages,
            ),
        };
        Ok(RegionInfo {
            id: found.id,
            range: found.range,
            perms: found.perms,
            kind,
            resident_pages: pages
                .iter()
                .filter(|p| matches!(p, PageSlot::Resident(_)))
                .count(),
            compressed_pages: pages
                .iter()
                .filter(|p| matches!(p, PageSlot::Compressed(_)))
                .count(),
        })
    }

    /// Reference count of the backing behind a shared region
    pub fn backing_refs(
        &self,
        space: AddressSpaceId,
        region: RegionId,
    ) -> Result<Option<usize>, MemoryError> {
        let entry = self.space_ref(space)?;
        let found = entry
            .regions
            .values()
            .find(|r| r.id == region)
            .ok_or(MemoryError::UnknownRegion(region))?;
        match &found.backing {
            RegionBacking::Anonymous { .. } => Ok(None),
            RegionBacking::Shared { backing } => Ok(Some(self.backing_ref(*backing)?.refs)),
        }
    }

    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            spaces: self.spaces.len(),
            regions: self.spaces.values().map(|s| s.regions.len()).sum(),
            free_frames: self.frames.free_frames(),
            allocated_frames: self.frames.allocated_frames(),
        }
    }

    pub fn events(&self) -> &[MemoryEvent] {
        &self.events
    }

    pub fn has_event(&self, predicate: impl Fn(&MemoryEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }

    pub fn count_events(&self, predicate: impl Fn(&MemoryEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }

    // ---- internals ---------------------------------------------------

    fn space_ref(&self, space: AddressSpaceId) -> Result<&Space, MemoryError> {
        self.spaces
            .get(&space)
            .ok_or(MemoryError::UnknownSpace(space))
    }

    fn space_mut(&mut self, space: AddressSpaceId) -> Result<&mut Space, MemoryError> {
        self.spaces
            .get_mut(&space)
            .ok_or(MemoryError::UnknownSpace(space))
    }

    fn backing_ref(&self, backing: BackingId) -> Result<&SharedBacking, MemoryError> {
        self.backings
            .get(&backing)
            .ok_or_else(|| MemoryError::Internal("missing shared backing".to_string()))
    }

    fn backing_mut(&mut self, backing: BackingId) -> Result<&mut SharedBacking, MemoryError> {
        self.backings
            .get_mut(&backing)
            .ok_or_else(|| MemoryError::Internal("missing shared backing".to_string()))
    }

    fn fresh_backing(&mut self, pages: usize) -> BackingId {
        let id = BackingId(self.next_backing);
        self.next_backing += 1;
        self.backings.insert(
            id,
            SharedBacking {
                pages: vec![PageSlot::Empty; pages],
                refs: 1,
            },
        );
        id
    }

    fn release_backing(&mut self, backing: BackingId) -> Result<(), MemoryError> {
        let refs = {
            let entry = self.backing_mut(backing)?;
            entry.refs -= 1;
            entry.refs
        };
        if refs == 0 {
            if let Some(removed) = self.backings.remove(&backing) {
                self.free_pages(removed.pages)?;
            }
        }
        Ok(())
    }

    fn free_pages(&mut self, pages: Vec<PageSlot>) -> Result<(), MemoryError> {
        for slot in pages {
            if let PageSlot::Resident(frame) = slot {
                self.frames.free(frame)?;
            }
        }
        Ok(())
    }
}

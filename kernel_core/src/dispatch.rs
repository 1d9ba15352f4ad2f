//! Core dispatch
//!
//! The [`Kernel`] ties the subsystems together: it owns the memory
//! manager, the scheduler, the conduit manager, and the deadline wheel,
//! routes traps to them, and applies the wake/park outcomes they return.
//!
//! Lifecycle is a one-way street: `Boot -> Initializing -> Running`,
//! then either `Shutdown` (orderly) or `Panic` (a subsystem reported a
//! broken invariant). From `Panic` nothing runs again; the diagnostic
//! stays available for the embedder.

use crate::conduit::{
    CancelledWait, CloseEffects, ConduitManager, DeferredSend, EnqueueOutcome, PeerStatus,
    ReceiveOutcome,
};
use crate::frame_alloc::FrameAllocConfig;
use crate::memory::{FaultResolution, MemoryManager};
use crate::scheduler::{CoreId, Scheduler, SchedulerConfig, WaitReason};
use crate::timer::{Deadline, DeadlineWheel};
use core_types::{
    AbiContext, AccessType, AddressSpaceId, BackingKind, MemoryError, MemoryPerms, QuantumId,
    RegionId, VirtRange,
};
use hal::{DeviceDriver, DriverError, InterruptHandler, IrqLine};
use ipc::{ConduitId, Message, Payload, INLINE_PAYLOAD_MAX};
use kernel_api::{
    BootInfo, Completion, Duration, ExitNotification, ExitReason, Instant, InvariantViolation,
    IpcMode, KernelApi, KernelError, PanicDiagnostic, QuantumDescriptor, Subsystem,
};
use std::collections::HashMap;

/// Kernel tuning
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub cores: usize,
    pub time_slice: Duration,
    pub aging_interval: Duration,
    pub correction_bound: i64,
    /// Per-direction conduit queue bound
    pub conduit_capacity: usize,
    /// Virtual time one timer tick represents
    pub tick_duration: Duration,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            cores: 1,
            time_slice: Duration::from_millis(10),
            aging_interval: Duration::from_millis(10),
            correction_bound: 3,
            conduit_capacity: 16,
            tick_duration: Duration::from_millis(1),
        }
    }
}

/// Lifecycle state of the kernel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelState {
    Boot,
    Initializing,
    Running,
    Panic(PanicDiagnostic),
    Shutdown,
}

/// Where a trap originated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapOrigin {
    User(QuantumId),
    Kernel,
}

/// A request from a running quantum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Syscall {
    Spawn(QuantumDescriptor),
    Yield,
    Map {
        range: VirtRange,
        perms: MemoryPerms,
        backing: BackingKind,
    },
    Unmap {
        region: RegionId,
    },
    ConduitCreate,
    ConduitConnect {
        conduit: ConduitId,
    },
    Send {
        conduit: ConduitId,
        tag: u32,
        bytes: Vec<u8>,
        mode: IpcMode,
        deadline: Option<Instant>,
    },
    Receive {
        conduit: ConduitId,
        mode: IpcMode,
        deadline: Option<Instant>,
    },
    Exit {
        reason: ExitReason,
    },
}

/// Successful outcome of a syscall
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyscallResult {
    Spawned(QuantumId),
    Yielded,
    Mapped(RegionId),
    Unmapped,
    ConduitCreated(ConduitId),
    Connected,
    Sent(Completion<()>),
    Received(Completion<Message>),
    Exited,
}

/// Everything that can enter the kernel from outside
#[derive(Debug)]
pub enum Trap {
    Syscall {
        caller: QuantumId,
        syscall: Syscall,
    },
    PageFault {
        origin: TrapOrigin,
        address: u64,
        access: AccessType,
    },
    TimerTick {
        core: CoreId,
        ticks: u64,
    },
    DeviceInterrupt {
        line: IrqLine,
    },
}

/// What dispatch did with a trap
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrapOutcome {
    Completed(SyscallResult),
    /// The quantum now running on the ticked core
    Scheduled(QuantumId),
    FaultHandled(FaultResolution),
    /// The faulting quantum was terminated
    QuantumFaulted(QuantumId),
    InterruptDelivered,
}

/// Value delivered to a woken quantum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WakeValue {
    /// A blocking send's message was consumed
    Sent,
    /// A blocking receive completed
    Received(Message),
}

/// Audit trail of dispatch-level activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    Initialized { cores: usize, frames: usize },
    QuantumSpawned { quantum: QuantumId },
    QuantumExited { quantum: QuantumId },
    PanicRaised { subsystem: Subsystem },
    ShutdownRequested,
}

/// The kernel core
pub struct Kernel {
    state: KernelState,
    config: KernelConfig,
    mem: MemoryManager,
    sched: Scheduler,
    conduits: ConduitManager,
    deadlines: DeadlineWheel,
    now: Instant,
    kernel_space: Option<AddressSpaceId>,
    /// Results for quanta woken out of a parked operation
    wake_results: HashMap<QuantumId, Result<WakeValue, KernelError>>,
    /// Terminated quanta whose sent messages are still in flight
    zombies: Vec<QuantumId>,
    exits: Vec<ExitNotification>,
    irq_handlers: HashMap<IrqLine, Box<dyn InterruptHandler>>,
    drivers: HashMap<IrqLine, Box<dyn DeviceDriver>>,
    events: Vec<DispatchEvent>,
}

impl Kernel {
    /// A kernel in the Boot state; nothing runs until [`Kernel::initialize`]
    pub fn new(config: KernelConfig) -> Self {
        let cores = config.cores.max(1);
        let sched = Scheduler::new(SchedulerConfig {
            core_count: cores,
            time_slice: config.time_slice,
            aging_interval: config.aging_interval,
            correction_bound: config.correction_bound,
        });
        let mem = MemoryManager::new(FrameAllocConfig {
            total_frames: 0,
            core_count: cores,
        });
        let conduits = ConduitManager::new(config.conduit_capacity);
        Self {
            state: KernelState::Boot,
            config,
            mem,
            sched,
            conduits,
            deadlines: DeadlineWheel::new(),
            now: Instant::ZERO,
            kernel_space: None,
            wake_results: HashMap::new(),
            zombies: Vec::new(),
            exits: Vec::new(),
            irq_handlers: HashMap::new(),
            drivers: HashMap::new(),
            events: Vec::new(),
        }
    }

    /// Sizes the allocators from the boot description and starts running
    pub fn initialize(&mut self, info: BootInfo) -> Result<(), KernelError> {
        if self.state != KernelState::Boot {
            return Err(KernelError::NotRunning);
        }
        self.state = KernelState::Initializing;
        let cores = self.config.cores.max(1);
        let frames = info.usable_frames();
        self.mem = MemoryManager::new(FrameAllocConfig {
            total_frames: frames,
            core_count: cores,
        });
        let kernel_space = self.mem.create_space(core_types::AbiTag::Native64);
        self.kernel_space = Some(kernel_space);
        for core in 0..cores {
            self.sched
                .install_idle(CoreId(core as u32), QuantumId::new(), kernel_space, self.now);
        }
        self.state = KernelState::Running;
        self.events.push(DispatchEvent::Initialized { cores, frames });
        Ok(())
    }

    /// Orderly teardown: every conduit closes, every parked quantum
    /// wakes with `ConduitClosed`, then nothing more runs
    pub fn shutdown(&mut self) -> Result<(), KernelError> {
        self.ensure_running()?;
        for conduit in self.conduits.conduit_ids() {
            let effects = self.conduits.close_conduit(conduit);
            self.apply_close_effects(effects);
        }
        self.state = KernelState::Shutdown;
        self.events.push(DispatchEvent::ShutdownRequested);
        Ok(())
    }

    // ---- trap routing ------------------------------------------------

    pub fn dispatch_trap(&mut self, trap: Trap) -> Result<TrapOutcome, KernelError> {
        match trap {
            Trap::Syscall { caller, syscall } => {
                let result = self.handle_syscall(caller, syscall)?;
                Ok(TrapOutcome::Completed(result))
            }
            Trap::PageFault {
                origin,
                address,
                access,
            } => self.handle_fault(origin, address, access),
            Trap::TimerTick { core, ticks } => self.handle_tick(core, ticks),
            Trap::DeviceInterrupt { line } => {
                self.ensure_running()?;
                if let Some(driver) = self.drivers.get_mut(&line) {
                    driver.interrupt(line);
                }
                if let Some(handler) = self.irq_handlers.get_mut(&line) {
                    handler.handle_interrupt(line);
                }
                Ok(TrapOutcome::InterruptDelivered)
            }
        }
    }

    fn handle_syscall(
        &mut self,
        caller: QuantumId,
        syscall: Syscall,
    ) -> Result<SyscallResult, KernelError> {
        match syscall {
            Syscall::Spawn(descriptor) => self.spawn(descriptor).map(SyscallResult::Spawned),
            Syscall::Yield => self.yield_now(caller).map(|_| SyscallResult::Yielded),
            Syscall::Map {
                range,
                perms,
                backing,
            } => self
                .map(caller, range, perms, backing)
                .map(SyscallResult::Mapped),
            Syscall::Unmap { region } => {
                self.unmap(caller, region).map(|_| SyscallResult::Unmapped)
            }
            Syscall::ConduitCreate => self.conduit_create().map(SyscallResult::ConduitCreated),
            Syscall::ConduitConnect { conduit } => self
                .conduit_connect(conduit, caller)
                .map(|_| SyscallResult::Connected),
            Syscall::Send {
                conduit,
                tag,
                bytes,
                mode,
                deadline,
            } => self
                .send(caller, conduit, tag, bytes, mode, deadline)
                .map(SyscallResult::Sent),
            Syscall::Receive {
                conduit,
                mode,
                deadline,
            } => self
                .receive(caller, conduit, mode, deadline)
                .map(SyscallResult::Received),
            Syscall::Exit { reason } => self.exit(caller, reason).map(|_| SyscallResult::Exited),
        }
    }

    fn handle_fault(
        &mut self,
        origin: TrapOrigin,
        address: u64,
        access: AccessType,
    ) -> Result<TrapOutcome, KernelError> {
        self.ensure_running()?;
        match origin {
            TrapOrigin::Kernel => {
                let space = match self.kernel_space {
                    Some(space) => space,
                    None => {
                        return Err(self.panic_with(InvariantViolation::new(
                            Subsystem::Dispatch,
                            "kernel fault before initialization",
                        )))
                    }
                };
                match self.mem.handle_page_fault(space, address, access, 0) {
                    Ok(resolution) => Ok(TrapOutcome::FaultHandled(resolution)),
                    // The kernel faulting on its own space is never
                    // recoverable, whatever the underlying error.
                    Err(err) => Err(self.panic_with(InvariantViolation::new(
                        Subsystem::Memory,
                        format!("unresolvable kernel fault at {:#x}: {}", address, err),
                    ))),
                }
            }
            TrapOrigin::User(quantum) => {
                let space = self
                    .sched
                    .space(quantum)
                    .ok_or(KernelError::NoSuchQuantum(quantum))?;
                let core = self
                    .sched
                    .home_core(quantum)
                    .map(|c| c.as_index())
                    .unwrap_or(0);
                match self.mem.handle_page_fault(space, address, access, core) {
                    Ok(resolution) => Ok(TrapOutcome::FaultHandled(resolution)),
                    Err(err) if err.is_fatal() => Err(self.escalate_memory(err)),
                    Err(err) => {
                        // Unresolvable user fault kills the quantum, not
                        // the kernel.
                        self.exit(quantum, ExitReason::Fault(err.to_string()))?;
                        Ok(TrapOutcome::QuantumFaulted(quantum))
                    }
                }
            }
        }
    }

    fn handle_tick(&mut self, core: CoreId, ticks: u64) -> Result<TrapOutcome, KernelError> {
        self.ensure_running()?;
        let delta = self.config.tick_duration.saturating_mul(ticks);
        self.now += delta;
        let now = self.now;
        for deadline in self.deadlines.expire(now) {
            self.handle_timeout(deadline);
        }
        let preempt = self.sched.tick(core, delta, now);
        if preempt || self.sched.current(core).is_none() {
            self.sched
                .select_next(core, now)
                .map_err(|violation| self.panic_with(violation))?;
        }
        self.try_reclaim();
        match self.sched.current(core) {
            Some(running) => Ok(TrapOutcome::Scheduled(running)),
            None => Err(self.panic_with(InvariantViolation::new(
                Subsystem::Scheduler,
                format!("nothing running on {} after selection", core),
            ))),
        }
    }

    fn handle_timeout(&mut self, deadline: Deadline) {
        let Deadline { quantum, conduit } = deadline;
        match self.conduits.cancel_wait(conduit, quantum) {
            Some(CancelledWait::ParkedSend(message)) => {
                self.release_undelivered(conduit, quantum, &message);
                self.wake_err(quantum, KernelError::Timeout);
            }
            Some(_) => self.wake_err(quantum, KernelError::Timeout),
            // The wait completed in the same tick; nothing to cancel.
            None => {}
        }
    }

    /// Releases the staging region of a message that will never arrive
    fn release_undelivered(&mut self, conduit: ConduitId, sender: QuantumId, message: &Message) {
        let Payload::Shared { region, .. } = message.payload else {
            return;
        };
        let receiver_space = self
            .conduits
            .side_of(conduit, sender)
            .ok()
            .and_then(|side| self.conduits.peer_of(conduit, side).ok())
            .and_then(|peer| match peer {
                PeerStatus::Bound(receiver) => self.sched.space(receiver),
                PeerStatus::Unbound => None,
            });
        if let Some(space) = receiver_space {
            // Best effort: the receiver may already be tearing down.
            let _ = self.mem.unmap(space, region);
        }
    }

    // ---- quantum lifecycle -------------------------------------------

    /// Spawns a quantum into an existing address space
    ///
    /// The space gains the new quantum's convention; permissions of
    /// every region in it resolve through the union of conventions.
    pub fn spawn_in(
        &mut self,
        descriptor: QuantumDescriptor,
        space: AddressSpaceId,
    ) -> Result<QuantumId, KernelError> {
        self.ensure_running()?;
        let abi = descriptor.abi;
        self.mem
            .retain_space(space, abi)
            .map_err(|e| self.escalate_memory(e))?;
        match self.spawn_in_space(descriptor, space) {
            Ok(id) => Ok(id),
            Err(err) => {
                // Drop the reference taken above, otherwise the space
                // can never reach zero references.
                let _ = self.mem.release_space(space, abi);
                Err(err)
            }
        }
    }

    fn spawn_in_space(
        &mut self,
        descriptor: QuantumDescriptor,
        space: AddressSpaceId,
    ) -> Result<QuantumId, KernelError> {
        let stack_pages = descriptor.stack_pages.max(1);
        let (_, stack_range) = self
            .mem
            .map_anywhere(
                space,
                stack_pages * core_types::PAGE_SIZE,
                MemoryPerms::read_write(),
                BackingKind::Anonymous,
            )
            .map_err(|e| self.escalate_memory(e))?;
        let context = AbiContext::initial(descriptor.abi, descriptor.entry, stack_range.end);
        let id = QuantumId::new();
        self.sched.admit(
            id,
            descriptor.name,
            context,
            descriptor.base_priority,
            space,
            self.now,
        );
        self.events.push(DispatchEvent::QuantumSpawned { quantum: id });
        Ok(id)
    }

    // ---- wake plumbing -----------------------------------------------

    fn park(&mut self, quantum: QuantumId, conduit: ConduitId, deadline: Option<Instant>) {
        self.sched.block(quantum, WaitReason::Ipc(conduit));
        if let Some(deadline) = deadline {
            self.deadlines.register(quantum, conduit, deadline);
        }
    }

    fn wake_ok(&mut self, quantum: QuantumId, value: WakeValue) {
        self.deadlines.cancel(quantum);
        self.sched.unblock(quantum, self.now);
        self.wake_results.insert(quantum, Ok(value));
    }

    fn wake_err(&mut self, quantum: QuantumId, err: KernelError) {
        self.deadlines.cancel(quantum);
        self.sched.unblock(quantum, self.now);
        self.wake_results.insert(quantum, Err(err));
    }

    /// Completes a parked receive on behalf of the woken receiver
    fn complete_parked_receive(&mut self, conduit: ConduitId, receiver: QuantumId) {
        match self.conduits.receive(conduit, receiver, IpcMode::NonBlocking) {
            Ok(ReceiveOutcome::Delivered {
                message,
                wake_sender,
            }) => {
                if let Some(sender) = wake_sender {
                    self.wake_ok(sender, WakeValue::Sent);
                }
                self.wake_ok(receiver, WakeValue::Received(message));
            }
            Ok(ReceiveOutcome::Parked) => {}
            Err(err) => self.wake_err(receiver, err),
        }
    }

    fn apply_close_effects(&mut self, effects: CloseEffects) {
        for (quantum, err) in effects.woken {
            self.wake_err(quantum, err);
        }
        // Discarded messages' staging regions lived in the closed
        // endpoint's space and die with it.
    }

    fn try_reclaim(&mut self) {
        let done: Vec<QuantumId> = self
            .zombies
            .iter()
            .copied()
            .filter(|q| !self.conduits.has_pending_from(*q))
            .collect();
        for quantum in done {
            self.sched.reclaim(quantum);
            self.zombies.retain(|z| *z != quantum);
        }
    }

    // ---- message construction ----------------------------------------

    /// Builds the payload: inline below the threshold, staged in a
    /// shared region mapped into the receiver's space above it
    fn build_message(
        &mut self,
        sender: QuantumId,
        receiver: QuantumId,
        tag: u32,
        bytes: Vec<u8>,
    ) -> Result<Message, KernelError> {
        if bytes.len() <= INLINE_PAYLOAD_MAX {
            return Ok(Message::inline(sender, tag, bytes));
        }
        let sender_space = self
            .sched
            .space(sender)
            .ok_or(KernelError::NoSuchQuantum(sender))?;
        let receiver_space = self
            .sched
            .space(receiver)
            .ok_or(KernelError::NoSuchQuantum(receiver))?;
        let len = bytes.len() as u64;
        let (staging, range) = self
            .mem
            .map_anywhere(
                sender_space,
                len,
                MemoryPerms::read_write(),
                BackingKind::Anonymous,
            )
            .map_err(|e| self.escalate_memory(e))?;
        self.mem
            .write_bytes(sender_space, range.start, &bytes)
            .map_err(|e| self.escalate_memory(e))?;
        let shared = self
            .mem
            .share_region(sender_space, staging, receiver_space)
            .map_err(|e| self.escalate_memory(e))?;
        // The sender's mapping was only scaffolding; the receiver holds
        // the surviving reference.
        self.mem
            .unmap(sender_space, staging)
            .map_err(|e| self.escalate_memory(e))?;
        Ok(Message::shared(sender, tag, shared, len))
    }

    /// Sends toward a bound peer, waking a parked receiver if present
    fn deliver(
        &mut self,
        conduit: ConduitId,
        sender: QuantumId,
        tag: u32,
        bytes: Vec<u8>,
        mode: IpcMode,
    ) -> Result<Completion<()>, KernelError> {
        let side = self.conduits.side_of(conduit, sender)?;
        let receiver = match self.conduits.peer_of(conduit, side)? {
            PeerStatus::Bound(receiver) => receiver,
            PeerStatus::Unbound => return Err(KernelError::WouldBlock),
        };
        let message = self.build_message(sender, receiver, tag, bytes)?;
        match self.conduits.enqueue(conduit, side, message, mode)? {
            EnqueueOutcome::Queued { wake_receiver } => {
                if let Some(receiver) = wake_receiver {
                    self.complete_parked_receive(conduit, receiver);
                }
                match mode {
                    IpcMode::NonBlocking => Ok(Completion::Ready(())),
                    IpcMode::Blocking => {
                        // If a parked receiver consumed the message just
                        // now, the send completes without parking.
                        match self.wake_results.remove(&sender) {
                            Some(Ok(_)) => Ok(Completion::Ready(())),
                            Some(Err(err)) => Err(err),
                            None => Ok(Completion::Blocked),
                        }
                    }
                }
            }
            EnqueueOutcome::ParkedFull => Ok(Completion::Blocked),
        }
    }

    fn replay_deferred(&mut self, conduit: ConduitId, deferred: DeferredSend) {
        let DeferredSend {
            sender,
            tag,
            bytes,
            deadline: _,
        } = deferred;
        match self.deliver(conduit, sender, tag, bytes, IpcMode::Blocking) {
            Ok(Completion::Ready(())) => self.wake_ok(sender, WakeValue::Sent),
            // Still waiting for consumption; the original deadline, if
            // any, remains registered.
            Ok(Completion::Blocked) => {}
            Err(err) => self.wake_err(sender, err),
        }
    }

    // ---- error escalation --------------------------------------------

    fn ensure_running(&self) -> Result<(), KernelError> {
        match &self.state {
            KernelState::Running => Ok(()),
            KernelState::Panic(diag) => Err(KernelError::Panicked(diag.clone())),
            _ => Err(KernelError::NotRunning),
        }
    }

    fn panic_with(&mut self, violation: InvariantViolation) -> KernelError {
        let diag = violation.into_diagnostic(self.now);
        self.state = KernelState::Panic(diag.clone());
        self.events.push(DispatchEvent::PanicRaised {
            subsystem: diag.subsystem,
        });
        KernelError::Panicked(diag)
    }

    /// Recoverable memory errors pass through; fatal ones halt dispatch
    fn escalate_memory(&mut self, err: MemoryError) -> KernelError {
        if err.is_fatal() {
            self.panic_with(InvariantViolation::new(Subsystem::Memory, err.to_string()))
        } else {
            KernelError::Memory(err)
        }
    }

    // ---- introspection -----------------------------------------------

    pub fn state(&self) -> &KernelState {
        &self.state
    }

    pub fn panic_diagnostic(&self) -> Option<&PanicDiagnostic> {
        match &self.state {
            KernelState::Panic(diag) => Some(diag),
            _ => None,
        }
    }

    pub fn now(&self) -> Instant {
        self.now
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.mem
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager {
        &mut self.mem
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.sched
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.sched
    }

    pub fn conduits(&self) -> &ConduitManager {
        &self.conduits
    }

    pub fn kernel_space(&self) -> Option<AddressSpaceId> {
        self.kernel_space
    }

    /// Takes the stored result of a completed parked operation
    pub fn take_wake_result(
        &mut self,
        quantum: QuantumId,
    ) -> Option<Result<WakeValue, KernelError>> {
        self.wake_results.remove(&quantum)
    }

    /// Drains accumulated exit notifications
    pub fn take_exit_notifications(&mut self) -> Vec<ExitNotification> {
        std::mem::take(&mut self.exits)
    }

    pub fn register_interrupt(&mut self, line: IrqLine, handler: Box<dyn InterruptHandler>) {
        self.irq_handlers.insert(line, handler);
    }

    /// Probes and attaches a driver, then routes its line's interrupts
    /// to it
    pub fn attach_driver(
        &mut self,
        line: IrqLine,
        mut driver: Box<dyn DeviceDriver>,
    ) -> Result<(), DriverError> {
        driver.probe()?;
        driver.attach()?;
        self.drivers.insert(line, driver);
        Ok(())
    }

    pub fn events(&self) -> &[DispatchEvent] {
        &self.events
    }

    pub fn has_event(&self, predicate: impl Fn(&DispatchEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }
}

impl KernelApi for Kernel {
    fn spawn(&mut self, descriptor: QuantumDescriptor) -> Result<QuantumId, KernelError> {
        self.ensure_running()?;
        let abi = descriptor.abi;
        let space = self.mem.create_space(abi);
        match self.spawn_in_space(descriptor, space) {
            Ok(id) => Ok(id),
            Err(err) => {
                // The fresh space has no other users; tear it down
                // instead of leaking it.
                let _ = self.mem.release_space(space, abi);
                Err(err)
            }
        }
    }

    fn yield_now(&mut self, caller: QuantumId) -> Result<(), KernelError> {
        self.ensure_running()?;
        let core = self
            .sched
            .home_core(caller)
            .ok_or(KernelError::NoSuchQuantum(caller))?;
        if self.sched.current(core) == Some(caller) {
            self.sched
                .select_next(core, self.now)
                .map_err(|violation| self.panic_with(violation))?;
        }
        Ok(())
    }

    fn map(
        &mut self,
        caller: QuantumId,
        range: VirtRange,
        perms: MemoryPerms,
        backing: BackingKind,
    ) -> Result<RegionId, KernelError> {
        self.ensure_running()?;
        let space = self
            .sched
            .space(caller)
            .ok_or(KernelError::NoSuchQuantum(caller))?;
        self.mem
            .map(space, range, perms, backing)
            .map_err(|e| self.escalate_memory(e))
    }

    fn unmap(&mut self, caller: QuantumId, region: RegionId) -> Result<(), KernelError> {
        self.ensure_running()?;
        let space = self
            .sched
            .space(caller)
            .ok_or(KernelError::NoSuchQuantum(caller))?;
        self.mem
            .unmap(space, region)
            .map_err(|e| self.escalate_memory(e))
    }

    fn conduit_create(&mut self) -> Result<ConduitId, KernelError> {
        self.ensure_running()?;
        Ok(self.conduits.create())
    }

    fn conduit_connect(
        &mut self,
        conduit: ConduitId,
        quantum: QuantumId,
    ) -> Result<(), KernelError> {
        self.ensure_running()?;
        if !self.sched.contains(quantum) {
            return Err(KernelError::NoSuchQuantum(quantum));
        }
        let replays = self.conduits.connect(conduit, quantum)?;
        for deferred in replays {
            self.replay_deferred(conduit, deferred);
        }
        Ok(())
    }

    fn send(
        &mut self,
        caller: QuantumId,
        conduit: ConduitId,
        tag: u32,
        bytes: Vec<u8>,
        mode: IpcMode,
        deadline: Option<Instant>,
    ) -> Result<Completion<()>, KernelError> {
        self.ensure_running()?;
        let side = self.conduits.side_of(conduit, caller)?;
        match self.conduits.peer_of(conduit, side)? {
            PeerStatus::Unbound => match mode {
                IpcMode::NonBlocking => Err(KernelError::WouldBlock),
                IpcMode::Blocking => {
                    self.conduits.defer_send(
                        conduit,
                        DeferredSend {
                            sender: caller,
                            tag,
                            bytes,
                            deadline,
                        },
                    )?;
                    self.park(caller, conduit, deadline);
                    Ok(Completion::Blocked)
                }
            },
            PeerStatus::Bound(_) => {
                let completion = self.deliver(conduit, caller, tag, bytes, mode)?;
                if completion.is_blocked() {
                    self.park(caller, conduit, deadline);
                }
                Ok(completion)
            }
        }
    }

    fn receive(
        &mut self,
        caller: QuantumId,
        conduit: ConduitId,
        mode: IpcMode,
        deadline: Option<Instant>,
    ) -> Result<Completion<Message>, KernelError> {
        self.ensure_running()?;
        match self.conduits.receive(conduit, caller, mode)? {
            ReceiveOutcome::Delivered {
                message,
                wake_sender,
            } => {
                if let Some(sender) = wake_sender {
                    self.wake_ok(sender, WakeValue::Sent);
                }
                self.try_reclaim();
                Ok(Completion::Ready(message))
            }
            ReceiveOutcome::Parked => {
                self.park(caller, conduit, deadline);
                Ok(Completion::Blocked)
            }
        }
    }

    fn exit(&mut self, caller: QuantumId, reason: ExitReason) -> Result<(), KernelError> {
        self.ensure_running()?;
        let space = self
            .sched
            .space(caller)
            .ok_or(KernelError::NoSuchQuantum(caller))?;
        let abi = self
            .sched
            .abi(caller)
            .ok_or(KernelError::NoSuchQuantum(caller))?;
        if !self.sched.terminate(caller) {
            return Err(KernelError::NoSuchQuantum(caller));
        }
        self.deadlines.cancel(caller);
        for (_, effects) in self.conduits.close_all_for(caller) {
            self.apply_close_effects(effects);
        }
        self.mem
            .release_space(space, abi)
            .map_err(|e| self.escalate_memory(e))?;
        self.exits.push(ExitNotification {
            quantum: caller,
            reason,
            timestamp: self.now,
        });
        self.events.push(DispatchEvent::QuantumExited { quantum: caller });
        self.zombies.push(caller);
        self.try_reclaim();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{AbiTag, PAGE_SIZE};

    fn running_kernel() -> Kernel {
        let mut kernel = Kernel::new(KernelConfig::default());
        kernel
            .initialize(BootInfo::with_usable_bytes(256 * PAGE_SIZE))
            .unwrap();
        kernel
    }

    fn spawn(kernel: &mut Kernel, name: &str) -> QuantumId {
        kernel
            .spawn(QuantumDescriptor::new(name, 0x40_0000, AbiTag::Native64))
            .unwrap()
    }

    #[test]
    fn test_boot_to_running() {
        let mut kernel = Kernel::new(KernelConfig::default());
        assert_eq!(*kernel.state(), KernelState::Boot);
        assert!(matches!(
            kernel.conduit_create().unwrap_err(),
            KernelError::NotRunning
        ));
        kernel
            .initialize(BootInfo::with_usable_bytes(64 * PAGE_SIZE))
            .unwrap();
        assert_eq!(*kernel.state(), KernelState::Running);
        // A second initialize is rejected.
        assert!(kernel
            .initialize(BootInfo::with_usable_bytes(64 * PAGE_SIZE))
            .is_err());
    }

    #[test]
    fn test_spawn_creates_ready_quantum_with_stack() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "init");
        assert_eq!(
            kernel.scheduler().state(q),
            Some(crate::scheduler::QuantumState::Ready)
        );
        let context = kernel.scheduler().context(q).unwrap();
        assert_eq!(context.program_counter(), 0x40_0000);
        assert_ne!(context.stack_pointer(), 0);
        let space = kernel.scheduler().space(q).unwrap();
        assert!(kernel.memory().space_exists(space));
    }

    #[test]
    fn test_spawn_in_shares_the_space() {
        let mut kernel = running_kernel();
        let first = spawn(&mut kernel, "main");
        let space = kernel.scheduler().space(first).unwrap();
        let second = kernel
            .spawn_in(
                QuantumDescriptor::new("worker", 0x40_1000, AbiTag::Native64),
                space,
            )
            .unwrap();
        assert_eq!(kernel.scheduler().space(second), Some(space));
    }

    #[test]
    fn test_failed_spawn_tears_down_fresh_space() {
        let mut kernel = running_kernel();
        let spaces_before = kernel.memory().stats().spaces;
        // A stack too large for any layout makes the spawn fail after
        // the space was created.
        let giant = QuantumDescriptor::new("giant", 0, AbiTag::Native64)
            .with_stack_pages(1 << 36);
        let err = kernel.spawn(giant).unwrap_err();
        assert!(matches!(
            err,
            KernelError::Memory(MemoryError::OutOfAddressSpace { .. })
        ));
        assert_eq!(kernel.memory().stats().spaces, spaces_before);
        assert_eq!(*kernel.state(), KernelState::Running);
    }

    #[test]
    fn test_failed_spawn_in_drops_its_reference() {
        let mut kernel = running_kernel();
        let first = spawn(&mut kernel, "main");
        let space = kernel.scheduler().space(first).unwrap();
        let giant = QuantumDescriptor::new("giant", 0, AbiTag::Native64)
            .with_stack_pages(1 << 36);
        assert!(kernel.spawn_in(giant, space).is_err());
        // The failed spawn holds no reference: exiting the only quantum
        // still destroys the space.
        kernel.exit(first, ExitReason::Normal).unwrap();
        assert!(!kernel.memory().space_exists(space));
    }

    #[test]
    fn test_syscall_trap_routes() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "caller");
        let outcome = kernel
            .dispatch_trap(Trap::Syscall {
                caller: q,
                syscall: Syscall::ConduitCreate,
            })
            .unwrap();
        assert!(matches!(
            outcome,
            TrapOutcome::Completed(SyscallResult::ConduitCreated(_))
        ));
    }

    #[test]
    fn test_double_unmap_panics_the_kernel() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "bad");
        let region = kernel
            .map(
                q,
                VirtRange::from_span(0x10_0000, PAGE_SIZE),
                MemoryPerms::read_write(),
                BackingKind::Anonymous,
            )
            .unwrap();
        kernel.unmap(q, region).unwrap();
        let err = kernel.unmap(q, region).unwrap_err();
        assert!(matches!(err, KernelError::Panicked(_)));
        assert!(matches!(kernel.state(), KernelState::Panic(_)));
        let diag = kernel.panic_diagnostic().unwrap();
        assert_eq!(diag.subsystem, Subsystem::Memory);
        // Nothing runs after a panic.
        assert!(matches!(
            kernel.conduit_create().unwrap_err(),
            KernelError::Panicked(_)
        ));
    }

    #[test]
    fn test_user_segfault_kills_quantum_not_kernel() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "wild");
        let outcome = kernel
            .dispatch_trap(Trap::PageFault {
                origin: TrapOrigin::User(q),
                address: 0xdead_0000,
                access: AccessType::Write,
            })
            .unwrap();
        assert_eq!(outcome, TrapOutcome::QuantumFaulted(q));
        assert_eq!(*kernel.state(), KernelState::Running);
        let exits = kernel.take_exit_notifications();
        assert_eq!(exits.len(), 1);
        assert!(matches!(exits[0].reason, ExitReason::Fault(_)));
    }

    #[test]
    fn test_kernel_fault_panics() {
        let mut kernel = running_kernel();
        let err = kernel
            .dispatch_trap(Trap::PageFault {
                origin: TrapOrigin::Kernel,
                address: 0xffff_f000,
                access: AccessType::Read,
            })
            .unwrap_err();
        assert!(matches!(err, KernelError::Panicked(_)));
        assert!(matches!(kernel.state(), KernelState::Panic(_)));
    }

    #[test]
    fn test_timer_tick_advances_time_and_schedules() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "work");
        let outcome = kernel
            .dispatch_trap(Trap::TimerTick {
                core: CoreId(0),
                ticks: 3,
            })
            .unwrap();
        assert_eq!(kernel.now(), Instant::ZERO + Duration::from_millis(3));
        assert_eq!(outcome, TrapOutcome::Scheduled(q));
    }

    #[test]
    fn test_idle_scheduled_with_no_work() {
        let mut kernel = running_kernel();
        let outcome = kernel
            .dispatch_trap(Trap::TimerTick {
                core: CoreId(0),
                ticks: 1,
            })
            .unwrap();
        match outcome {
            TrapOutcome::Scheduled(q) => assert!(kernel.scheduler().is_idle(q)),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn test_device_interrupt_routed_to_handler() {
        use std::cell::RefCell;
        use std::rc::Rc;

        struct Recorder(Rc<RefCell<Vec<IrqLine>>>);
        impl InterruptHandler for Recorder {
            fn handle_interrupt(&mut self, line: IrqLine) {
                self.0.borrow_mut().push(line);
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut kernel = running_kernel();
        kernel.register_interrupt(IrqLine(4), Box::new(Recorder(seen.clone())));
        kernel
            .dispatch_trap(Trap::DeviceInterrupt { line: IrqLine(4) })
            .unwrap();
        kernel
            .dispatch_trap(Trap::DeviceInterrupt { line: IrqLine(9) })
            .unwrap();
        assert_eq!(*seen.borrow(), vec![IrqLine(4)]);
    }

    #[test]
    fn test_attached_driver_services_its_line() {
        use std::cell::RefCell;
        use std::rc::Rc;

        #[derive(Default)]
        struct Log {
            attached: bool,
            interrupts: u32,
        }

        struct FakeDisk {
            log: Rc<RefCell<Log>>,
            present: bool,
        }
        impl DeviceDriver for FakeDisk {
            fn name(&self) -> &str {
                "fake-disk"
            }
            fn probe(&mut self) -> Result<(), DriverError> {
                if self.present {
                    Ok(())
                } else {
                    Err(DriverError::NotPresent)
                }
            }
            fn attach(&mut self) -> Result<(), DriverError> {
                self.log.borrow_mut().attached = true;
                Ok(())
            }
            fn interrupt(&mut self, _line: IrqLine) {
                self.log.borrow_mut().interrupts += 1;
            }
            fn read(&mut self, _buf: &mut [u8]) -> Result<usize, DriverError> {
                Ok(0)
            }
            fn write(&mut self, buf: &[u8]) -> Result<usize, DriverError> {
                Ok(buf.len())
            }
        }

        let mut kernel = running_kernel();
        let log = Rc::new(RefCell::new(Log::default()));

        // A failed probe never attaches.
        let absent = FakeDisk {
            log: log.clone(),
            present: false,
        };
        assert_eq!(
            kernel.attach_driver(IrqLine(14), Box::new(absent)),
            Err(DriverError::NotPresent)
        );
        assert!(!log.borrow().attached);

        let disk = FakeDisk {
            log: log.clone(),
            present: true,
        };
        kernel.attach_driver(IrqLine(14), Box::new(disk)).unwrap();
        assert!(log.borrow().attached);
        kernel
            .dispatch_trap(Trap::DeviceInterrupt { line: IrqLine(14) })
            .unwrap();
        assert_eq!(log.borrow().interrupts, 1);
    }

    #[test]
    fn test_exit_releases_space_and_notifies() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "done");
        let space = kernel.scheduler().space(q).unwrap();
        kernel.exit(q, ExitReason::Normal).unwrap();
        assert!(!kernel.memory().space_exists(space));
        assert!(!kernel.scheduler().contains(q));
        let exits = kernel.take_exit_notifications();
        assert_eq!(exits[0].quantum, q);
        assert_eq!(exits[0].reason, ExitReason::Normal);
    }

    #[test]
    fn test_shutdown_stops_everything() {
        let mut kernel = running_kernel();
        spawn(&mut kernel, "leftover");
        kernel.shutdown().unwrap();
        assert_eq!(*kernel.state(), KernelState::Shutdown);
        assert!(matches!(
            kernel.conduit_create().unwrap_err(),
            KernelError::NotRunning
        ));
    }

    #[test]
    fn test_send_to_unknown_conduit_is_orphaned() {
        let mut kernel = running_kernel();
        let q = spawn(&mut kernel, "lost");
        let err = kernel
            .send(
                q,
                ConduitId::new(),
                0,
                vec![1],
                IpcMode::NonBlocking,
                None,
            )
            .unwrap_err();
        assert!(matches!(err, KernelError::ConduitOrphaned(_)));
    }
}

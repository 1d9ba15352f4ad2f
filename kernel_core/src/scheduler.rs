//! Scheduler
//!
//! Multi-level feedback with aging. Every quantum has a base priority in
//! 0..=31; its effective priority is the base scaled into bands plus a
//! monotonic wait bonus plus a bounded correction term from a pluggable
//! adjuster. Ties inside a band resolve FIFO by admission sequence, so
//! two equal quanta alternate instead of starving each other.
//!
//! Selection never fails: each core owns an idle quantum that is always
//! runnable and always sorts last.

use core_types::{AbiContext, AbiTag, AddressSpaceId, QuantumId};
use ipc::ConduitId;
use kernel_api::{Duration, Instant, InvariantViolation, Subsystem};
use std::collections::HashMap;
use std::fmt;

/// Width of one priority band
///
/// The wait bonus and correction term move a quantum inside its band;
/// only long waits promote it past a higher base priority.
const BAND_SCALE: i64 = 8;

/// Hard ceiling on the correction term, regardless of configuration
///
/// Opposed corrections on adjacent bands spread at most twice this, so
/// the ceiling stays strictly under half a band: no pair of in-bounds
/// corrections can make a lower base priority outrank a higher one.
const CORRECTION_CEILING: i64 = (BAND_SCALE - 1) / 2;

/// A logical processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CoreId(pub u32);

impl CoreId {
    pub fn as_index(&self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "core{}", self.0)
    }
}

/// Why a blocked quantum is waiting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    /// Parked on a conduit send or receive
    Ipc(ConduitId),
    /// Sleeping until a deadline
    Timer,
    /// Waiting for memory or another kernel resource
    Resource,
}

/// Lifecycle state of a quantum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantumState {
    Ready,
    Running,
    Blocked(WaitReason),
    /// Finished; kept until the kernel reclaims it
    Terminated,
}

/// Scheduler-side record of a quantum
#[derive(Debug)]
struct Quantum {
    id: QuantumId,
    name: String,
    abi: AbiTag,
    context: AbiContext,
    base_priority: u8,
    state: QuantumState,
    space: AddressSpaceId,
    home_core: CoreId,
    /// Admission order, refreshed on every requeue; breaks priority ties
    seq: u64,
    /// When the quantum last became Ready; drives the wait bonus
    ready_since: Instant,
    is_idle: bool,
}

/// Pluggable correction term for effective priority
///
/// The returned value is clamped so no adjuster can push a quantum out
/// of the neighborhood of its band or starve another.
pub trait PriorityAdjuster {
    fn adjust(&self, quantum: QuantumId, base_priority: u8, waited: Duration) -> i64;
}

/// The default adjuster: no correction
pub struct NoAdjustment;

impl PriorityAdjuster for NoAdjustment {
    fn adjust(&self, _quantum: QuantumId, _base_priority: u8, _waited: Duration) -> i64 {
        0
    }
}

/// Scheduler tuning
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub core_count: usize,
    /// Budget a quantum may run before preemption
    pub time_slice: Duration,
    /// Wait time that earns one point of effective priority
    pub aging_interval: Duration,
    /// Configured bound on the correction term, capped below half a band
    pub correction_bound: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            core_count: 1,
            time_slice: Duration::from_millis(10),
            aging_interval: Duration::from_millis(10),
            correction_bound: CORRECTION_CEILING,
        }
    }
}

#[derive(Debug)]
struct CoreState {
    current: Option<QuantumId>,
    idle: Option<QuantumId>,
    slice_used: Duration,
}

/// Audit trail of scheduling decisions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEvent {
    Admitted {
        quantum: QuantumId,
        core: CoreId,
        base_priority: u8,
    },
    Selected {
        core: CoreId,
        quantum: QuantumId,
    },
    Preempted {
        core: CoreId,
        quantum: QuantumId,
    },
    Blocked {
        quantum: QuantumId,
    },
    Unblocked {
        quantum: QuantumId,
    },
    Terminated {
        quantum: QuantumId,
    },
    Reclaimed {
        quantum: QuantumId,
    },
}

/// The scheduler
pub struct Scheduler {
    quanta: HashMap<QuantumId, Quantum>,
    cores: Vec<CoreState>,
    config: SchedulerConfig,
    adjuster: Box<dyn PriorityAdjuster>,
    next_seq: u64,
    next_core: usize,
    events: Vec<ScheduleEvent>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("quanta", &self.quanta.len())
            .field("cores", &self.cores.len())
            .finish()
    }
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let core_count = config.core_count.max(1);
        let cores = (0..core_count)
            .map(|_| CoreState {
                current: None,
                idle: None,
                slice_used: Duration::ZERO,
            })
            .collect();
        Self {
            quanta: HashMap::new(),
            cores,
            config,
            adjuster: Box::new(NoAdjustment),
            next_seq: 0,
            next_core: 0,
            events: Vec::new(),
        }
    }

    /// Installs a correction adjuster, replacing the default
    pub fn set_adjuster(&mut self, adjuster: Box<dyn PriorityAdjuster>) {
        self.adjuster = adjuster;
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    // ---- admission ---------------------------------------------------

    /// Admits a quantum as Ready on the least recently used core
    pub fn admit(
        &mut self,
        id: QuantumId,
        name: String,
        context: AbiContext,
        base_priority: u8,
        space: AddressSpaceId,
        now: Instant,
    ) -> CoreId {
        let core = CoreId(self.next_core as u32);
        self.next_core = (self.next_core + 1) % self.cores.len();
        let base_priority = base_priority.min(31);
        self.insert_quantum(id, name, context, base_priority, space, core, now, false);
        self.events.push(ScheduleEvent::Admitted {
            quantum: id,
            core,
            base_priority,
        });
        core
    }

    /// Installs the idle quantum for a core
    ///
    /// Idle quanta sort below everything else and are never preempted by
    /// the slice budget; they run only when nothing else is Ready.
    pub fn install_idle(
        &mut self,
        core: CoreId,
        id: QuantumId,
        space: AddressSpaceId,
        now: Instant,
    ) {
        self.insert_quantum(
            id,
            format!("idle/{}", core),
            AbiContext::initial(AbiTag::Native64, 0, 0),
            0,
            space,
            core,
            now,
            true,
        );
        self.cores[core.as_index()].idle = Some(id);
    }

    #[allow(clippy::too_many_arguments)]
    fn insert_quantum(
        &mut self,
        id: QuantumId,
        name: String,
        context: AbiContext,
        base_priority: u8,
        space: AddressSpaceId,
        home_core: CoreId,
        now: Instant,
        is_idle: bool,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.quanta.insert(
            id,
            Quantum {
                id,
                name,
                abi: context.tag(),
                context,
                base_priority,
                state: QuantumState::Ready,
                space,
                home_core,
                seq,
                ready_since: now,
                is_idle,
            },
        );
    }

    // ---- priority ----------------------------------------------------

    /// Effective priority of a quantum at `now`
    ///
    /// `base * BAND_SCALE + wait_bonus + clamped_correction`. The wait
    /// bonus is monotonic in time spent Ready, so starvation is bounded:
    /// any waiting quantum eventually outranks any base priority.
    pub fn effective_priority(&self, id: QuantumId, now: Instant) -> Option<i64> {
        let quantum = self.quanta.get(&id)?;
        if quantum.is_idle {
            return Some(i64::MIN);
        }
        // The bonus accrues only while Ready; running or blocked quanta
        // are not waiting for the processor.
        let waited = match quantum.state {
            QuantumState::Ready => now.duration_since(quantum.ready_since),
            _ => Duration::ZERO,
        };
        let bonus = waited.div_duration(self.config.aging_interval) as i64;
        let bound = self.config.correction_bound.min(CORRECTION_CEILING).max(0);
        let correction = self
            .adjuster
            .adjust(id, quantum.base_priority, waited)
            .clamp(-bound, bound);
        Some(quantum.base_priority as i64 * BAND_SCALE + bonus + correction)
    }

    // ---- selection ---------------------------------------------------

    /// Picks the next quantum to run on a core
    ///
    /// The previous occupant, if still Running, is requeued behind its
    /// band. Always yields a quantum; with nothing Ready the core's idle
    /// quantum runs. A context whose tag disagrees with the quantum's
    /// admitted convention is corrupt state and halts the kernel.
    pub fn select_next(
        &mut self,
        core: CoreId,
        now: Instant,
    ) -> Result<QuantumId, InvariantViolation> {
        let index = core.as_index();
        if let Some(previous) = self.cores[index].current.take() {
            if let Some(quantum) = self.quanta.get_mut(&previous) {
                if quantum.state == QuantumState::Running {
                    quantum.state = QuantumState::Ready;
                    quantum.ready_since = now;
                    quantum.seq = self.next_seq;
                    self.next_seq += 1;
                }
            }
        }

        let mut best: Option<(i64, u64, QuantumId)> = None;
        for quantum in self.quanta.values() {
            if quantum.home_core != core || quantum.state != QuantumState::Ready {
                continue;
            }
            let effective = match self.effective_priority(quantum.id, now) {
                Some(value) => value,
                None => continue,
            };
            let candidate = (effective, quantum.seq, quantum.id);
            best = match best {
                None => Some(candidate),
                // Higher effective wins; equal effective goes to the
                // earlier admission (FIFO within the band).
                Some(current) if effective > current.0 => Some(candidate),
                Some(current) if effective == current.0 && quantum.seq < current.1 => {
                    Some(candidate)
                }
                Some(current) => Some(current),
            };
        }

        let chosen = match best.map(|(_, _, id)| id) {
            Some(id) => id,
            None => self.cores[index].idle.ok_or_else(|| {
                InvariantViolation::new(
                    Subsystem::Scheduler,
                    format!("no runnable quantum and no idle on {}", core),
                )
            })?,
        };

        let quantum = self.quanta.get_mut(&chosen).ok_or_else(|| {
            InvariantViolation::new(Subsystem::Scheduler, "selected quantum disappeared")
        })?;
        if quantum.context.tag() != quantum.abi {
            return Err(InvariantViolation::new(
                Subsystem::Scheduler,
                format!("corrupted quantum {}: context tag mismatch", chosen),
            ));
        }
        quantum.state = QuantumState::Running;
        self.cores[index].current = Some(chosen);
        self.cores[index].slice_used = Duration::ZERO;
        self.events.push(ScheduleEvent::Selected {
            core,
            quantum: chosen,
        });
        Ok(chosen)
    }

    /// Charges run time to the current occupant of a core
    ///
    /// Returns true when the occupant should be preempted: slice budget
    /// spent, or a strictly higher-priority quantum became Ready.
    pub fn tick(&mut self, core: CoreId, delta: Duration, now: Instant) -> bool {
        let index = core.as_index();
        self.cores[index].slice_used += delta;
        let current = match self.cores[index].current {
            Some(id) => id,
            None => return true,
        };
        let current_idle = self
            .quanta
            .get(&current)
            .map(|q| q.is_idle)
            .unwrap_or(false);
        if !current_idle && self.cores[index].slice_used >= self.config.time_slice {
            self.events.push(ScheduleEvent::Preempted {
                core,
                quantum: current,
            });
            return true;
        }
        let current_effective = match self.effective_priority(current, now) {
            Some(value) => value,
            None => return true,
        };
        let outranked = self.quanta.values().any(|quantum| {
            quantum.home_core == core
                && quantum.state == QuantumState::Ready
                && self
                    .effective_priority(quantum.id, now)
                    .map(|e| e > current_effective)
                    .unwrap_or(false)
        });
        if outranked {
            self.events.push(ScheduleEvent::Preempted {
                core,
                quantum: current,
            });
        }
        outranked
    }

    // ---- state transitions -------------------------------------------

    /// Parks a quantum; it leaves the run queue until unblocked
    pub fn block(&mut self, id: QuantumId, reason: WaitReason) -> bool {
        let Some(quantum) = self.quanta.get_mut(&id) else {
            return false;
        };
        if matches!(quantum.state, QuantumState::Terminated) || quantum.is_idle {
            return false;
        }
        quantum.state = QuantumState::Blocked(reason);
        for core in &mut self.cores {
            if core.current == Some(id) {
                core.current = None;
            }
        }
        self.events.push(ScheduleEvent::Blocked { quantum: id });
        true
    }

    /// Makes a blocked quantum Ready again; idempotent
    pub fn unblock(&mut self, id: QuantumId, now: Instant) -> bool {
        let Some(quantum) = self.quanta.get_mut(&id) else {
            return false;
        };
        if !matches!(quantum.state, QuantumState::Blocked(_)) {
            return false;
        }
        quantum.state = QuantumState::Ready;
        quantum.ready_since = now;
        quantum.seq = self.next_seq;
        self.next_seq += 1;
        self.events.push(ScheduleEvent::Unblocked { quantum: id });
        true
    }

    /// Marks a quantum Terminated; it stays until reclaimed
    pub fn terminate(&mut self, id: QuantumId) -> bool {
        let Some(quantum) = self.quanta.get_mut(&id) else {
            return false;
        };
        if quantum.is_idle || quantum.state == QuantumState::Terminated {
            return false;
        }
        quantum.state = QuantumState::Terminated;
        for core in &mut self.cores {
            if core.current == Some(id) {
                core.current = None;
            }
        }
        self.events.push(ScheduleEvent::Terminated { quantum: id });
        true
    }

    /// Drops a Terminated quantum's record entirely
    pub fn reclaim(&mut self, id: QuantumId) -> bool {
        let terminated = self
            .quanta
            .get(&id)
            .map(|q| q.state == QuantumState::Terminated)
            .unwrap_or(false);
        if terminated {
            self.quanta.remove(&id);
            self.events.push(ScheduleEvent::Reclaimed { quantum: id });
        }
        terminated
    }

    // ---- context access ----------------------------------------------

    /// Saved context of a quantum
    pub fn context(&self, id: QuantumId) -> Option<&AbiContext> {
        self.quanta.get(&id).map(|q| &q.context)
    }

    /// Replaces a quantum's saved context
    ///
    /// Changing the ABI tag of a live quantum is impossible by
    /// construction; a context with a different tag is corrupt.
    pub fn set_context(
        &mut self,
        id: QuantumId,
        context: AbiContext,
    ) -> Result<(), InvariantViolation> {
        let quantum = self.quanta.get_mut(&id).ok_or_else(|| {
            InvariantViolation::new(Subsystem::Scheduler, format!("no such quantum {}", id))
        })?;
        if context.tag() != quantum.abi {
            return Err(InvariantViolation::new(
                Subsystem::Scheduler,
                format!(
                    "invalid tag transition for {}: {} to {}",
                    id,
                    quantum.abi,
                    context.tag()
                ),
            ));
        }
        quantum.context = context;
        Ok(())
    }

    // ---- introspection -----------------------------------------------

    pub fn state(&self, id: QuantumId) -> Option<QuantumState> {
        self.quanta.get(&id).map(|q| q.state)
    }

    pub fn abi(&self, id: QuantumId) -> Option<AbiTag> {
        self.quanta.get(&id).map(|q| q.abi)
    }

    pub fn space(&self, id: QuantumId) -> Option<AddressSpaceId> {
        self.quanta.get(&id).map(|q| q.space)
    }

    pub fn name(&self, id: QuantumId) -> Option<&str> {
        self.quanta.get(&id).map(|q| q.name.as_str())
    }

    pub fn home_core(&self, id: QuantumId) -> Option<CoreId> {
        self.quanta.get(&id).map(|q| q.home_core)
    }

    pub fn current(&self, core: CoreId) -> Option<QuantumId> {
        self.cores.get(core.as_index()).and_then(|c| c.current)
    }

    pub fn is_idle(&self, id: QuantumId) -> bool {
        self.quanta.get(&id).map(|q| q.is_idle).unwrap_or(false)
    }

    pub fn quantum_count(&self) -> usize {
        self.quanta.len()
    }

    pub fn contains(&self, id: QuantumId) -> bool {
        self.quanta.contains_key(&id)
    }

    pub fn events(&self) -> &[ScheduleEvent] {
        &self.events
    }

    pub fn has_event(&self, predicate: impl Fn(&ScheduleEvent) -> bool) -> bool {
        self.events.iter().any(predicate)
    }

    pub fn count_events(&self, predicate: impl Fn(&ScheduleEvent) -> bool) -> usize {
        self.events.iter().filter(|e| predicate(e)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scheduler() -> Scheduler {
        Scheduler::new(SchedulerConfig::default())
    }

    fn admit(sched: &mut Scheduler, priority: u8, now: Instant) -> QuantumId {
        let id = QuantumId::new();
        sched.admit(
            id,
            format!("q{}", priority),
            AbiContext::initial(AbiTag::Native64, 0x1000, 0x8000),
            priority,
            AddressSpaceId::new(),
            now,
        );
        id
    }

    fn install_idle(sched: &mut Scheduler, core: CoreId) -> QuantumId {
        let id = QuantumId::new();
        sched.install_idle(core, id, AddressSpaceId::new(), Instant::ZERO);
        id
    }

    #[test]
    fn test_selects_highest_base_priority() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let low = admit(&mut sched, 4, now);
        let high = admit(&mut sched, 20, now);
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), high);
        assert_eq!(sched.state(high), Some(QuantumState::Running));
        assert_eq!(sched.state(low), Some(QuantumState::Ready));
    }

    #[test]
    fn test_equal_priority_is_fifo() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let first = admit(&mut sched, 10, now);
        let second = admit(&mut sched, 10, now);
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), first);
        // Requeue puts first behind second.
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), second);
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), first);
    }

    #[test]
    fn test_aging_promotes_waiting_quantum() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let low = admit(&mut sched, 10, now);
        let high = admit(&mut sched, 11, now);
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), high);
        // One band is 8 aging intervals; after 9 the lower base outranks.
        let later = now + Duration::from_millis(10 * 9);
        let low_eff = sched.effective_priority(low, later).unwrap();
        let high_eff = sched.effective_priority(high, later).unwrap();
        assert!(low_eff > high_eff);
    }

    #[test]
    fn test_idle_runs_when_nothing_ready() {
        let mut sched = scheduler();
        let idle = install_idle(&mut sched, CoreId(0));
        let chosen = sched.select_next(CoreId(0), Instant::ZERO).unwrap();
        assert_eq!(chosen, idle);
        assert!(sched.is_idle(chosen));
    }

    #[test]
    fn test_idle_never_outranks_work() {
        let mut sched = scheduler();
        let idle = install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let work = admit(&mut sched, 0, now);
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), work);
        assert_eq!(sched.effective_priority(idle, now), Some(i64::MIN));
    }

    #[test]
    fn test_block_and_unblock() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let q = admit(&mut sched, 10, now);
        sched.select_next(CoreId(0), now).unwrap();
        assert!(sched.block(q, WaitReason::Ipc(ConduitId::new())));
        let next = sched.select_next(CoreId(0), now).unwrap();
        assert!(sched.is_idle(next));
        assert!(sched.unblock(q, now));
        // Second unblock is a no-op.
        assert!(!sched.unblock(q, now));
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), q);
    }

    #[test]
    fn test_slice_expiry_triggers_preemption() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let q = admit(&mut sched, 10, now);
        sched.select_next(CoreId(0), now).unwrap();
        assert!(!sched.tick(CoreId(0), Duration::from_millis(4), now));
        assert!(sched.tick(CoreId(0), Duration::from_millis(6), now));
        assert!(sched.has_event(|e| matches!(e, ScheduleEvent::Preempted { quantum, .. } if *quantum == q)));
    }

    #[test]
    fn test_higher_priority_arrival_preempts() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let low = admit(&mut sched, 5, now);
        sched.select_next(CoreId(0), now).unwrap();
        let high = admit(&mut sched, 20, now);
        assert!(sched.tick(CoreId(0), Duration::from_millis(1), now));
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), high);
        assert_eq!(sched.state(low), Some(QuantumState::Ready));
    }

    #[test]
    fn test_idle_is_not_slice_preempted() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        sched.select_next(CoreId(0), Instant::ZERO).unwrap();
        assert!(!sched.tick(CoreId(0), Duration::from_millis(100), Instant::ZERO));
    }

    #[test]
    fn test_terminate_then_reclaim() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let q = admit(&mut sched, 10, Instant::ZERO);
        assert!(!sched.reclaim(q));
        assert!(sched.terminate(q));
        assert!(sched.reclaim(q));
        assert!(!sched.contains(q));
    }

    #[test]
    fn test_correction_is_clamped_to_band() {
        struct Aggressive;
        impl PriorityAdjuster for Aggressive {
            fn adjust(&self, _: QuantumId, _: u8, _: Duration) -> i64 {
                1_000_000
            }
        }
        let mut sched = scheduler();
        sched.set_adjuster(Box::new(Aggressive));
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let low = admit(&mut sched, 10, now);
        let high = admit(&mut sched, 12, now);
        // Two full bands of base difference; a clamped correction cannot
        // bridge it.
        assert!(
            sched.effective_priority(high, now).unwrap()
                > sched.effective_priority(low, now).unwrap()
        );
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), high);
    }

    #[test]
    fn test_opposed_corrections_cannot_invert_base_order() {
        struct Opposed;
        impl PriorityAdjuster for Opposed {
            fn adjust(&self, _: QuantumId, base_priority: u8, _: Duration) -> i64 {
                // Push the lower base up and the higher base down as
                // hard as the clamp allows.
                if base_priority == 10 {
                    1_000_000
                } else {
                    -1_000_000
                }
            }
        }
        let mut sched = scheduler();
        sched.set_adjuster(Box::new(Opposed));
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let low = admit(&mut sched, 10, now);
        let high = admit(&mut sched, 11, now);
        assert!(
            sched.effective_priority(high, now).unwrap()
                > sched.effective_priority(low, now).unwrap()
        );
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), high);
    }

    #[test]
    fn test_context_tag_transition_is_fatal() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let q = admit(&mut sched, 10, Instant::ZERO);
        let wrong = AbiContext::initial(AbiTag::Compat32, 0, 0);
        let err = sched.set_context(q, wrong).unwrap_err();
        assert_eq!(err.subsystem, Subsystem::Scheduler);
        assert!(err.detail.contains("invalid tag transition"));
    }

    #[test]
    fn test_round_robin_core_placement() {
        let mut sched = Scheduler::new(SchedulerConfig {
            core_count: 2,
            ..SchedulerConfig::default()
        });
        install_idle(&mut sched, CoreId(0));
        install_idle(&mut sched, CoreId(1));
        let now = Instant::ZERO;
        let a = admit(&mut sched, 10, now);
        let b = admit(&mut sched, 10, now);
        assert_ne!(sched.home_core(a), sched.home_core(b));
        assert_eq!(sched.select_next(CoreId(0), now).unwrap(), a);
        assert_eq!(sched.select_next(CoreId(1), now).unwrap(), b);
    }

    #[test]
    fn test_fairness_all_equal_quanta_get_selected() {
        let mut sched = scheduler();
        install_idle(&mut sched, CoreId(0));
        let now = Instant::ZERO;
        let quanta: Vec<QuantumId> = (0..5).map(|_| admit(&mut sched, 10, now)).collect();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..5 {
            seen.insert(sched.select_next(CoreId(0), now).unwrap());
        }
        for q in &quanta {
            assert!(seen.contains(q));
        }
    }
}

//! The coherence controller: translates one core's memory reference into
//! MESI actions, bus transactions, snoop effects and deferred state.
//!
//! Nothing here mutates a remote cache directly. Every cross-cache effect
//! is expressed as a planned change or a stall request and applied by the
//! scheduler, so that all observations made within a cycle precede all
//! mutations decided in it.

use log::{debug, trace};

use crate::bus::BusTx;
use crate::commons::{timing, AddrParts, MemRef, MesiState, NUM_CORES};
use crate::error::SimError;
use crate::scheduler::Simulator;

/// The deferred effect of a miss whose data is still in flight on the bus.
#[derive(Clone, Copy, Debug)]
pub struct PendingAllocation {
    pub core: usize,
    pub set: u32,
    pub victim: usize,
    pub tag: u32,
    pub state: MesiState,
    pub complete_cycle: u64,
}

/// A deferred mutation of one specific line.
///
/// Transitions rewrite the whole line; invalidations only move the state
/// to Invalid, leaving identity and recency in place. The scheduler drains
/// due transitions before due invalidations, so a line that is both
/// downgraded and invalidated in the same cycle ends Invalid.
#[derive(Clone, Copy, Debug)]
pub enum PlannedChange {
    Transition {
        core: usize,
        set: u32,
        way: usize,
        valid: bool,
        state: MesiState,
        tag: u32,
        last_used: u64,
        apply_cycle: u64,
    },
    Invalidation {
        core: usize,
        set: u32,
        way: usize,
        apply_cycle: u64,
    },
}

impl PlannedChange {
    pub fn apply_cycle(&self) -> u64 {
        match self {
            PlannedChange::Transition { apply_cycle, .. }
            | PlannedChange::Invalidation { apply_cycle, .. } => *apply_cycle,
        }
    }
}

/// A cross-core stall emitted while servicing a transaction, applied at
/// the end of the cycle.
#[derive(Clone, Copy, Debug)]
pub struct StallRequest {
    pub core: usize,
    pub until_cycle: u64,
}

/// What became of the reference at the head of a core's queue this cycle.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Outcome {
    /// The head's effects are fully scheduled; pop it.
    Retired,
    /// The bus was busy; the core stalls and retries the same head.
    Blocked,
}

/// Result of polling the other caches for a block.
struct SnoopPoll {
    found_shared: bool,
    found_mod: bool,
    /// `(core, way)` of every remote copy, in core index order. A core
    /// holds at most one copy of a block.
    copies: Vec<(usize, usize)>,
}

impl Simulator {
    pub(crate) fn service_reference(&mut self, c: usize, r: MemRef) -> Result<Outcome, SimError> {
        let AddrParts { tag, set, .. } = r.addr().pos(&self.spec);
        match self.caches[c].find_line(tag, set) {
            Some(way) => self.service_hit(c, r, set, tag, way),
            None => Ok(self.service_miss(c, r, set, tag)),
        }
    }

    fn service_hit(
        &mut self,
        c: usize,
        r: MemRef,
        set: u32,
        tag: u32,
        way: usize,
    ) -> Result<Outcome, SimError> {
        let now = self.cycle;
        let state = self.caches[c].line(set, way).state;

        let next_state = match (state, r.is_write()) {
            (MesiState::Invalid, _) => {
                return Err(SimError::Invariant(format!(
                    "hit on an invalid line (core {c}, set {set}, way {way})"
                )));
            }
            // silent upgrade: ownership is already exclusive
            (MesiState::Exclusive, true) | (MesiState::Modified, true) => MesiState::Modified,
            (MesiState::Shared, true) => {
                if !self.bus.free_at(now) {
                    trace!(
                        "core {c} {} on {tag:#x}/{set} waits for the bus until {}",
                        BusTx::Upgrade,
                        self.bus.busy_until
                    );
                    self.stall_until[c] = self.bus.busy_until;
                    return Ok(Outcome::Blocked);
                }
                debug!("core {c} {} on {tag:#x}/{set}", BusTx::Upgrade);
                let mut invalidated_others = false;
                for o in 0..NUM_CORES {
                    if o == c {
                        continue;
                    }
                    if let Some(ow) = self.caches[o].find_line(tag, set) {
                        self.planned_changes.push(PlannedChange::Invalidation {
                            core: o,
                            set,
                            way: ow,
                            apply_cycle: now + 1,
                        });
                        invalidated_others = true;
                    }
                }
                if invalidated_others {
                    self.stats[c].invalidations += 1;
                }
                MesiState::Modified
            }
            // reads never change the state of a resident line
            (s, false) => s,
        };

        trace!("core {c} {} hit {tag:#x}/{set}: {state} -> {next_state}", if r.is_write() { "write" } else { "read" });
        let last_used = self.caches[c].next_use();
        self.planned_changes.push(PlannedChange::Transition {
            core: c,
            set,
            way,
            valid: true,
            state: next_state,
            tag,
            last_used,
            apply_cycle: now + 1,
        });
        Ok(Outcome::Retired)
    }

    fn service_miss(&mut self, c: usize, r: MemRef, set: u32, tag: u32) -> Outcome {
        let now = self.cycle;
        if !self.bus.free_at(now) {
            trace!("core {c} misses {tag:#x}/{set}, bus busy until {}", self.bus.busy_until);
            self.stall_until[c] = self.bus.busy_until;
            return Outcome::Blocked;
        }

        // bus granted: from here the transaction commits
        for o in 0..NUM_CORES {
            self.stats[o].waiting_for_own_request = o == c;
        }
        self.stats[c].misses += 1;

        let poll = self.snoop_poll(c, set, tag);
        let block = self.spec.block_bytes();
        let tx = if r.is_write() { BusTx::BusRdX } else { BusTx::BusRd };
        debug!(
            "core {c} {tx} {}/{set} (shared: {}, modified: {})",
            r.addr(),
            poll.found_shared,
            poll.found_mod
        );

        let new_state;
        let mut bus_cycles;
        if r.is_write() {
            new_state = MesiState::Modified;
            if poll.found_mod {
                // dirty remote copy: cache-to-cache with an implicit
                // write-back, charged to the holder
                bus_cycles = timing::dirty_transfer();
                for &(o, ow) in &poll.copies {
                    if self.caches[o].line(set, ow).state == MesiState::Modified {
                        self.stall_requests.push(StallRequest {
                            core: o,
                            until_cycle: now + timing::flush() + 1,
                        });
                        self.stats[o].traffic += block;
                        debug!("core {o} writes back its modified copy of {tag:#x}/{set}");
                    }
                }
            } else {
                bus_cycles = timing::mem_fetch();
                self.stats[c].traffic += block;
            }
            if !poll.copies.is_empty() {
                for &(o, ow) in &poll.copies {
                    self.planned_changes.push(PlannedChange::Invalidation {
                        core: o,
                        set,
                        way: ow,
                        apply_cycle: now + 1,
                    });
                }
                self.stats[c].invalidations += 1;
            }
        } else if poll.found_shared {
            new_state = MesiState::Shared;
            bus_cycles = timing::cache_to_cache(&self.spec);
            self.stats[c].traffic += block;
            // the first copy not about to disappear supplies the data;
            // every surviving copy downgrades to Shared
            let mut provider_chosen = false;
            for &(o, ow) in &poll.copies {
                if self.pending_invalidation(o, set, ow) {
                    continue;
                }
                let line = self.caches[o].line(set, ow);
                let (line_tag, line_last_used, line_state) = (line.tag, line.last_used, line.state);
                if !provider_chosen {
                    provider_chosen = true;
                    let flush = if line_state == MesiState::Modified { timing::flush() } else { 0 };
                    self.stall_requests.push(StallRequest {
                        core: o,
                        until_cycle: now + bus_cycles + flush,
                    });
                    self.stats[o].traffic += block;
                    if line_state == MesiState::Modified {
                        self.stats[o].traffic += block;
                        debug!("core {o} supplies {tag:#x}/{set} and writes it back");
                    } else {
                        debug!("core {o} supplies {tag:#x}/{set}");
                    }
                }
                self.planned_changes.push(PlannedChange::Transition {
                    core: o,
                    set,
                    way: ow,
                    valid: true,
                    state: MesiState::Shared,
                    tag: line_tag,
                    last_used: line_last_used,
                    apply_cycle: now + 1,
                });
            }
        } else {
            new_state = MesiState::Exclusive;
            bus_cycles = timing::mem_fetch();
            self.stats[c].traffic += block;
        }

        // victim selection; a modified victim rides the same bus tenure
        // back to memory
        let victim = self.caches[c].choose_victim(set);
        let vline = self.caches[c].line(set, victim);
        if vline.valid && vline.state != MesiState::Invalid {
            self.stats[c].evictions += 1;
            if vline.state == MesiState::Modified {
                debug!("core {c} evicts modified {:#x}/{set}, write-back", vline.tag);
                self.stats[c].writebacks += 1;
                self.stats[c].traffic += block;
                bus_cycles += timing::flush();
            }
        }

        let complete_cycle = now + bus_cycles;
        debug!("core {c} allocates {tag:#x}/{set} way {victim} as {new_state}, ready at {complete_cycle}");
        self.pending_allocations.push(PendingAllocation {
            core: c,
            set,
            victim,
            tag,
            state: new_state,
            complete_cycle,
        });
        self.bus.occupy(now, bus_cycles);
        self.stall_until[c] = self.bus.busy_until;
        Outcome::Retired
    }

    /// Look the block up in every other cache, including lines another
    /// core will own once this cycle's planned transitions apply.
    fn snoop_poll(&self, c: usize, set: u32, tag: u32) -> SnoopPoll {
        let mut poll = SnoopPoll { found_shared: false, found_mod: false, copies: Vec::new() };
        for o in 0..NUM_CORES {
            if o == c {
                continue;
            }
            if let Some(ow) = self.caches[o].find_line(tag, set) {
                poll.found_shared = true;
                if self.caches[o].line(set, ow).state == MesiState::Modified {
                    poll.found_mod = true;
                }
                poll.copies.push((o, ow));
            }
        }
        for pc in &self.planned_changes {
            if let PlannedChange::Transition {
                core,
                set: t_set,
                way,
                valid: true,
                state,
                tag: t_tag,
                apply_cycle,
                ..
            } = *pc
            {
                if apply_cycle > self.cycle
                    && core != c
                    && t_set == set
                    && t_tag == tag
                    && state != MesiState::Invalid
                {
                    poll.found_shared = true;
                    if state == MesiState::Modified {
                        poll.found_mod = true;
                    }
                    if !poll.copies.contains(&(core, way)) {
                        poll.copies.push((core, way));
                    }
                }
            }
        }
        poll.copies.sort_unstable();
        poll
    }

    /// Whether an invalidation is already scheduled against this line.
    fn pending_invalidation(&self, core: usize, set: u32, way: usize) -> bool {
        self.planned_changes.iter().any(|pc| {
            matches!(
                *pc,
                PlannedChange::Invalidation { core: i_core, set: i_set, way: i_way, .. }
                    if i_core == core && i_set == set && i_way == way
            )
        })
    }
}

//! The cycle-stepped driver that interleaves core progress, bus occupancy,
//! stalls and deferred line mutations.

use std::collections::HashMap;
use std::mem;

use log::{debug, trace};

use crate::bus::Bus;
use crate::cache::{Cache, Line};
use crate::coherence::{Outcome, PendingAllocation, PlannedChange, StallRequest};
use crate::commons::{Addr, MesiState, RefQueue, SystemSpec, NUM_CORES};
use crate::error::SimError;
use crate::stats::CoreStats;

/// The whole simulated system: four cores with private caches, the bus,
/// the reference queues and all deferred state.
///
/// Each cycle runs in a fixed order: due transitions, due invalidations,
/// due allocations, the cores in index order, then the stall requests
/// collected during the cycle. Within a cycle every observation precedes
/// every mutation decided in it; changes scheduled for `t + 1` are
/// invisible at `t`.
pub struct Simulator {
    pub(crate) spec: SystemSpec,
    pub(crate) caches: Vec<Cache>,
    pub(crate) bus: Bus,
    pub(crate) stats: Vec<CoreStats>,
    pub(crate) queues: Vec<RefQueue>,
    pub(crate) stall_until: Vec<u64>,
    pub(crate) pending_allocations: Vec<PendingAllocation>,
    pub(crate) planned_changes: Vec<PlannedChange>,
    pub(crate) stall_requests: Vec<StallRequest>,
    pub(crate) cycle: u64,
}

impl Simulator {
    /// Build a system over per-core reference queues. Missing queues run
    /// as idle cores; extras are dropped.
    pub fn new(spec: SystemSpec, mut queues: Vec<RefQueue>) -> Self {
        queues.resize_with(NUM_CORES, RefQueue::new);
        Simulator {
            spec,
            caches: (0..NUM_CORES).map(|_| Cache::new(&spec)).collect(),
            bus: Bus::new(),
            stats: vec![CoreStats::default(); NUM_CORES],
            queues,
            stall_until: vec![0; NUM_CORES],
            pending_allocations: Vec::new(),
            planned_changes: Vec::new(),
            stall_requests: Vec::new(),
            cycle: 0,
        }
    }

    /// Whether the system has quiesced: no references left, no core still
    /// stalled, nothing in flight.
    pub fn is_done(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
            && self.stall_until.iter().all(|&s| s <= self.cycle)
            && self.pending_allocations.is_empty()
            && self.planned_changes.is_empty()
    }

    /// Run to quiescence and return the total cycle count.
    pub fn run(&mut self) -> Result<u64, SimError> {
        while !self.is_done() {
            self.step()?;
        }
        debug!("simulation quiesced at cycle {}", self.cycle);
        Ok(self.cycle)
    }

    /// Advance the system by one cycle.
    pub fn step(&mut self) -> Result<(), SimError> {
        self.apply_planned_changes();
        self.complete_allocations();
        for c in 0..NUM_CORES {
            self.process_core(c)?;
        }
        self.apply_stall_requests();
        self.cycle += 1;
        Ok(())
    }

    /// Drain due line mutations: transitions first, then invalidations, so
    /// a same-cycle downgrade-plus-invalidate ends Invalid.
    fn apply_planned_changes(&mut self) {
        let now = self.cycle;
        let (due, rest): (Vec<_>, Vec<_>) = mem::take(&mut self.planned_changes)
            .into_iter()
            .partition(|pc| pc.apply_cycle() <= now);
        self.planned_changes = rest;

        for pc in &due {
            if let PlannedChange::Transition { core, set, way, valid, state, tag, last_used, .. } = *pc {
                let line = self.caches[core].line_mut(set, way);
                trace!("core {core} line {set}/{way}: {} -> {state}", line.state);
                line.valid = valid;
                line.state = state;
                line.tag = tag;
                line.last_used = last_used;
            }
        }
        for pc in &due {
            if let PlannedChange::Invalidation { core, set, way, .. } = *pc {
                trace!("core {core} line {set}/{way} invalidated");
                self.caches[core].invalidate(set, way);
            }
        }
    }

    /// Install the blocks whose bus transactions have finished.
    fn complete_allocations(&mut self) {
        let now = self.cycle;
        let (due, rest): (Vec<_>, Vec<_>) = mem::take(&mut self.pending_allocations)
            .into_iter()
            .partition(|pa| now >= pa.complete_cycle);
        self.pending_allocations = rest;

        for pa in due {
            debug!(
                "core {} fills {:#x}/{} way {} as {}",
                pa.core, pa.tag, pa.set, pa.victim, pa.state
            );
            self.caches[pa.core].install(pa.set, pa.victim, pa.tag, pa.state);
            self.stats[pa.core].waiting_for_own_request = false;
        }
    }

    fn process_core(&mut self, c: usize) -> Result<(), SimError> {
        if self.queues[c].is_empty() {
            // a retired miss keeps the core executing until its fill lands
            if self.stats[c].waiting_for_own_request && self.cycle < self.stall_until[c] {
                self.stats[c].execution_cycles += 1;
            }
            return Ok(());
        }
        if self.cycle < self.stall_until[c] {
            if self.stats[c].waiting_for_own_request {
                self.stats[c].execution_cycles += 1;
            } else {
                self.stats[c].idle += 1;
            }
            return Ok(());
        }

        self.stats[c].execution_cycles += 1;
        let r = self.queues[c][0];
        match self.service_reference(c, r)? {
            Outcome::Retired => {
                self.queues[c].pop_front();
                let st = &mut self.stats[c];
                st.instr += 1;
                if r.is_write() {
                    st.writes += 1;
                } else {
                    st.reads += 1;
                }
            }
            Outcome::Blocked => {}
        }
        Ok(())
    }

    fn apply_stall_requests(&mut self) {
        for req in mem::take(&mut self.stall_requests) {
            let until = self.stall_until[req.core].max(req.until_cycle);
            trace!("core {} stalled until {until}", req.core);
            self.stall_until[req.core] = until;
        }
    }

    // inspection

    pub fn spec(&self) -> &SystemSpec {
        &self.spec
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn stats(&self) -> &[CoreStats] {
        &self.stats
    }

    /// The MESI state a core currently holds for `addr` (Invalid when the
    /// block is not resident).
    pub fn line_state(&self, core: usize, addr: Addr) -> MesiState {
        let p = addr.pos(&self.spec);
        match self.caches[core].find_line(p.tag, p.set) {
            Some(way) => self.caches[core].line(p.set, way).state,
            None => MesiState::Invalid,
        }
    }

    /// All lines of one core's cache, as `(set, way, line)`.
    pub fn lines(&self, core: usize) -> impl Iterator<Item = (u32, usize, &Line)> + '_ {
        self.caches[core].iter_lines()
    }

    /// Verify the cross-cache MESI invariants: at most one Modified copy
    /// of any block, and no copy anywhere else while one cache holds a
    /// block Modified or Exclusive.
    pub fn check_coherence_invariants(&self) -> Result<(), SimError> {
        let mut blocks: HashMap<(u32, u32), (u32, u32, u32)> = HashMap::new();
        for cache in &self.caches {
            for (set, _way, line) in cache.iter_lines() {
                if !line.valid || line.state == MesiState::Invalid {
                    continue;
                }
                let entry = blocks.entry((set, line.tag)).or_default();
                entry.2 += 1;
                match line.state {
                    MesiState::Modified => entry.0 += 1,
                    MesiState::Exclusive => entry.1 += 1,
                    _ => {}
                }
            }
        }
        for ((set, tag), (modified, exclusive, total)) in blocks {
            if modified > 1 {
                return Err(SimError::Invariant(format!(
                    "{modified} modified copies of {tag:#x}/{set} at cycle {}",
                    self.cycle
                )));
            }
            if modified + exclusive > 0 && total > 1 {
                return Err(SimError::Invariant(format!(
                    "exclusively owned {tag:#x}/{set} present in {total} caches at cycle {}",
                    self.cycle
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_system_is_immediately_done() {
        let spec = SystemSpec::new(1, 2, 2).unwrap();
        let mut sim = Simulator::new(spec, Vec::new());
        assert!(sim.is_done());
        assert_eq!(sim.run().unwrap(), 0);
    }
}

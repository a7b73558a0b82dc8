//! A core's private data cache: set-associative, write-back, LRU-replaced.

use crate::commons::{MesiState, SystemSpec};

/// One cache line. A line with `state == Invalid` carries no guest data and
/// is treated as empty by lookups even while `valid` is set (a snooped
/// invalidation leaves the identity fields in place).
#[derive(Clone, Debug)]
pub struct Line {
    pub valid: bool,
    pub state: MesiState,
    pub tag: u32,
    pub last_used: u64,
}

impl Default for Line {
    fn default() -> Self {
        Line { valid: false, state: MesiState::Invalid, tag: 0, last_used: 0 }
    }
}

/// A private cache of `2^s` sets with `E` ways each. Recency is tracked by
/// a cache-local monotonic counter; every touch stamps the line with a
/// fresh value.
pub struct Cache {
    sets: Vec<Vec<Line>>,
    use_counter: u64,
}

impl Cache {
    pub fn new(spec: &SystemSpec) -> Self {
        Cache {
            sets: (0..spec.num_sets()).map(|_| vec![Line::default(); spec.assoc]).collect(),
            use_counter: 0,
        }
    }

    /// The way holding `tag` in `set`, or `None`. Lines in Invalid state do
    /// not match.
    pub fn find_line(&self, tag: u32, set: u32) -> Option<usize> {
        self.sets[set as usize]
            .iter()
            .position(|l| l.valid && l.tag == tag && l.state != MesiState::Invalid)
    }

    /// The replacement victim for `set`: the first way that never held
    /// data, otherwise the way with the oldest `last_used` stamp (lowest
    /// way index on ties).
    pub fn choose_victim(&self, set: u32) -> usize {
        let ways = &self.sets[set as usize];
        let mut victim = 0;
        let mut min_used = u64::MAX;
        for (i, line) in ways.iter().enumerate() {
            if !line.valid {
                return i;
            }
            if line.last_used < min_used {
                min_used = line.last_used;
                victim = i;
            }
        }
        victim
    }

    /// Stamp a line as most recently used.
    pub fn touch(&mut self, set: u32, way: usize) {
        let stamp = self.next_use();
        self.sets[set as usize][way].last_used = stamp;
    }

    /// A fresh recency stamp, for transitions whose application is
    /// deferred past the cycle that decided them.
    pub fn next_use(&mut self) -> u64 {
        let stamp = self.use_counter;
        self.use_counter += 1;
        stamp
    }

    /// Fill a way with a newly arrived block.
    pub fn install(&mut self, set: u32, way: usize, tag: u32, state: MesiState) {
        {
            let line = &mut self.sets[set as usize][way];
            line.valid = true;
            line.tag = tag;
            line.state = state;
        }
        self.touch(set, way);
    }

    /// Snooped invalidation: only the state moves to Invalid. Identity and
    /// recency stay, so the line competes for victimhood via LRU.
    pub fn invalidate(&mut self, set: u32, way: usize) {
        self.sets[set as usize][way].state = MesiState::Invalid;
    }

    pub fn line(&self, set: u32, way: usize) -> &Line {
        &self.sets[set as usize][way]
    }

    pub fn line_mut(&mut self, set: u32, way: usize) -> &mut Line {
        &mut self.sets[set as usize][way]
    }

    pub fn iter_lines(&self) -> impl Iterator<Item = (u32, usize, &Line)> + '_ {
        self.sets
            .iter()
            .enumerate()
            .flat_map(|(s, ways)| ways.iter().enumerate().map(move |(w, l)| (s as u32, w, l)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commons::SystemSpec;

    fn cache_1x2() -> Cache {
        Cache::new(&SystemSpec::new(0, 2, 2).unwrap())
    }

    #[test]
    fn lookup_ignores_invalidated_lines() {
        let mut c = cache_1x2();
        c.install(0, 0, 7, MesiState::Exclusive);
        assert_eq!(c.find_line(7, 0), Some(0));
        c.invalidate(0, 0);
        assert_eq!(c.find_line(7, 0), None);
        // identity survives the invalidation
        assert!(c.line(0, 0).valid);
        assert_eq!(c.line(0, 0).tag, 7);
    }

    #[test]
    fn victim_prefers_untouched_ways() {
        let mut c = cache_1x2();
        c.install(0, 0, 1, MesiState::Modified);
        assert_eq!(c.choose_victim(0), 1);
    }

    #[test]
    fn victim_is_least_recently_used() {
        let mut c = cache_1x2();
        c.install(0, 0, 1, MesiState::Exclusive);
        c.install(0, 1, 2, MesiState::Exclusive);
        c.touch(0, 0);
        assert_eq!(c.choose_victim(0), 1);
        c.touch(0, 1);
        assert_eq!(c.choose_victim(0), 0);
    }

    #[test]
    fn victim_ties_break_to_lowest_way() {
        let mut c = cache_1x2();
        // both ways stamped, way 0 older
        c.install(0, 0, 1, MesiState::Shared);
        c.install(0, 1, 2, MesiState::Shared);
        assert_eq!(c.choose_victim(0), 0);
    }

    #[test]
    fn recency_stamps_are_monotonic() {
        let mut c = cache_1x2();
        let a = c.next_use();
        let b = c.next_use();
        assert!(b > a);
        c.install(0, 0, 1, MesiState::Exclusive);
        assert!(c.line(0, 0).last_used > b);
    }
}

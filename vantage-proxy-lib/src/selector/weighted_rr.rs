//! Weighted round-robin selection, generalizing the teacher's
//! `load_balancing::round_robin::RoundRobin` (a plain `AtomicUsize` cursor
//! over an unweighted list) into the smooth weighted round-robin algorithm
//! nginx's `upstream` module uses: each pick advances every candidate's
//! running weight by its configured weight, picks the highest, then
//! deducts the total weight from the winner. This spreads picks evenly
//! across a request burst instead of bursting through one high-weight
//! member before moving on, the way a naive weight-expansion list would.

use std::sync::Mutex;

struct Member {
    weight: i64,
    current: i64,
}

pub struct WeightedRoundRobin {
    members: Mutex<Vec<Member>>,
}

impl WeightedRoundRobin {
    pub fn new(weights: &[u32]) -> Self {
        let members =
            weights.iter().map(|&w| Member { weight: w.max(1) as i64, current: 0 }).collect();
        Self { members: Mutex::new(members) }
    }

    /// Returns the index of the next member to use, or `None` if the
    /// candidate set is empty.
    pub fn next(&self) -> Option<usize> {
        let mut members = self.members.lock().unwrap_or_else(|e| e.into_inner());
        if members.is_empty() {
            return None;
        }
        let total: i64 = members.iter().map(|m| m.weight).sum();
        for m in members.iter_mut() {
            m.current += m.weight;
        }
        let (idx, _) = members
            .iter()
            .enumerate()
            .max_by_key(|(_, m)| m.current)
            .expect("non-empty members");
        members[idx].current -= total;
        Some(idx)
    }

    pub fn len(&self) -> usize {
        self.members.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distributes_proportionally_to_weight() {
        let rr = WeightedRoundRobin::new(&[1, 3]);
        let mut counts = [0u32; 2];
        for _ in 0..8 {
            counts[rr.next().unwrap()] += 1;
        }
        assert_eq!(counts, [2, 6]);
    }

    #[test]
    fn equal_weights_alternate() {
        let rr = WeightedRoundRobin::new(&[1, 1]);
        let picks: Vec<usize> = (0..4).map(|_| rr.next().unwrap()).collect();
        assert_eq!(picks, vec![0, 1, 0, 1]);
    }

    #[test]
    fn empty_returns_none() {
        let rr = WeightedRoundRobin::new(&[]);
        assert_eq!(rr.next(), None);
    }
}

//! Data dependencies between events of a log
//!
//! An edge `a -> b` means event `a` must be played before event `b`. Edges
//! come from the logical handles events produce, consume and invalidate:
//!
//! 1. the producer of a handle comes before every later consumer of it;
//! 2. every consumer (and the producer) of a handle comes before the event
//!    that invalidates it;
//! 3. when a trace value is produced again (address reuse), whatever ended
//!    the previous instance comes before the new producer.
//!
//! Every edge points forward in capture order, so capture order is always a
//! valid schedule.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bard_core::HandleRef;
use bard_storage::EventLog;

use crate::error::StoryError;

/// How to pick among events whose dependencies are all satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TieBreak {
    /// Lowest capture index first
    CaptureOrder,
    /// Uniformly at random, reproducible for a given seed
    Seeded(u64),
}

#[derive(Debug)]
enum Slot {
    /// The handle is live: its producer and consumers so far
    Live { producer: usize, consumers: Vec<usize> },
    /// The handle was invalidated: events a new producer must follow
    Retired(Vec<usize>),
}

/// Dependency edges between the events of one log
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    successors: Vec<Vec<usize>>,
    in_degree: Vec<usize>,
    edges: usize,
}

impl DependencyGraph {
    /// Walk `log` in capture order and collect its edges
    pub fn build(log: &EventLog) -> Self {
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); log.len()];
        let mut slots: HashMap<HandleRef, Slot> = HashMap::new();

        let mut add_edge = |before: usize, after: usize| {
            if before != after {
                successors[before].push(after);
            }
        };

        for (index, event) in log.iter().enumerate() {
            for handle in event.consumes() {
                match slots.get_mut(&handle) {
                    Some(Slot::Live { producer, consumers }) => {
                        add_edge(*producer, index);
                        consumers.push(index);
                    }
                    // Use after invalidation keeps its captured position
                    Some(Slot::Retired(release)) => {
                        for &before in release.iter() {
                            add_edge(before, index);
                        }
                        release.push(index);
                    }
                    None => {}
                }
            }

            if let Some(handle) = event.invalidates() {
                for before in slots.remove(&handle).map(Slot::into_members).unwrap_or_default() {
                    add_edge(before, index);
                }
                slots.insert(handle, Slot::Retired(vec![index]));
            }

            if let Some(handle) = event.produces() {
                for before in slots.remove(&handle).map(Slot::into_members).unwrap_or_default() {
                    add_edge(before, index);
                }
                slots.insert(
                    handle,
                    Slot::Live {
                        producer: index,
                        consumers: Vec::new(),
                    },
                );
            }
        }

        let mut in_degree = vec![0; successors.len()];
        let mut edges = 0;
        for next in successors.iter_mut() {
            next.sort_unstable();
            next.dedup();
            edges += next.len();
            for &after in next.iter() {
                in_degree[after] += 1;
            }
        }

        Self {
            successors,
            in_degree,
            edges,
        }
    }

    /// Number of events
    pub fn len(&self) -> usize {
        self.successors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.successors.is_empty()
    }

    /// Number of distinct edges
    pub fn edge_count(&self) -> usize {
        self.edges
    }

    /// Events that must play after `index`, ascending
    pub fn successors(&self, index: usize) -> &[usize] {
        self.successors.get(index).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has_edge(&self, before: usize, after: usize) -> bool {
        self.successors(before).binary_search(&after).is_ok()
    }

    /// Check that `order` is a permutation of all events honoring every edge
    pub fn respects(&self, order: &[usize]) -> Result<(), StoryError> {
        if order.len() != self.len() {
            return Err(StoryError::invalid_order(format!(
                "order has {} entries but the log has {} events",
                order.len(),
                self.len()
            )));
        }

        let mut position = vec![usize::MAX; self.len()];
        for (at, &index) in order.iter().enumerate() {
            match position.get_mut(index) {
                None => {
                    return Err(StoryError::invalid_order(format!(
                        "event {} is out of range",
                        index
                    )));
                }
                Some(slot) if *slot != usize::MAX => {
                    return Err(StoryError::invalid_order(format!(
                        "event {} is scheduled twice",
                        index
                    )));
                }
                Some(slot) => *slot = at,
            }
        }

        for (before, next) in self.successors.iter().enumerate() {
            for &after in next {
                if position[after] < position[before] {
                    return Err(StoryError::invalid_order(format!(
                        "event {} is scheduled before event {} it depends on",
                        after, before
                    )));
                }
            }
        }
        Ok(())
    }

    /// Produce a total order honoring the graph plus `extra` edges
    ///
    /// `extra` holds `(before, after)` pairs. Fails when an index is out of
    /// range or the combined edges contain a cycle.
    pub fn topological(
        &self,
        extra: &[(usize, usize)],
        tie_break: TieBreak,
    ) -> Result<Vec<usize>, StoryError> {
        let len = self.len();
        let mut in_degree = self.in_degree.clone();
        let mut extra_successors: HashMap<usize, Vec<usize>> = HashMap::new();

        for &(before, after) in extra {
            if before >= len || after >= len {
                return Err(StoryError::invalid_order(format!(
                    "constraint {} -> {} is out of range for {} events",
                    before, after, len
                )));
            }
            if before == after {
                return Err(StoryError::invalid_order(format!(
                    "event {} cannot precede itself",
                    before
                )));
            }
            extra_successors.entry(before).or_default().push(after);
            in_degree[after] += 1;
        }

        let mut ready = Ready::new(tie_break);
        for (index, &degree) in in_degree.iter().enumerate() {
            if degree == 0 {
                ready.push(index);
            }
        }

        let mut order = Vec::with_capacity(len);
        while let Some(index) = ready.pop() {
            order.push(index);
            let next = self.successors[index]
                .iter()
                .chain(extra_successors.get(&index).into_iter().flatten());
            for &after in next {
                in_degree[after] -= 1;
                if in_degree[after] == 0 {
                    ready.push(after);
                }
            }
        }

        if order.len() != len {
            return Err(StoryError::invalid_order(format!(
                "constraints form a cycle through {} events",
                len - order.len()
            )));
        }
        Ok(order)
    }
}

impl Slot {
    fn into_members(self) -> Vec<usize> {
        match self {
            Slot::Live {
                producer,
                mut consumers,
            } => {
                consumers.push(producer);
                consumers
            }
            Slot::Retired(release) => release,
        }
    }
}

/// Events whose dependencies have all been played
enum Ready {
    CaptureOrder(BinaryHeap<Reverse<usize>>),
    Seeded { pool: Vec<usize>, rng: StdRng },
}

impl Ready {
    fn new(tie_break: TieBreak) -> Self {
        match tie_break {
            TieBreak::CaptureOrder => Ready::CaptureOrder(BinaryHeap::new()),
            TieBreak::Seeded(seed) => Ready::Seeded {
                pool: Vec::new(),
                rng: StdRng::seed_from_u64(seed),
            },
        }
    }

    fn push(&mut self, index: usize) {
        match self {
            Ready::CaptureOrder(heap) => heap.push(Reverse(index)),
            Ready::Seeded { pool, .. } => pool.push(index),
        }
    }

    fn pop(&mut self) -> Option<usize> {
        match self {
            Ready::CaptureOrder(heap) => heap.pop().map(|Reverse(index)| index),
            Ready::Seeded { pool, rng } => {
                if pool.is_empty() {
                    return None;
                }
                let pick = rng.random_range(0..pool.len());
                Some(pool.swap_remove(pick))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bard_core::Event;

    const HEAP: u64 = 0x50_0000;

    fn log(events: Vec<Event>) -> EventLog {
        events.into_iter().collect()
    }

    #[test]
    fn test_alloc_free_edges() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::heap_alloc(HEAP, 0, 16, 0xb),
            Event::heap_free(HEAP, 0, 0xa, true),
        ]));

        assert!(graph.has_edge(0, 1));
        assert!(graph.has_edge(0, 2));
        assert!(graph.has_edge(0, 3));
        assert!(graph.has_edge(1, 3));
        assert!(!graph.has_edge(2, 3));
        assert!(!graph.has_edge(1, 2));
        assert_eq!(graph.edge_count(), 4);
    }

    #[test]
    fn test_address_reuse_waits_for_free() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::heap_size(HEAP, 0, 0xa, Some(16)),
            Event::heap_free(HEAP, 0, 0xa, true),
            Event::heap_alloc(HEAP, 0, 32, 0xa),
            Event::heap_free(HEAP, 0, 0xa, true),
        ]));

        // Size and first alloc before the free
        assert!(graph.has_edge(1, 3));
        assert!(graph.has_edge(2, 3));
        // Reused address only after the free
        assert!(graph.has_edge(3, 4));
        // Second free belongs to the second instance
        assert!(graph.has_edge(4, 5));
        assert!(!graph.has_edge(1, 5));
    }

    #[test]
    fn test_realloc_chain() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::heap_realloc(HEAP, 0, 0xa, 64, 0xb),
            Event::heap_size(HEAP, 0, 0xb, Some(64)),
            Event::heap_alloc(HEAP, 0, 8, 0xa),
        ]));

        assert!(graph.has_edge(1, 2));
        assert!(graph.has_edge(2, 3));
        // 0xa was released by the realloc
        assert!(graph.has_edge(2, 4));
    }

    #[test]
    fn test_repeated_producer_starts_new_instance() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xb),
        ]));

        assert!(graph.has_edge(1, 2));
        assert!(graph.has_edge(2, 3));
    }

    #[test]
    fn test_unknown_handles_add_no_edges() {
        let graph = DependencyGraph::build(&log(vec![
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::heap_free(0x70_0000, 0, 0xdead, true),
        ]));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_failed_calls_produce_nothing() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, u64::MAX, 0),
            Event::heap_free(HEAP, 0, 0xa, false),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
        ]));

        // The failed free did not invalidate anything
        assert!(!graph.has_edge(2, 3));
    }

    #[test]
    fn test_respects() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::heap_alloc(HEAP, 0, 16, 0xb),
            Event::heap_free(HEAP, 0, 0xa, true),
        ]));

        assert!(graph.respects(&[0, 1, 2, 3]).is_ok());
        assert!(graph.respects(&[0, 2, 1, 3]).is_ok());
        assert!(graph.respects(&[0, 1, 3, 2]).is_ok());
        assert!(matches!(
            graph.respects(&[0, 3, 1, 2]),
            Err(StoryError::InvalidOrder(_))
        ));
        assert!(graph.respects(&[0, 1, 2]).is_err());
        assert!(graph.respects(&[0, 1, 1, 3]).is_err());
        assert!(graph.respects(&[0, 1, 2, 9]).is_err());
    }

    #[test]
    fn test_topological_capture_tie_break() {
        let graph = DependencyGraph::build(&log(vec![
            Event::get_process_heap(HEAP),
            Event::heap_alloc(HEAP, 0, 16, 0xa),
            Event::heap_alloc(HEAP, 0, 16, 0xb),
            Event::heap_free(HEAP, 0, 0xa, true),
        ]));

        assert_eq!(
            graph.topological(&[], TieBreak::CaptureOrder).unwrap(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(
            graph.topological(&[(3, 2)], TieBreak::CaptureOrder).unwrap(),
            vec![0, 1, 3, 2]
        );
        assert!(graph.topological(&[(3, 1)], TieBreak::CaptureOrder).is_err());
        assert!(graph.topological(&[(0, 7)], TieBreak::CaptureOrder).is_err());
    }

    #[test]
    fn test_seeded_order_is_reproducible() {
        let events: Vec<Event> = std::iter::once(Event::get_process_heap(HEAP))
            .chain((1..=20).map(|i| Event::heap_alloc(HEAP, 0, 16, i * 0x10)))
            .collect();
        let graph = DependencyGraph::build(&log(events));

        let a = graph.topological(&[], TieBreak::Seeded(7)).unwrap();
        let b = graph.topological(&[], TieBreak::Seeded(7)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0], 0);
        assert!(graph.respects(&a).is_ok());
    }
}

//! Synthetic heap traces
//!
//! Generates capture-ordered logs that look like a real process: the process
//! heap, a few private heaps, a mix of alloc/realloc/size/free with address
//! reuse, and private heaps destroyed at the end. Every generated call
//! succeeded at capture time, so replaying a synthetic log against a
//! growable [`SimulatedBackdrop`](bard_core::SimulatedBackdrop) never fails.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use bard_core::{Event, info_class};
use bard_storage::{EventLog, EventLogBuilder};

const PROCESS_HEAP: u64 = 0x0050_0000;
const PRIVATE_HEAP_BASE: u64 = 0x0100_0000;
const PRIVATE_HEAP_STRIDE: u64 = 0x0010_0000;
const BLOCK_BASE: u64 = 0x1000_0000;
const BLOCK_ALIGN: u64 = 0x10;

/// Shape of a synthetic trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthConfig {
    /// Approximate number of events; the closing destroys may add a few
    pub events: usize,
    pub seed: u64,
    /// Private heaps created next to the process heap
    pub private_heaps: usize,
    /// Largest single request in bytes
    pub max_request: u64,
    /// Chance that a new block reuses a freed address
    pub reuse_probability: f64,
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            events: 1000,
            seed: 0,
            private_heaps: 2,
            max_request: 4096,
            reuse_probability: 0.5,
        }
    }
}

impl SynthConfig {
    pub fn with_events(mut self, events: usize) -> Self {
        self.events = events;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_private_heaps(mut self, heaps: usize) -> Self {
        self.private_heaps = heaps;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    heap: u64,
    address: u64,
    size: u64,
}

/// Seeded generator of synthetic logs
pub struct TraceSynthesizer {
    config: SynthConfig,
    rng: StdRng,
    builder: EventLogBuilder,
    heaps: Vec<u64>,
    live: Vec<Block>,
    freed: Vec<u64>,
    next_address: u64,
}

impl TraceSynthesizer {
    pub fn new(config: SynthConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.seed),
            builder: EventLogBuilder::with_capacity(config.events + config.private_heaps + 4),
            heaps: Vec::new(),
            live: Vec::new(),
            freed: Vec::new(),
            next_address: BLOCK_BASE,
            config,
        }
    }

    /// Generate the whole log
    pub fn generate(mut self) -> EventLog {
        self.builder.append(Event::get_process_heap(PROCESS_HEAP));
        self.builder.append(Event::heap_set_information(
            0,
            info_class::HEAP_ENABLE_TERMINATION_ON_CORRUPTION,
            Vec::new(),
            true,
        ));
        self.heaps.push(PROCESS_HEAP);

        for i in 0..self.config.private_heaps as u64 {
            let heap = PRIVATE_HEAP_BASE + i * PRIVATE_HEAP_STRIDE;
            self.builder.append(Event::heap_create(0, 0x1000, 0, heap));
            self.heaps.push(heap);
        }

        while self.builder.len() + self.config.private_heaps < self.config.events {
            self.step();
        }

        // Private heaps take their remaining blocks with them
        for heap in self.heaps.iter().skip(1) {
            self.builder.append(Event::heap_destroy(*heap, true));
        }

        let log = self.builder.build();
        debug!(
            events = log.len(),
            seed = self.config.seed,
            "Synthesized trace"
        );
        log
    }

    fn step(&mut self) {
        let roll = self.rng.random_range(0..100u32);
        if self.live.is_empty() || roll < 45 {
            self.alloc();
        } else if roll < 75 {
            self.free();
        } else if roll < 85 {
            self.realloc();
        } else {
            self.size();
        }
    }

    fn request_size(&mut self) -> u64 {
        self.rng.random_range(1..=self.config.max_request.max(1))
    }

    /// A block address that is not live, preferring freed ones
    fn address(&mut self) -> u64 {
        if !self.freed.is_empty() && self.rng.random_bool(self.config.reuse_probability.clamp(0.0, 1.0)) {
            let pick = self.rng.random_range(0..self.freed.len());
            return self.freed.swap_remove(pick);
        }
        let address = self.next_address;
        self.next_address += (self.config.max_request + BLOCK_ALIGN) & !(BLOCK_ALIGN - 1);
        address
    }

    fn pick_live(&mut self) -> usize {
        self.rng.random_range(0..self.live.len())
    }

    fn alloc(&mut self) {
        let heap = self.heaps[self.rng.random_range(0..self.heaps.len())];
        let size = self.request_size();
        let address = self.address();
        self.builder.append(Event::heap_alloc(heap, 0, size, address));
        self.live.push(Block {
            heap,
            address,
            size,
        });
    }

    fn free(&mut self) {
        let pick = self.pick_live();
        let block = self.live.swap_remove(pick);
        self.builder
            .append(Event::heap_free(block.heap, 0, block.address, true));
        self.freed.push(block.address);
    }

    fn realloc(&mut self) {
        let pick = self.pick_live();
        let size = self.request_size();
        let address = self.address();
        let block = &mut self.live[pick];
        self.builder.append(Event::heap_realloc(
            block.heap,
            0,
            block.address,
            size,
            address,
        ));
        self.freed.push(block.address);
        block.address = address;
        block.size = size;
    }

    fn size(&mut self) {
        let pick = self.pick_live();
        let block = self.live[pick];
        self.builder.append(Event::heap_size(
            block.heap,
            0,
            block.address,
            Some(block.size),
        ));
    }
}

/// Generate a log in one call
pub fn synthesize(config: SynthConfig) -> EventLog {
    TraceSynthesizer::new(config).generate()
}

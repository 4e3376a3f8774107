pub const MIB: u64 = 1024 * 1024;

/// Files below this size never produce progress messages.
pub const PROGRESS_FLOOR: u64 = 50 * MIB;

const HALF_THREADS_ABOVE: u64 = 50 * MIB;
const FULL_THREADS_ABOVE: u64 = 100 * MIB;

/// Maps a declared file size to download parallelism and progress cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParallelismPolicy {
    max_threads: usize,
}

impl ParallelismPolicy {
    pub fn new(max_threads: usize) -> Self {
        Self { max_threads }
    }

    pub fn max_threads(&self) -> usize {
        self.max_threads
    }

    pub fn threads_for(&self, file_size: u64) -> usize {
        threads_for(file_size, self.max_threads)
    }

    pub fn update_cadence_for(&self, file_size: u64) -> u32 {
        update_cadence_for(file_size)
    }
}

pub fn threads_for(file_size: u64, configured_max: usize) -> usize {
    let threads = if file_size > FULL_THREADS_ABOVE {
        configured_max
    } else if file_size > HALF_THREADS_ABOVE {
        configured_max / 2
    } else {
        1
    };
    threads.max(1)
}

/// Number of progress ticks spread over 0-100%.
pub fn update_cadence_for(file_size: u64) -> u32 {
    if file_size > 1000 * MIB {
        50
    } else if file_size > 500 * MIB {
        20
    } else if file_size > 200 * MIB {
        10
    } else {
        5
    }
}

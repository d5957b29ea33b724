use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

const HOT_BIT: u64 = 1 << 63;
const STARTED_MASK: u64 = HOT_BIT - 1;

/// Spins before the waiting collector starts yielding its time slice.
const SPINS_BEFORE_YIELD: u32 = 64;

/// Generation swap between two physical copies of some state.
///
/// Writers bracket every access with [`HotCold::start`], which picks the
/// current hot index and counts the writer in. The guard it returns counts
/// the writer out when dropped. A single reader calls
/// [`HotCold::swap_hot_and_wait`], which flips the hot index so new writers
/// land in the other copy and returns once every writer that started on the
/// old copy is done. The reader then owns that copy until its next swap.
///
/// The started count and the hot index share one word so a writer reads the
/// index and registers itself in a single atomic step.
#[derive(Debug, Default)]
pub(crate) struct HotCold {
    /// Hot index in the top bit, writers started on it in the low 63 bits.
    started_and_hot: AtomicU64,
    ended: [AtomicU64; 2],
}

impl HotCold {
    /// Registers a writer against the current hot index.
    pub(crate) fn start(&self) -> HotGuard<'_> {
        let n = self.started_and_hot.fetch_add(1, Ordering::AcqRel);
        HotGuard {
            owner: self,
            idx: (n >> 63) as usize,
        }
    }

    /// Makes the cold copy hot and waits for the writers of the previously
    /// hot copy to finish. Returns the index of the now cold copy.
    ///
    /// Must not be called concurrently with itself.
    pub(crate) fn swap_hot_and_wait(&self) -> usize {
        let n = self.started_and_hot.load(Ordering::Acquire);
        let new_hot = (!n) & HOT_BIT;
        let n = self.started_and_hot.swap(new_hot, Ordering::AcqRel);
        let cold = (n >> 63) as usize;
        let started = n & STARTED_MASK;

        let mut spins = 0;
        while self.ended[cold].load(Ordering::Acquire) < started {
            if spins < SPINS_BEFORE_YIELD {
                spins += 1;
                std::hint::spin_loop();
            } else {
                thread::yield_now();
            }
        }
        // No writer can reach `cold` again until the next swap.
        self.ended[cold].store(0, Ordering::Release);
        cold
    }
}

/// Keeps a writer counted in on one copy of a [`HotCold`] pair.
#[derive(Debug)]
pub(crate) struct HotGuard<'a> {
    owner: &'a HotCold,
    idx: usize,
}

impl HotGuard<'_> {
    /// Index of the copy this writer must use.
    pub(crate) fn idx(&self) -> usize {
        self.idx
    }
}

impl Drop for HotGuard<'_> {
    fn drop(&mut self) {
        self.owner.ended[self.idx].fetch_add(1, Ordering::Release);
    }
}

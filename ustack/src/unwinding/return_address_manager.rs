//! Record of return addresses hijacked by uretprobes on one thread
//!
//! On entry to an instrumented function the uprobe captures the eight bytes at
//! the top of the stack: the caller's return address, just before the kernel
//! overwrites it with the trampoline. Samples taken while the function is
//! active unwind into the trampoline; splicing the recorded value back in
//! restores the real chain. Calls nest and recurse, hence a stack.

use log::debug;

use super::unwinder::CallChain;

/// Original return address recorded on probe entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReturnAddressFrame {
    /// Stack pointer at entry, i.e. the address of the hijacked slot
    pub stack_pointer: u64,
    pub return_address: u64,
}

/// Result of [`ReturnAddressManager::patch`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// The chain did not reach a trampoline
    Unchanged,
    /// Every trampoline frame was replaced
    Patched { spliced: usize },
    /// The chain still ends in a trampoline: the thread ran out of recorded
    /// return addresses, most likely because a probe entry was lost
    Exhausted { spliced: usize },
}

/// Stack of original return addresses for a single thread
#[derive(Debug, Clone, Default)]
pub struct ReturnAddressManager {
    frames: Vec<ReturnAddressFrame>,
}

impl ReturnAddressManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the return address about to be hijacked
    ///
    /// `stack_top` holds the word at `stack_pointer` as captured at entry.
    pub fn on_probe_entry(&mut self, stack_pointer: u64, stack_top: [u8; 8]) {
        let return_address = u64::from_le_bytes(stack_top);
        self.frames.push(ReturnAddressFrame {
            stack_pointer,
            return_address,
        });
    }

    /// Drop the most recent record and return its address
    ///
    /// Returns `None` when nothing is recorded, which happens when the
    /// matching entry was lost; the caller decides how to account for it.
    pub fn on_probe_exit(&mut self) -> Option<u64> {
        self.frames.pop().map(|f| f.return_address)
    }

    /// Splice recorded return addresses into a chain halted at a trampoline
    ///
    /// Records are used from most recent to least: the innermost trampoline
    /// frame belongs to the most recently entered instrumented call. After
    /// each replacement `splice` continues unwinding the chain, which may halt
    /// at the next trampoline. Records are only read; they are released by
    /// [`Self::on_probe_exit`].
    pub fn patch<F>(&self, chain: &mut CallChain, mut splice: F) -> PatchOutcome
    where
        F: FnMut(&mut CallChain, u64),
    {
        if !chain.is_halted_at_trampoline() {
            return PatchOutcome::Unchanged;
        }

        let mut recorded = self.frames.iter().rev();
        let mut spliced = 0;

        while chain.is_halted_at_trampoline() {
            let Some(frame) = recorded.next() else {
                debug!("Chain still in trampoline after splicing {spliced} return addresses");
                return PatchOutcome::Exhausted { spliced };
            };
            splice(chain, frame.return_address);
            spliced += 1;
        }

        PatchOutcome::Patched { spliced }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Most recent record
    #[must_use]
    pub fn top(&self) -> Option<&ReturnAddressFrame> {
        self.frames.last()
    }
}

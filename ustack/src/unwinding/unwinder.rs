//! Unwinding over captured stack snapshots and kernel callchains
//!
//! Everything here is a pure computation over data captured when the sample
//! was recorded: a register set, a copy of the stack starting at the stack
//! pointer, and the memory map valid at that time. The traced process is
//! never inspected live.
//!
//! Stack samples are walked with `framehop`. No modules are registered with
//! it, so every frame takes its frame-pointer fallback:
//!
//! ```text
//!   [fp + 8]  return address into the caller
//!   [fp + 0]  caller's saved frame pointer
//! ```
//!
//! A uretprobe rewrites `[fp + 8]` of the instrumented function to point into
//! the `[uprobes]` page. The saved frame pointer is left alone, so the walk
//! goes straight through the hijacked slot. Both kinds of sample then end up
//! as a flat list of addresses, which is cut at the first trampoline frame;
//! the rest is kept as the continuation used by [`Unwinder::splice`].

use std::fmt;

use framehop::x86_64::{CacheX86_64, UnwindRegsX86_64, UnwinderX86_64};
use framehop::Unwinder as _;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::domain::UnwindError;
use crate::memory::MemoryMapSnapshot;

/// Default bound on the number of frames in one chain
pub const DEFAULT_MAX_DEPTH: usize = 128;

/// `PERF_CONTEXT_HV`: hypervisor frames follow
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_HV: u64 = (-32_i64) as u64;

/// `PERF_CONTEXT_KERNEL`: kernel frames follow
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_KERNEL: u64 = (-128_i64) as u64;

/// `PERF_CONTEXT_USER`: user-space frames follow
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_USER: u64 = (-512_i64) as u64;

/// `PERF_CONTEXT_GUEST`: frames of a guest follow
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_GUEST: u64 = (-2048_i64) as u64;

/// `PERF_CONTEXT_GUEST_KERNEL`: guest kernel frames follow
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_GUEST_KERNEL: u64 = (-2176_i64) as u64;

/// `PERF_CONTEXT_GUEST_USER`: guest user-space frames follow
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_GUEST_USER: u64 = (-2560_i64) as u64;

/// `PERF_CONTEXT_MAX`: every value at or above this is a context marker
#[allow(clippy::cast_sign_loss)]
pub const PERF_CONTEXT_MAX: u64 = (-4095_i64) as u64;

/// Which privilege level the callchain frames being scanned belong to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContextMode {
    Hypervisor,
    Kernel,
    User,
    Guest,
}

impl ContextMode {
    fn from_context_frame(marker: u64) -> Option<Self> {
        match marker {
            PERF_CONTEXT_HV => Some(Self::Hypervisor),
            PERF_CONTEXT_KERNEL => Some(Self::Kernel),
            PERF_CONTEXT_USER => Some(Self::User),
            PERF_CONTEXT_GUEST | PERF_CONTEXT_GUEST_KERNEL | PERF_CONTEXT_GUEST_USER => {
                Some(Self::Guest)
            }
            _ => None,
        }
    }
}

/// Registers captured with a stack sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Registers {
    /// Instruction pointer (`rip`)
    pub ip: u64,
    /// Stack pointer (`rsp`); address of the first captured stack byte
    pub sp: u64,
    /// Frame pointer (`rbp`)
    pub fp: u64,
}

/// Borrowed copy of the stack, starting at `base`
#[derive(Debug, Clone, Copy)]
pub struct StackMemory<'a> {
    base: u64,
    bytes: &'a [u8],
}

impl<'a> StackMemory<'a> {
    #[must_use]
    pub fn new(base: u64, bytes: &'a [u8]) -> Self {
        Self { base, bytes }
    }

    /// Read a little-endian word at `addr`, if it lies fully inside the copy
    #[must_use]
    pub fn read_u64(&self, addr: u64) -> Option<u64> {
        let offset = usize::try_from(addr.checked_sub(self.base)?).ok()?;
        let word = self.bytes.get(offset..offset.checked_add(8)?)?;
        Some(u64::from_le_bytes(word.try_into().ok()?))
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Return addresses of one sample, innermost first
///
/// A chain is *halted* when its last frame is a trampoline address; it then
/// keeps the frames found beyond the trampoline until [`Unwinder::splice`]
/// puts the real return address in place.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallChain {
    frames: Vec<u64>,
    continuation: Option<Vec<u64>>,
}

impl CallChain {
    #[must_use]
    pub fn frames(&self) -> &[u64] {
        &self.frames
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Whether the last frame is a trampoline that still needs replacing
    #[must_use]
    pub fn is_halted_at_trampoline(&self) -> bool {
        self.continuation.is_some()
    }

    /// Number of frames that can be trusted without patching
    #[must_use]
    pub fn trusted_len(&self) -> usize {
        if self.is_halted_at_trampoline() {
            self.frames.len() - 1
        } else {
            self.frames.len()
        }
    }

    #[must_use]
    pub fn into_frames(self) -> Vec<u64> {
        self.frames
    }
}

/// Unwinding limits and trampoline identification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnwinderConfig {
    /// Upper bound on frames per chain, including spliced ones
    pub max_depth: usize,
    /// Trampoline address to recognize in addition to the `[uprobes]` page
    pub trampoline_address: Option<u64>,
}

impl UnwinderConfig {
    /// Whether `addr` is a hijacked return address
    #[must_use]
    pub fn is_trampoline(&self, addr: u64, maps: &MemoryMapSnapshot) -> bool {
        self.trampoline_address == Some(addr) || maps.is_trampoline(addr)
    }
}

impl Default for UnwinderConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            trampoline_address: None,
        }
    }
}

/// Stack and callchain unwinder
pub struct Unwinder {
    config: UnwinderConfig,
    frame_walker: UnwinderX86_64<Vec<u8>>,
    cache: CacheX86_64,
}

impl fmt::Debug for Unwinder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unwinder")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Default for Unwinder {
    fn default() -> Self {
        Self::new(UnwinderConfig::default())
    }
}

impl Unwinder {
    #[must_use]
    pub fn new(config: UnwinderConfig) -> Self {
        Self {
            config,
            frame_walker: UnwinderX86_64::new(),
            cache: CacheX86_64::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &UnwinderConfig {
        &self.config
    }

    /// Whether `addr` is a hijacked return address
    #[must_use]
    pub fn is_trampoline(&self, addr: u64, maps: &MemoryMapSnapshot) -> bool {
        self.config.is_trampoline(addr, maps)
    }

    /// Unwind a stack sample
    ///
    /// The walk stops at a non-executable return address, when a frame falls
    /// outside the captured stack, or at the depth limit. The chain is halted
    /// at the first trampoline frame.
    ///
    /// # Errors
    /// Fails when the stack copy is empty or the instruction pointer is not
    /// inside an executable mapping.
    pub fn unwind(
        &mut self,
        regs: &Registers,
        stack: &StackMemory<'_>,
        maps: &MemoryMapSnapshot,
    ) -> Result<CallChain, UnwindError> {
        if stack.is_empty() {
            return Err(UnwindError::EmptyStack);
        }
        // Inside the trampoline the instrumented function has already
        // returned, so the frame pointer belongs to the caller.
        if !self.is_trampoline(regs.ip, maps) && !maps.is_executable(regs.ip) {
            return Err(UnwindError::UnmappedInstructionPointer(regs.ip));
        }

        let frames = self.walk_stack(regs, stack, maps);
        let mut chain = CallChain::default();
        self.extend_chain(&mut chain, frames, maps);
        Ok(chain)
    }

    /// Turn a kernel-walked callchain into a [`CallChain`]
    ///
    /// Only user-space frames are kept: the context markers switch between
    /// kernel, user, hypervisor and guest frames, and frames before the first
    /// marker count as user-space. Zero entries are dropped. The kernel walks
    /// straight through hijacked slots, so the chain is halted at the first
    /// trampoline frame and the remaining frames are kept for [`Self::splice`].
    ///
    /// # Errors
    /// Fails when no user-space frame is left.
    pub fn walk_callchain(
        &self,
        ips: &[u64],
        maps: &MemoryMapSnapshot,
    ) -> Result<CallChain, UnwindError> {
        let mut mode = ContextMode::User;
        let mut frames = Vec::new();
        for &ip in ips {
            if ip >= PERF_CONTEXT_MAX {
                if let Some(new_mode) = ContextMode::from_context_frame(ip) {
                    mode = new_mode;
                }
                continue;
            }
            if mode == ContextMode::User && ip != 0 {
                frames.push(ip);
            }
        }
        if frames.is_empty() {
            return Err(UnwindError::EmptyCallchain);
        }

        let mut chain = CallChain::default();
        self.extend_chain(&mut chain, frames, maps);
        Ok(chain)
    }

    /// Replace the trailing trampoline frame of a halted chain with `original`
    /// and keep unwinding from there
    ///
    /// Chains that are not halted are left as is.
    pub fn splice(&self, chain: &mut CallChain, original: u64, maps: &MemoryMapSnapshot) {
        let Some(continuation) = chain.continuation.take() else {
            return;
        };
        if let Some(last) = chain.frames.last_mut() {
            *last = original;
        }
        self.extend_chain(chain, continuation, maps);
    }

    /// Collect the frames of a stack sample, trampolines included
    fn walk_stack(
        &mut self,
        regs: &Registers,
        stack: &StackMemory<'_>,
        maps: &MemoryMapSnapshot,
    ) -> Vec<u64> {
        let config = self.config;
        let mut read_stack = |addr: u64| stack.read_u64(addr).ok_or(());
        let unwind_regs = UnwindRegsX86_64::new(regs.ip, regs.sp, regs.fp);
        let mut iter = self.frame_walker.iter_frames(
            regs.ip,
            unwind_regs,
            &mut self.cache,
            &mut read_stack,
        );

        let mut frames = Vec::new();
        while frames.len() < config.max_depth {
            let address = match iter.next() {
                Ok(Some(frame)) => frame.address(),
                Ok(None) => break,
                Err(e) => {
                    debug!("Frame-pointer walk stopped after {} frames: {e:?}", frames.len());
                    break;
                }
            };
            let usable = frames.is_empty()
                || config.is_trampoline(address, maps)
                || maps.is_executable(address);
            if !usable {
                break;
            }
            frames.push(address);
        }
        frames
    }

    fn extend_chain(&self, chain: &mut CallChain, frames: Vec<u64>, maps: &MemoryMapSnapshot) {
        let mut rest = frames.into_iter();
        while chain.frames.len() < self.config.max_depth {
            let Some(ip) = rest.next() else {
                break;
            };
            chain.frames.push(ip);
            if self.is_trampoline(ip, maps) {
                chain.continuation = Some(rest.collect());
                return;
            }
        }
    }
}

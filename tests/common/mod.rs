//! Shared test harness: a fake VM over flat per-process memory with alias
//! mappings for shared regions, and helpers to build a kernel.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chan_r::kern::thread::{Completion, Wakeup};
use chan_r::vm::{MapAttrs, VmError, VmOps};
use chan_r::{KernelConfig, KernelState, ProcessId, ThreadId};

/// First address handed out for shared-region aliases
const ALIAS_BASE: usize = 0x4000_0000;
const ALIAS_STRIDE: usize = 0x0010_0000;

#[derive(Debug, Clone, Copy)]
struct Alias {
    pid: ProcessId,
    base: usize,
    size: usize,
    src_pid: ProcessId,
    src_base: usize,
    attrs: MapAttrs,
}

#[derive(Default)]
struct Memory {
    bytes: BTreeMap<(ProcessId, usize), u8>,
    aliases: Vec<Alias>,
    next_alias: usize,
}

impl Memory {
    /// Follow an alias to the backing process and address
    fn resolve(&self, pid: ProcessId, addr: usize) -> (ProcessId, usize) {
        self.aliases
            .iter()
            .find(|a| a.pid == pid && addr >= a.base && addr < a.base + a.size)
            .map(|a| (a.src_pid, a.src_base + (addr - a.base)))
            .unwrap_or((pid, addr))
    }
}

/// Flat byte memory per process; shared regions alias the source bytes
#[derive(Default)]
pub struct FakeVm {
    mem: Mutex<Memory>,
    fail_shares: AtomicBool,
}

impl FakeVm {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every following `share` fail with NoMemory
    pub fn fail_shares(&self, fail: bool) {
        self.fail_shares.store(fail, Ordering::SeqCst);
    }

    pub fn active_shares(&self) -> usize {
        self.mem.lock().unwrap().aliases.len()
    }

    pub fn write(&self, pid: ProcessId, addr: usize, data: &[u8]) {
        let mut mem = self.mem.lock().unwrap();
        for (i, byte) in data.iter().enumerate() {
            let key = mem.resolve(pid, addr + i);
            mem.bytes.insert(key, *byte);
        }
    }

    pub fn read(&self, pid: ProcessId, addr: usize, len: usize) -> Vec<u8> {
        let mem = self.mem.lock().unwrap();
        (0..len)
            .map(|i| {
                let key = mem.resolve(pid, addr + i);
                mem.bytes.get(&key).copied().unwrap_or(0)
            })
            .collect()
    }

    pub fn write_u32(&self, pid: ProcessId, addr: usize, value: u32) {
        self.write(pid, addr, &value.to_le_bytes());
    }

    pub fn read_u32(&self, pid: ProcessId, addr: usize) -> u32 {
        let bytes = self.read(pid, addr, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    pub fn write_words(&self, pid: ProcessId, addr: usize, words: &[u64]) {
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
        self.write(pid, addr, &bytes);
    }

    pub fn read_words(&self, pid: ProcessId, addr: usize, count: usize) -> Vec<u64> {
        self.read(pid, addr, count * 8)
            .chunks_exact(8)
            .map(|c| u64::from_le_bytes(c.try_into().unwrap()))
            .collect()
    }

    pub fn alias_attrs(&self, pid: ProcessId, addr: usize) -> Option<MapAttrs> {
        let mem = self.mem.lock().unwrap();
        mem.aliases
            .iter()
            .find(|a| a.pid == pid && a.base == addr)
            .map(|a| a.attrs)
    }
}

impl VmOps for FakeVm {
    fn share(
        &self,
        from: ProcessId,
        addr: usize,
        size: usize,
        to: ProcessId,
        attrs: MapAttrs,
    ) -> Result<usize, VmError> {
        if self.fail_shares.load(Ordering::SeqCst) {
            return Err(VmError::NoMemory);
        }
        if addr == 0 || size == 0 {
            return Err(VmError::BadAddress);
        }
        let mut mem = self.mem.lock().unwrap();
        let base = ALIAS_BASE + mem.next_alias * ALIAS_STRIDE;
        mem.next_alias += 1;
        let (src_pid, src_base) = mem.resolve(from, addr);
        mem.aliases.push(Alias {
            pid: to,
            base,
            size,
            src_pid,
            src_base,
            attrs,
        });
        Ok(base)
    }

    fn unshare(&self, pid: ProcessId, addr: usize, _size: usize) {
        let mut mem = self.mem.lock().unwrap();
        mem.aliases.retain(|a| !(a.pid == pid && a.base == addr));
    }

    fn copy_in(&self, pid: ProcessId, addr: usize, buf: &mut [u8]) -> Result<(), VmError> {
        if addr == 0 {
            return Err(VmError::BadAddress);
        }
        buf.copy_from_slice(&self.read(pid, addr, buf.len()));
        Ok(())
    }

    fn copy_out(&self, pid: ProcessId, addr: usize, buf: &[u8]) -> Result<(), VmError> {
        if addr == 0 {
            return Err(VmError::BadAddress);
        }
        self.write(pid, addr, buf);
        Ok(())
    }
}

/// A kernel over a fresh fake VM with the default configuration
pub fn kernel() -> (KernelState, Arc<FakeVm>) {
    kernel_with(KernelConfig::default())
}

pub fn kernel_with(config: KernelConfig) -> (KernelState, Arc<FakeVm>) {
    let vm = FakeVm::new();
    let kernel = KernelState::new(config, vm.clone()).unwrap();
    (kernel, vm)
}

/// New process with one thread at the default priority
pub fn spawn(kernel: &KernelState) -> (ProcessId, ThreadId) {
    let pid = kernel.process_create().unwrap();
    let tid = kernel.thread_create_default(pid).unwrap();
    (pid, tid)
}

/// Take a thread's wake-up result, failing the test if it has none
pub fn wakeup(kernel: &KernelState, tid: ThreadId) -> Wakeup {
    kernel
        .take_wakeup(tid)
        .unwrap_or_else(|| panic!("thread {} has no wake-up result", tid))
}

pub fn woken_with_message(kernel: &KernelState, tid: ThreadId) -> chan_r::ipc::ReceivedMessage {
    match wakeup(kernel, tid) {
        Ok(Completion::Message(msg)) => msg,
        other => panic!("thread {} woke with {:?}", tid, other),
    }
}

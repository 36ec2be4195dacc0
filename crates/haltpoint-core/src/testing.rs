//! In-memory backend for unit tests.
//!
//! `ScriptedBackend` fakes a stopped process: a few mapped byte ranges, one
//! register file per thread and a queue of raw stop events that
//! `wait_for_stop` hands out in order.

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, mpsc};

use crate::backend::{DebugBackend, RawStop, RawStopEvent, TargetInterrupt};
use crate::error::{DebuggerError, Result};
use crate::types::{Address, Architecture, ExitStatus, MemoryRegion, ProcessId, RegisterFile, ThreadId};

pub(crate) const PID: u32 = 4242;
/// Where a freshly launched fake process is stopped.
pub(crate) const LOADER_PC: u64 = 0x7f00_0000;

#[derive(Debug, Clone, Copy)]
pub(crate) struct ScriptStep
{
    pub event: RawStopEvent,
    /// Program counter of the reporting thread after the event.
    pub pc: Option<u64>,
}

/// Counts interrupt requests and, for a blocking backend, wakes the pending
/// `wait_for_stop`.
#[derive(Default)]
pub(crate) struct ScriptedInterrupt
{
    pub interrupts: AtomicUsize,
    pub terminations: AtomicUsize,
    wake: Mutex<Option<mpsc::Sender<RawStopEvent>>>,
}

impl ScriptedInterrupt
{
    fn wake(&self, event: RawStopEvent) -> bool
    {
        self.wake
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(|tx| tx.send(event).is_ok()))
            .unwrap_or(false)
    }
}

impl TargetInterrupt for ScriptedInterrupt
{
    fn interrupt(&self) -> bool
    {
        self.interrupts.fetch_add(1, Ordering::SeqCst);
        self.wake(RawStopEvent::on(ThreadId(u64::from(PID)), RawStop::Interrupted));
        true
    }

    fn terminate(&self) -> bool
    {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.wake(RawStopEvent::process(RawStop::Exited(ExitStatus::Signaled(9))));
        true
    }
}

pub(crate) struct ScriptedBackend
{
    architecture: Architecture,
    regions: Vec<(u64, Vec<u8>)>,
    registers: HashMap<ThreadId, RegisterFile>,
    threads: Vec<ThreadId>,
    script: VecDeque<ScriptStep>,
    pid: Option<ProcessId>,
    writes: usize,
    pub fail_launch: bool,
    pub calls: Arc<Mutex<Vec<String>>>,
    pub interrupt: Arc<ScriptedInterrupt>,
    pub entry: Option<Address>,
    blocker: Option<mpsc::Receiver<RawStopEvent>>,
}

impl ScriptedBackend
{
    pub fn new(architecture: Architecture) -> Self
    {
        Self {
            architecture,
            regions: Vec::new(),
            registers: HashMap::new(),
            threads: Vec::new(),
            script: VecDeque::new(),
            pid: None,
            writes: 0,
            fail_launch: false,
            calls: Arc::default(),
            interrupt: Arc::default(),
            entry: None,
            blocker: None,
        }
    }

    /// Once the script runs out, `wait_for_stop` blocks until the interrupt
    /// handle is used.
    pub fn blocking(mut self) -> Self
    {
        let (tx, rx) = mpsc::channel();
        if let Ok(mut slot) = self.interrupt.wake.lock() {
            *slot = Some(tx);
        }
        self.blocker = Some(rx);
        self
    }

    pub fn map(&mut self, start: u64, bytes: &[u8])
    {
        self.regions.push((start, bytes.to_vec()));
    }

    pub fn add_thread(&mut self, tid: u64, pc: u64)
    {
        let tid = ThreadId(tid);
        let mut regs = RegisterFile::new(self.architecture);
        regs.set_instruction_pointer(pc);
        self.registers.insert(tid, regs);
        self.threads.push(tid);
    }

    pub fn script(&mut self, thread: u64, kind: RawStop, pc: Option<u64>)
    {
        self.script.push_back(ScriptStep {
            event: RawStopEvent::on(ThreadId(thread), kind),
            pc,
        });
    }

    pub fn peek(&self, address: u64, len: usize) -> Vec<u8>
    {
        self.read_memory(Address::new(address), len).unwrap_or_default()
    }

    pub fn writes(&self) -> usize
    {
        self.writes
    }

    fn log(&self, call: String)
    {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    fn region_mut(&mut self, address: u64, len: usize) -> Option<&mut [u8]>
    {
        self.regions.iter_mut().find_map(|(start, bytes)| {
            let offset = address.checked_sub(*start)? as usize;
            bytes.get_mut(offset..offset.checked_add(len)?)
        })
    }
}

impl DebugBackend for ScriptedBackend
{
    fn launch(&mut self, program: &Path, args: &[String]) -> Result<ProcessId>
    {
        self.log(format!("launch {} {args:?}", program.display()));
        if self.fail_launch {
            return Err(DebuggerError::LaunchFailed("scripted failure".to_string()));
        }
        if self.threads.is_empty() {
            self.add_thread(u64::from(PID), LOADER_PC);
        }
        self.pid = Some(ProcessId(PID));
        Ok(ProcessId(PID))
    }

    fn attach(&mut self, pid: ProcessId) -> Result<()>
    {
        self.log(format!("attach {pid}"));
        if pid.raw() != PID {
            return Err(DebuggerError::ProcessNotFound(pid.raw()));
        }
        if self.threads.is_empty() {
            self.add_thread(u64::from(PID), 0x40_1000);
        }
        self.pid = Some(pid);
        Ok(())
    }

    fn detach(&mut self) -> Result<()>
    {
        self.log("detach".to_string());
        self.pid = None;
        Ok(())
    }

    fn kill(&mut self) -> Result<()>
    {
        self.log("kill".to_string());
        self.pid = None;
        Ok(())
    }

    fn resume(&mut self) -> Result<()>
    {
        self.log("resume".to_string());
        Ok(())
    }

    fn single_step(&mut self, thread: ThreadId) -> Result<()>
    {
        self.log(format!("step {thread}"));
        Ok(())
    }

    fn wait_for_stop(&mut self) -> Result<RawStopEvent>
    {
        let Some(step) = self.script.pop_front() else {
            let event = self
                .blocker
                .as_ref()
                .and_then(|rx| rx.recv().ok())
                .unwrap_or(RawStopEvent::process(RawStop::Exited(ExitStatus::Code(0))));
            if matches!(event.kind, RawStop::Exited(_)) {
                self.pid = None;
            }
            return Ok(event);
        };
        if let (Some(pc), Some(thread)) = (step.pc, step.event.thread) {
            if let Some(regs) = self.registers.get_mut(&thread) {
                regs.set_instruction_pointer(pc);
            }
        }
        if matches!(step.event.kind, RawStop::Exited(_)) {
            self.pid = None;
        }
        Ok(step.event)
    }

    fn read_memory(&self, address: Address, len: usize) -> Result<Vec<u8>>
    {
        let start = address.value();
        self.regions
            .iter()
            .find_map(|(base, bytes)| {
                let offset = start.checked_sub(*base)? as usize;
                bytes.get(offset..offset.checked_add(len)?).map(<[u8]>::to_vec)
            })
            .ok_or(DebuggerError::MemoryAccess { address, len })
    }

    fn write_memory(&mut self, address: Address, data: &[u8]) -> Result<()>
    {
        let slot = self
            .region_mut(address.value(), data.len())
            .ok_or(DebuggerError::MemoryAccess {
                address,
                len: data.len(),
            })?;
        slot.copy_from_slice(data);
        self.writes += 1;
        Ok(())
    }

    fn memory_regions(&self) -> Result<Vec<MemoryRegion>>
    {
        Ok(self
            .regions
            .iter()
            .map(|(start, bytes)| {
                MemoryRegion::new(
                    Address::new(*start),
                    Address::new(*start + bytes.len() as u64),
                    "r-x".to_string(),
                    None,
                )
            })
            .collect())
    }

    fn read_registers(&self, thread: ThreadId) -> Result<RegisterFile>
    {
        self.registers
            .get(&thread)
            .cloned()
            .ok_or(DebuggerError::UnknownThread(thread))
    }

    fn write_registers(&mut self, thread: ThreadId, registers: &RegisterFile) -> Result<()>
    {
        let slot = self
            .registers
            .get_mut(&thread)
            .ok_or(DebuggerError::UnknownThread(thread))?;
        *slot = registers.clone();
        Ok(())
    }

    fn threads(&self) -> Result<Vec<ThreadId>>
    {
        Ok(self.threads.clone())
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    fn process_id(&self) -> Option<ProcessId>
    {
        self.pid
    }

    fn runtime_entry_point(&self) -> Option<Address>
    {
        self.entry
    }

    fn interrupter(&self) -> Option<Arc<dyn TargetInterrupt>>
    {
        let handle: Arc<dyn TargetInterrupt> = self.interrupt.clone();
        Some(handle)
    }
}

#[derive(Debug)]
pub(crate) struct FixedImage
{
    pub path: std::path::PathBuf,
    pub entry: Address,
    pub architecture: Architecture,
}

impl FixedImage
{
    pub fn new(entry: u64, architecture: Architecture) -> Self
    {
        Self {
            path: std::path::PathBuf::from("/bin/fixed-image"),
            entry: Address::new(entry),
            architecture,
        }
    }
}

impl crate::image::TargetImage for FixedImage
{
    fn path(&self) -> &Path
    {
        &self.path
    }

    fn entry_point(&self) -> Address
    {
        self.entry
    }

    fn architecture(&self) -> Architecture
    {
        self.architecture
    }
}

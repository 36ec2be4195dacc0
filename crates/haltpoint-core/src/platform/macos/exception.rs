//! # Mach Exception Handling
//!
//! On macOS, hardware exceptions of a task (breakpoints, single-step traps,
//! bad accesses) are delivered as Mach messages to an *exception port*. The
//! backend allocates a receive right, registers it with
//! `task_set_exception_ports()`, and receives messages with `mach_msg()`.
//!
//! The faulting thread stays blocked until the message is answered:
//!
//! - `KERN_SUCCESS`: the exception is handled, the thread resumes
//! - `KERN_FAILURE`: the kernel converts it to the usual Unix signal, which
//!   is how a fault is passed on to the target after it has been reported
//!
//! ## References
//!
//! - [task_set_exception_ports(3) man page](https://developer.apple.com/documentation/kernel/1402149-task_set_exception_ports/)
//! - [mach_msg(3) man page](https://developer.apple.com/documentation/kernel/1402149-mach_msg/)

use std::mem::MaybeUninit;
use std::time::Duration;

use libc::{mach_port_t, thread_act_t};
use mach2::exc::{__Reply__exception_raise_t, __Request__exception_raise_t};
use mach2::exception_types::{
    EXC_ARITHMETIC, EXC_BAD_ACCESS, EXC_BAD_INSTRUCTION, EXC_BREAKPOINT, EXC_MASK_ARITHMETIC, EXC_MASK_BAD_ACCESS,
    EXC_MASK_BAD_INSTRUCTION, EXC_MASK_BREAKPOINT, EXCEPTION_DEFAULT,
};
use mach2::kern_return::{KERN_FAILURE, KERN_SUCCESS, kern_return_t};
use mach2::mach_port::{mach_port_allocate, mach_port_insert_right};
use mach2::message::{
    MACH_MSG_SUCCESS, MACH_MSG_TYPE_MAKE_SEND, MACH_MSG_TYPE_MOVE_SEND_ONCE, MACH_MSGH_BITS, MACH_RCV_LARGE, MACH_RCV_MSG,
    MACH_RCV_TIMED_OUT, MACH_RCV_TIMEOUT, MACH_SEND_MSG, MACH_MSG_TIMEOUT_NONE, mach_msg, mach_msg_header_t,
    mach_msg_size_t,
};
use mach2::ndr::NDR_record;
use mach2::port::{MACH_PORT_NULL, MACH_PORT_RIGHT_RECEIVE};
use mach2::task::task_set_exception_ports;
use mach2::thread_status::THREAD_STATE_NONE;
use mach2::traps::mach_task_self;

use crate::backend::{FaultKind, RawStop, TrapCause};
use crate::error::{DebuggerError, Result};
use crate::platform::macos::error::check;
use crate::platform::macos::ffi;

// EXC_BREAKPOINT codes on x86 (mach/i386/exception.h)
const EXC_I386_SGL: i32 = 1;
const EXC_I386_BPT: i32 = 2;

/// An exception message that has not been answered yet.
pub struct PendingException
{
    request: __Request__exception_raise_t,
}

impl std::fmt::Debug for PendingException
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("PendingException")
            .field("thread", &self.thread())
            .field("exception", &self.request.exception)
            .field("code", &self.request.code)
            .finish()
    }
}

impl PendingException
{
    /// Thread that raised the exception.
    pub fn thread(&self) -> thread_act_t
    {
        self.request.thread.name as thread_act_t
    }

    /// Classify the exception. `stepping` tells whether this thread was
    /// being single-stepped; ARM64 reports both kinds of trap with the same code.
    pub fn classify(&self, stepping: bool) -> RawStop
    {
        let code = self.request.code[0];
        match self.request.exception as u32 {
            EXC_BREAKPOINT => RawStop::Trap(breakpoint_cause(code, stepping)),
            EXC_BAD_ACCESS => RawStop::Fault(FaultKind::AccessViolation),
            EXC_BAD_INSTRUCTION => RawStop::Fault(FaultKind::IllegalInstruction),
            EXC_ARITHMETIC => RawStop::Fault(FaultKind::Arithmetic),
            _ => RawStop::Unknown,
        }
    }

    /// Whether the reply should pass the exception on as a signal.
    pub fn is_fault(&self) -> bool
    {
        matches!(self.request.exception as u32, EXC_BAD_ACCESS | EXC_BAD_INSTRUCTION | EXC_ARITHMETIC)
    }

    /// Answer the kernel, consuming the message.
    pub fn reply(self, handled: bool) -> Result<()>
    {
        let ret_code: kern_return_t = if handled { KERN_SUCCESS } else { KERN_FAILURE };
        let mut reply = __Reply__exception_raise_t {
            Head: mach_msg_header_t {
                msgh_bits: MACH_MSGH_BITS(MACH_MSG_TYPE_MOVE_SEND_ONCE, 0),
                msgh_size: std::mem::size_of::<__Reply__exception_raise_t>() as mach_msg_size_t,
                msgh_remote_port: self.request.Head.msgh_remote_port,
                msgh_local_port: MACH_PORT_NULL,
                msgh_voucher_port: MACH_PORT_NULL,
                msgh_id: self.request.Head.msgh_id + 100,
            },
            // SAFETY: NDR_record is an immutable extern static.
            NDR: unsafe { NDR_record },
            RetCode: ret_code,
        };

        // SAFETY: reply is a fully initialised message of the advertised size.
        let kr = unsafe {
            mach_msg(
                &mut reply.Head,
                MACH_SEND_MSG,
                reply.Head.msgh_size,
                0,
                MACH_PORT_NULL,
                MACH_MSG_TIMEOUT_NONE,
                MACH_PORT_NULL,
            )
        };
        if kr != MACH_MSG_SUCCESS {
            return Err(DebuggerError::ResumeFailed(format!("mach_msg reply failed: {kr}")));
        }
        Ok(())
    }
}

fn breakpoint_cause(code: i32, stepping: bool) -> TrapCause
{
    if cfg!(target_arch = "x86_64") {
        match code {
            EXC_I386_SGL => TrapCause::SingleStep,
            EXC_I386_BPT => TrapCause::Breakpoint,
            _ => TrapCause::Unknown,
        }
    } else if stepping {
        TrapCause::SingleStep
    } else {
        TrapCause::Breakpoint
    }
}

const DEBUG_EXCEPTIONS: u32 = EXC_MASK_BREAKPOINT | EXC_MASK_BAD_ACCESS | EXC_MASK_BAD_INSTRUCTION | EXC_MASK_ARITHMETIC;

/// Receive right registered as the exception port of one task.
#[derive(Debug)]
pub struct ExceptionPort
{
    port: mach_port_t,
}

impl ExceptionPort
{
    /// Allocate a port and route `task`'s debug-relevant exceptions to it.
    pub fn install(task: mach_port_t) -> Result<Self>
    {
        let mut port: mach_port_t = MACH_PORT_NULL;
        // SAFETY: plain Mach calls on our own task and the freshly allocated port.
        unsafe {
            check(mach_port_allocate(mach_task_self(), MACH_PORT_RIGHT_RECEIVE, &mut port))?;
            let installed = Self { port };
            check(mach_port_insert_right(mach_task_self(), port, port, MACH_MSG_TYPE_MAKE_SEND))?;
            check(task_set_exception_ports(
                task,
                DEBUG_EXCEPTIONS,
                port,
                EXCEPTION_DEFAULT as _,
                THREAD_STATE_NONE,
            ))?;
            Ok(installed)
        }
    }

    /// Hand `task`'s exceptions back to the default handlers.
    pub fn uninstall(&self, task: mach_port_t) -> Result<()>
    {
        // SAFETY: plain Mach call on a valid task port.
        check(unsafe { task_set_exception_ports(task, DEBUG_EXCEPTIONS, MACH_PORT_NULL, EXCEPTION_DEFAULT as _, THREAD_STATE_NONE) })
    }

    /// Wait up to `timeout` for the next exception.
    pub fn receive(&self, timeout: Duration) -> Result<Option<PendingException>>
    {
        let mut request = MaybeUninit::<__Request__exception_raise_t>::zeroed();
        let size = std::mem::size_of::<__Request__exception_raise_t>() as mach_msg_size_t;
        let millis = u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX);

        // SAFETY: request is a zeroed buffer of `size` bytes.
        let kr = unsafe {
            mach_msg(
                request.as_mut_ptr().cast::<mach_msg_header_t>(),
                MACH_RCV_MSG | MACH_RCV_LARGE | MACH_RCV_TIMEOUT,
                0,
                size,
                self.port,
                millis,
                MACH_PORT_NULL,
            )
        };
        match kr {
            MACH_MSG_SUCCESS => Ok(Some(PendingException {
                // SAFETY: mach_msg filled the message.
                request: unsafe { request.assume_init() },
            })),
            MACH_RCV_TIMED_OUT => Ok(None),
            other => Err(DebuggerError::SuspendFailed(format!("mach_msg receive failed: {other}"))),
        }
    }
}

impl Drop for ExceptionPort
{
    fn drop(&mut self)
    {
        // SAFETY: releases the send right inserted in `install`.
        unsafe {
            let _ = ffi::mach_port_deallocate(mach_task_self(), self.port);
        }
    }
}

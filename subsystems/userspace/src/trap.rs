//! # Trap Frames
//!
//! Register state saved on a synchronous exception from EL0.
//!
//! ## Syscall Convention (aarch64)
//! - Syscall number: x8
//! - Arguments: x0..x7
//! - Return: x0 (result code), x1 and x2 (output values)

use core::mem::size_of;
use pantheon_execution::stop_error;
use static_assertions::const_assert_eq;

/// Argument registers available to a syscall
pub const ARGUMENT_REGISTERS: usize = 8;

/// Register holding the syscall number
pub const SYSCALL_NUMBER_REGISTER: usize = 8;

/// Output registers after the result code
pub const OUTPUT_REGISTERS: usize = 2;

/// Saved user registers
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrapFrame {
    /// x0..x30
    pub regs: [u64; 31],
    /// SP_EL0
    pub sp: u64,
    /// ELR_EL1
    pub pc: u64,
    /// SPSR_EL1
    pub pstate: u64,
}

const_assert_eq!(size_of::<TrapFrame>(), 34 * 8);

impl TrapFrame {
    /// Frame for syscall `number` with `args` in x0 onwards
    pub fn syscall(number: u64, args: &[u64]) -> Self {
        let mut frame = Self::default();
        frame.regs[SYSCALL_NUMBER_REGISTER] = number;
        for (slot, value) in frame.regs.iter_mut().zip(args.iter().take(ARGUMENT_REGISTERS)) {
            *slot = *value;
        }
        frame
    }

    /// Syscall number
    pub fn syscall_number(&self) -> u64 {
        self.regs[SYSCALL_NUMBER_REGISTER]
    }

    /// Integer argument `index`
    pub fn get_int_argument(&self, index: usize) -> u64 {
        if index >= ARGUMENT_REGISTERS {
            stop_error!("syscall argument {} out of range", index);
        }
        self.regs[index]
    }

    /// Store the result code in x0
    pub fn set_result(&mut self, code: i64) {
        self.regs[0] = code as u64;
    }

    /// Result code in x0
    pub fn result(&self) -> i64 {
        self.regs[0] as i64
    }

    /// Store output value `index` (x1, x2)
    pub fn set_output(&mut self, index: usize, value: u64) {
        if index >= OUTPUT_REGISTERS {
            stop_error!("syscall output {} out of range", index);
        }
        self.regs[1 + index] = value;
    }

    /// Output value `index`
    pub fn output(&self, index: usize) -> u64 {
        self.regs[1 + index.min(OUTPUT_REGISTERS - 1)]
    }
}

//! CHIP-8 virtual machine core.
//!
//! The [`emu`] module holds the machine state, the opcode decoder and
//! executor, the save-state codec and a reference timing driver. Rendering,
//! audio and input are left to the host, which talks to the machine through
//! the frame buffer, the redraw flag, the tone requests and the keypad.

pub mod emu;
mod nibble;

pub use nibble::*;

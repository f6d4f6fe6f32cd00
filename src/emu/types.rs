/// Result type for CHIP-8 CPU cycle execution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Chip8Result {
    /// Continue executing instructions in the current frame.
    Continue,
    /// Wait for the next frame before continuing
    /// (e.g., after a draw instruction to limit the display update rate to the frame rate).
    WaitForNextFrame,
    /// An `Fx0A` instruction is waiting for a key transition. PC was not advanced,
    /// the next cycle checks the keypad again.
    AwaitingKey,
}

/// Error types that can occur during CHIP-8 emulation.
///
/// Every error is reported before the machine state is touched, so the caller
/// can halt, skip or reset as it sees fit.
#[derive(Debug, thiserror::Error)]
pub enum Chip8Error {
    #[error("Program is too large ({size} bytes), max size is {max_size} bytes")]
    ProgramTooLarge { size: usize, max_size: usize },

    #[error("Memory access out of bounds at address {address:#06X} (PC {pc:#05X})")]
    OutOfBounds { address: usize, pc: u16 },

    #[error("Stack overflow: call nesting exceeds {depth} levels (PC {pc:#05X})", depth = STACK_DEPTH)]
    StackOverflow { pc: u16 },

    #[error("Stack underflow: attempted to return from a subroutine with empty call stack (PC {pc:#05X})")]
    StackUnderflow { pc: u16 },

    #[error("Unsupported opcode: {opcode:#06X} (PC {pc:#05X})")]
    UnsupportedOpcode { opcode: u16, pc: u16 },

    #[error("Corrupt save state: {reason}")]
    CorruptState { reason: String },
}

impl Chip8Error {
    pub(crate) fn corrupt(reason: impl Into<String>) -> Self {
        Chip8Error::CorruptState {
            reason: reason.into(),
        }
    }
}

// Fixed by the CHIP-8 architecture
pub const MEMORY_SIZE: usize = 4096;
pub const ROM_START_ADDRESS: usize = 0x200;
pub const MAX_PROGRAM_SIZE: usize = MEMORY_SIZE - ROM_START_ADDRESS;
pub const STACK_DEPTH: usize = 16;
/// Highest valid 12-bit address.
pub const ADDRESS_MASK: u16 = 0x0FFF;

pub const DISPLAY_X: usize = 64;
pub const DISPLAY_Y: usize = 32;
pub const DISPLAY_SIZE: usize = DISPLAY_X * DISPLAY_Y;

/// The display buffer, flattened row-major (index = y * DISPLAY_X + x).
pub type FrameBuffer = [bool; DISPLAY_SIZE];

mod chip8;
mod execute;
mod font;
mod opcode;
mod runner;
mod snapshot;
mod types;

pub use chip8::*;
pub use font::*;
pub use opcode::*;
pub use runner::*;
pub use snapshot::*;
pub use types::*;

use rand::{SeedableRng, rngs::StdRng};

use super::{
    ADDRESS_MASK, Chip8Error, Chip8Result, DISPLAY_SIZE, DISPLAY_X, FONT, FONT_END_ADDRESS,
    FONT_START_ADDRESS, FrameBuffer, MAX_PROGRAM_SIZE, MEMORY_SIZE, Opcode, ROM_START_ADDRESS,
};
use crate::u4;

/// CHIP-8 virtual machine state
#[derive(Clone)]
pub struct Chip8 {
    /// 4KB memory array
    pub(crate) memory: [u8; MEMORY_SIZE],
    /// Display buffer: 64x32 monochrome pixels
    pub(crate) display: FrameBuffer,
    /// Set whenever a clear or draw touched the display
    pub(crate) redraw: bool,

    /// Program counter: address of the next instruction to execute
    pub(crate) pc: u16,
    /// Index register: used for memory operations
    pub(crate) i: u16,
    /// General-purpose registers V0-VF (VF is used as a flag register)
    pub(crate) v: [u8; 16],
    /// Call stack for subroutine returns
    pub(crate) stack: Vec<u16>,

    /// Delay timer: decrements at 60Hz until it reaches 0
    pub(crate) delay_timer: u8,
    /// Sound timer: decrements at 60Hz, beeps while non-zero
    pub(crate) sound_timer: u8,

    /// Keypad as it was when an FX0A wait began; the first key whose state
    /// differs from it ends the wait
    pub(crate) key_wait: Option<[bool; 16]>,
    /// Keypad state: 16 keys mapped as booleans (true = pressed)
    pub(crate) keypad: [bool; 16],

    /// Tone requests raised since the host last collected them
    pub(crate) tone_requests: u32,
    pub(crate) rng: StdRng,
}

impl Chip8 {
    /// Creates a machine in the reset state with an entropy-seeded RNG.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_os_rng())
    }

    /// Creates a machine whose `Cxnn` results are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let mut chip8 = Chip8 {
            memory: [0; MEMORY_SIZE],
            display: [false; DISPLAY_SIZE],
            redraw: false,
            pc: ROM_START_ADDRESS as u16,
            i: 0,
            v: [0; 16],
            stack: Vec::new(),
            delay_timer: 0,
            sound_timer: 0,
            key_wait: None,
            keypad: [false; 16],
            tone_requests: 0,
            rng,
        };
        chip8.reset();
        chip8
    }

    /// Returns the machine to its power-on state, keeping only the RNG.
    pub fn reset(&mut self) {
        self.memory = [0; MEMORY_SIZE];
        self.memory[FONT_START_ADDRESS..FONT_END_ADDRESS].copy_from_slice(&FONT);
        self.display = [false; DISPLAY_SIZE];
        self.redraw = false;

        self.pc = ROM_START_ADDRESS as u16;
        self.i = 0;
        self.v = [0; 16];
        self.stack.clear();

        self.delay_timer = 0;
        self.sound_timer = 0;

        self.key_wait = None;
        self.keypad = [false; 16];
        self.tone_requests = 0;

        log::debug!("machine reset");
    }

    /// Resets the machine and loads a program image at 0x200.
    ///
    /// An oversized image is rejected before anything is reset.
    pub fn load(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
        if rom.len() > MAX_PROGRAM_SIZE {
            return Err(Chip8Error::ProgramTooLarge {
                size: rom.len(),
                max_size: MAX_PROGRAM_SIZE,
            });
        }

        self.reset();

        let rom_end = ROM_START_ADDRESS + rom.len();
        self.memory[ROM_START_ADDRESS..rom_end].copy_from_slice(rom);

        log::debug!("loaded {} byte program at {:#05X}", rom.len(), ROM_START_ADDRESS);
        Ok(())
    }

    /// Executes a single CPU cycle (fetch, decode, execute).
    ///
    /// On error the machine is left exactly as it was before the call.
    /// After every successful cycle a tone request is raised if the sound
    /// timer is non-zero.
    pub fn cpu_cycle(&mut self) -> Result<Chip8Result, Chip8Error> {
        let opcode = self.fetch()?;
        let decoded_opcode = Opcode::decode(opcode);
        log::trace!("{:03X}: {:04X} {:?}", self.pc, opcode, decoded_opcode);

        let result = self.execute(decoded_opcode)?;

        if self.sound_timer > 0 {
            self.tone_requests = self.tone_requests.saturating_add(1);
        }

        Ok(result)
    }

    /// Updates the delay and sound timers. Should be called at 60Hz.
    pub fn timers_cycle(&mut self) {
        self.delay_timer = self.delay_timer.saturating_sub(1);
        self.sound_timer = self.sound_timer.saturating_sub(1);
    }

    /// Returns and clears the number of tone requests raised since the last call.
    pub fn take_tone_requests(&mut self) -> u32 {
        std::mem::take(&mut self.tone_requests)
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.keypad[key] = pressed;
    }

    /// Replace the whole keypad state at once.
    pub fn set_keys(&mut self, keys: &[bool; 16]) {
        self.keypad = *keys;
    }

    /// Get the state of a pixel on the display (true = on, false = off).
    pub fn get_display_pixel(&self, y: usize, x: usize) -> bool {
        self.display[y * DISPLAY_X + x]
    }

    pub fn frame_buffer(&self) -> &FrameBuffer {
        &self.display
    }

    /// True if the display changed since the last [`Chip8::clear_redraw`].
    pub fn needs_redraw(&self) -> bool {
        self.redraw
    }

    pub fn clear_redraw(&mut self) {
        self.redraw = false;
    }

    /// True while an `Fx0A` instruction is waiting for a key transition.
    pub fn awaiting_key(&self) -> bool {
        self.key_wait.is_some()
    }

    pub fn pc(&self) -> u16 {
        self.pc
    }

    pub fn i(&self) -> u16 {
        self.i
    }

    pub fn v(&self) -> &[u8; 16] {
        &self.v
    }

    pub fn stack(&self) -> &[u16] {
        &self.stack
    }

    pub fn delay_timer(&self) -> u8 {
        self.delay_timer
    }

    pub fn sound_timer(&self) -> u8 {
        self.sound_timer
    }

    pub fn keypad(&self) -> &[bool; 16] {
        &self.keypad
    }

    pub fn memory(&self) -> &[u8; MEMORY_SIZE] {
        &self.memory
    }

    /// Fetches the next 16-bit opcode from memory.
    fn fetch(&self) -> Result<u16, Chip8Error> {
        let addr = usize::from(self.pc);
        self.check_range(addr, 2)?;

        Ok(u16::from_be_bytes([self.memory[addr], self.memory[addr + 1]]))
    }

    /// Checks that `len` bytes starting at `start` lie inside memory.
    pub(crate) fn check_range(&self, start: usize, len: usize) -> Result<(), Chip8Error> {
        match (start + len).checked_sub(1) {
            Some(last) if last >= MEMORY_SIZE => Err(Chip8Error::OutOfBounds {
                address: last,
                pc: self.pc,
            }),
            _ => Ok(()),
        }
    }

    /// Checks that `address` fits in the 12-bit address space.
    pub(crate) fn check_address(&self, address: u16) -> Result<u16, Chip8Error> {
        if address > ADDRESS_MASK {
            return Err(Chip8Error::OutOfBounds {
                address: address.into(),
                pc: self.pc,
            });
        }
        Ok(address)
    }
}

impl Default for Chip8 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_seeds_font_and_clears_state() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.v[3] = 9;
        chip8.i = 0x300;
        chip8.pc = 0x400;
        chip8.stack.push(0x220);
        chip8.delay_timer = 4;
        chip8.display[10] = true;
        chip8.redraw = true;
        chip8.keypad[2] = true;
        chip8.memory[0x300] = 0xAA;

        chip8.reset();

        assert_eq!(chip8.pc, 0x200);
        assert_eq!(chip8.i, 0);
        assert_eq!(chip8.v, [0; 16]);
        assert!(chip8.stack.is_empty());
        assert_eq!(chip8.delay_timer, 0);
        assert!(chip8.display.iter().all(|&p| !p));
        assert!(!chip8.redraw);
        assert_eq!(chip8.keypad, [false; 16]);
        assert_eq!(chip8.memory[0x300], 0);
        assert_eq!(&chip8.memory[0x50..0xA0], &FONT[..]);
    }

    #[test]
    fn load_resets_before_copying() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.load(&[0x60, 0x05, 0x12, 0x00]).unwrap();
        chip8.cpu_cycle().unwrap();
        chip8.sound_timer = 3;
        chip8.stack.push(0x200);

        chip8.load(&[0xA1, 0x23]).unwrap();

        assert_eq!(chip8.pc, 0x200);
        assert_eq!(chip8.v[0], 0);
        assert_eq!(chip8.sound_timer, 0);
        assert!(chip8.stack.is_empty());
        assert_eq!(&chip8.memory[0x200..0x204], &[0xA1, 0x23, 0x00, 0x00]);

        chip8.cpu_cycle().unwrap();
        assert_eq!(chip8.i, 0x123);
        assert_eq!(chip8.pc, 0x202);
    }

    #[test]
    fn load_rejects_oversized_program_without_touching_state() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.load(&[0x60, 0x05]).unwrap();
        chip8.cpu_cycle().unwrap();

        let rom = vec![0u8; MAX_PROGRAM_SIZE + 1];
        let err = chip8.load(&rom).unwrap_err();

        assert!(matches!(
            err,
            Chip8Error::ProgramTooLarge {
                size: 0xE01,
                max_size: 0xE00
            }
        ));
        assert_eq!(chip8.v[0], 5);
        assert_eq!(chip8.pc, 0x202);
    }

    #[test]
    fn load_accepts_program_filling_memory() {
        let mut chip8 = Chip8::with_seed(1);
        let rom = vec![0xFFu8; MAX_PROGRAM_SIZE];
        chip8.load(&rom).unwrap();
        assert_eq!(chip8.memory[MEMORY_SIZE - 1], 0xFF);
    }

    #[test]
    fn fetch_past_end_of_memory_is_out_of_bounds() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.pc = 0xFFF;

        let err = chip8.cpu_cycle().unwrap_err();

        assert!(matches!(
            err,
            Chip8Error::OutOfBounds {
                address: 0x1000,
                pc: 0xFFF
            }
        ));
        assert_eq!(chip8.pc, 0xFFF);
    }

    #[test]
    fn timers_stop_at_zero() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.delay_timer = 3;
        chip8.sound_timer = 1;

        for _ in 0..5 {
            chip8.timers_cycle();
        }

        assert_eq!(chip8.delay_timer, 0);
        assert_eq!(chip8.sound_timer, 0);
    }

    #[test]
    fn tone_requested_once_per_cycle_while_sound_timer_runs() {
        let mut chip8 = Chip8::with_seed(1);
        // 6005: V0 = 5, F018: ST = V0, 1204: loop
        chip8.load(&[0x60, 0x05, 0xF0, 0x18, 0x12, 0x04]).unwrap();

        chip8.cpu_cycle().unwrap();
        assert_eq!(chip8.take_tone_requests(), 0);

        chip8.cpu_cycle().unwrap();
        chip8.cpu_cycle().unwrap();
        chip8.cpu_cycle().unwrap();
        assert_eq!(chip8.take_tone_requests(), 3);
        assert_eq!(chip8.take_tone_requests(), 0);

        // Ticking only decrements, it never raises a request
        for _ in 0..5 {
            chip8.timers_cycle();
        }
        assert_eq!(chip8.take_tone_requests(), 0);

        chip8.cpu_cycle().unwrap();
        assert_eq!(chip8.take_tone_requests(), 0);
    }

    #[test]
    fn redraw_flag_is_read_and_cleared_by_host() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.load(&[0x00, 0xE0]).unwrap();
        assert!(!chip8.needs_redraw());

        chip8.cpu_cycle().unwrap();
        assert!(chip8.needs_redraw());

        chip8.clear_redraw();
        assert!(!chip8.needs_redraw());
    }
}

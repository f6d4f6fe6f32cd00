use serde::{Deserialize, Serialize};

use super::{ADDRESS_MASK, Chip8, Chip8Error, DISPLAY_SIZE, MEMORY_SIZE, Opcode, STACK_DEPTH};

/// Schema version written by [`Chip8::save_state`].
pub const SAVE_STATE_VERSION: u32 = 1;

/// Serialized form of the complete machine state.
///
/// The display is stored one byte per pixel (0 or 1), row-major.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SaveState {
    pub version: u32,
    pub memory: Vec<u8>,
    pub v: [u8; 16],
    pub i: u16,
    pub pc: u16,
    pub stack: Vec<u16>,
    pub delay_timer: u8,
    pub sound_timer: u8,
    pub keypad: [bool; 16],
    pub display: Vec<u8>,
    pub redraw: bool,
    /// Keypad captured by a pending FX0A wait, if any.
    #[serde(default)]
    pub awaiting_key: Option<[bool; 16]>,
}

impl SaveState {
    pub fn capture(chip8: &Chip8) -> Self {
        SaveState {
            version: SAVE_STATE_VERSION,
            memory: chip8.memory.to_vec(),
            v: chip8.v,
            i: chip8.i,
            pc: chip8.pc,
            stack: chip8.stack.clone(),
            delay_timer: chip8.delay_timer,
            sound_timer: chip8.sound_timer,
            keypad: chip8.keypad,
            display: chip8.display.iter().map(|&p| u8::from(p)).collect(),
            redraw: chip8.redraw,
            awaiting_key: chip8.key_wait,
        }
    }

    /// Checks every field against the machine's invariants.
    pub fn validate(&self) -> Result<(), Chip8Error> {
        if self.version != SAVE_STATE_VERSION {
            return Err(Chip8Error::corrupt(format!(
                "unsupported version {} (expected {})",
                self.version, SAVE_STATE_VERSION
            )));
        }
        if self.memory.len() != MEMORY_SIZE {
            return Err(Chip8Error::corrupt(format!(
                "memory holds {} bytes, expected {}",
                self.memory.len(),
                MEMORY_SIZE
            )));
        }
        if self.display.len() != DISPLAY_SIZE {
            return Err(Chip8Error::corrupt(format!(
                "display holds {} pixels, expected {}",
                self.display.len(),
                DISPLAY_SIZE
            )));
        }
        if let Some(pos) = self.display.iter().position(|&p| p > 1) {
            return Err(Chip8Error::corrupt(format!(
                "display pixel {} has value {}",
                pos, self.display[pos]
            )));
        }
        if self.pc > ADDRESS_MASK {
            return Err(Chip8Error::corrupt(format!("pc {:#06X} out of range", self.pc)));
        }
        if self.i > ADDRESS_MASK {
            return Err(Chip8Error::corrupt(format!("index {:#06X} out of range", self.i)));
        }
        if self.stack.len() > STACK_DEPTH {
            return Err(Chip8Error::corrupt(format!(
                "stack depth {} exceeds {}",
                self.stack.len(),
                STACK_DEPTH
            )));
        }
        if let Some(addr) = self.stack.iter().find(|&&addr| addr > ADDRESS_MASK) {
            return Err(Chip8Error::corrupt(format!(
                "stack entry {:#06X} out of range",
                addr
            )));
        }
        if self.awaiting_key.is_some() && !self.waits_for_key_at_pc() {
            return Err(Chip8Error::corrupt(format!(
                "key wait pending but PC {:#05X} does not hold an Fx0A",
                self.pc
            )));
        }

        Ok(())
    }

    /// True if the word at PC decodes to an `Fx0A`.
    fn waits_for_key_at_pc(&self) -> bool {
        let pc = usize::from(self.pc);
        match self.memory.get(pc..pc + 2) {
            Some(&[hi, lo]) => matches!(
                Opcode::decode(u16::from_be_bytes([hi, lo])),
                Opcode::WaitForKey { .. }
            ),
            _ => false,
        }
    }

    /// Resets `chip8` and overwrites every field. Only call after [`SaveState::validate`].
    fn restore_into(self, chip8: &mut Chip8) {
        chip8.reset();

        chip8.memory.copy_from_slice(&self.memory);
        chip8.v = self.v;
        chip8.i = self.i;
        chip8.pc = self.pc;
        chip8.stack = self.stack;
        chip8.delay_timer = self.delay_timer;
        chip8.sound_timer = self.sound_timer;
        chip8.keypad = self.keypad;
        for (pixel, &value) in chip8.display.iter_mut().zip(&self.display) {
            *pixel = value == 1;
        }
        chip8.redraw = self.redraw;
        chip8.key_wait = self.awaiting_key;
    }
}

impl Chip8 {
    /// Serializes the complete machine state into a JSON blob.
    pub fn save_state(&self) -> serde_json::Result<String> {
        let blob = serde_json::to_string(&SaveState::capture(self))?;
        log::debug!("saved state at PC {:#05X} ({} bytes)", self.pc, blob.len());
        Ok(blob)
    }

    /// Replaces the machine state with the one stored in `blob`.
    ///
    /// The blob is parsed and validated in full first; on error the machine
    /// is left untouched.
    pub fn load_state(&mut self, blob: &str) -> Result<(), Chip8Error> {
        let state: SaveState = serde_json::from_str(blob)
            .map_err(|e| Chip8Error::corrupt(format!("malformed blob: {e}")))?;
        state.validate()?;

        state.restore_into(self);
        log::debug!("loaded state at PC {:#05X}", self.pc);
        Ok(())
    }

    /// Builds a new machine from a save-state blob.
    pub fn from_state(blob: &str) -> Result<Self, Chip8Error> {
        let mut chip8 = Chip8::new();
        chip8.load_state(blob)?;
        Ok(chip8)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::u4;

    fn busy_machine() -> Chip8 {
        let mut chip8 = Chip8::with_seed(7);
        // 6A2B A050 2208 ...; 0x208: 6009 F015 D005 00EE
        chip8
            .load(&[
                0x6A, 0x2B, 0xA0, 0x50, 0x22, 0x08, 0x00, 0x00, 0x60, 0x09, 0xF0, 0x15, 0xD0,
                0x05, 0x00, 0xEE,
            ])
            .unwrap();
        for _ in 0..6 {
            chip8.cpu_cycle().unwrap();
        }
        chip8.set_key(u4::new(4), true);
        chip8
    }

    fn assert_same_state(a: &Chip8, b: &Chip8) {
        assert_eq!(a.memory, b.memory);
        assert_eq!(a.v, b.v);
        assert_eq!(a.i, b.i);
        assert_eq!(a.pc, b.pc);
        assert_eq!(a.stack, b.stack);
        assert_eq!(a.delay_timer, b.delay_timer);
        assert_eq!(a.sound_timer, b.sound_timer);
        assert_eq!(a.keypad, b.keypad);
        assert_eq!(a.display, b.display);
        assert_eq!(a.redraw, b.redraw);
        assert_eq!(a.key_wait, b.key_wait);
    }

    #[test]
    fn round_trip_is_lossless() {
        let chip8 = busy_machine();
        assert_eq!(chip8.stack, vec![0x204]);
        assert!(chip8.display.iter().any(|&p| p));

        let blob = chip8.save_state().unwrap();
        let restored = Chip8::from_state(&blob).unwrap();

        assert_same_state(&chip8, &restored);
    }

    #[test]
    fn fresh_machine_round_trips() {
        let chip8 = Chip8::with_seed(1);
        let restored = Chip8::from_state(&chip8.save_state().unwrap()).unwrap();
        assert_same_state(&chip8, &restored);
    }

    #[test]
    fn load_replaces_every_field() {
        let blob = Chip8::with_seed(1).save_state().unwrap();
        let mut chip8 = busy_machine();

        chip8.load_state(&blob).unwrap();

        assert_same_state(&chip8, &Chip8::with_seed(1));
    }

    #[test]
    fn pending_key_wait_survives_round_trip() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.load(&[0xF2, 0x0A]).unwrap();
        chip8.cpu_cycle().unwrap();
        assert!(chip8.awaiting_key());

        let mut restored = Chip8::from_state(&chip8.save_state().unwrap()).unwrap();
        assert!(restored.awaiting_key());

        restored.set_key(u4::new(6), true);
        restored.cpu_cycle().unwrap();
        assert_eq!(restored.v[2], 6);
    }

    #[test]
    fn key_wait_must_sit_on_a_wait_instruction() {
        let mut chip8 = Chip8::with_seed(1);
        chip8.load(&[0xF2, 0x0A]).unwrap();
        chip8.cpu_cycle().unwrap();
        let mut state = SaveState::capture(&chip8);
        assert!(state.validate().is_ok());

        // Program patched under a pending wait
        state.memory[0x200] = 0x62;
        assert!(matches!(state.validate(), Err(Chip8Error::CorruptState { .. })));

        // Last byte of memory cannot hold a whole instruction
        state.memory[0x200] = 0xF2;
        state.pc = 0xFFF;
        assert!(matches!(state.validate(), Err(Chip8Error::CorruptState { .. })));
    }

    fn tampered(edit: impl FnOnce(&mut SaveState)) -> String {
        let mut state = SaveState::capture(&busy_machine());
        edit(&mut state);
        serde_json::to_string(&state).unwrap()
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let cases = [
            tampered(|s| s.version = 2),
            tampered(|s| s.pc = 0x1000),
            tampered(|s| s.i = 0x1234),
            tampered(|s| s.stack = vec![0x200; STACK_DEPTH + 1]),
            tampered(|s| s.stack = vec![0xF000]),
            tampered(|s| s.memory.truncate(100)),
            tampered(|s| s.display.push(0)),
            tampered(|s| s.display[5] = 2),
            tampered(|s| s.awaiting_key = Some([false; 16])),
        ];

        for blob in cases {
            assert!(
                matches!(Chip8::from_state(&blob), Err(Chip8Error::CorruptState { .. })),
                "accepted {blob:.80}"
            );
        }
    }

    #[test]
    fn rejects_malformed_blobs() {
        for blob in ["", "{}", "not json", r#"{"version":1}"#] {
            assert!(matches!(
                Chip8::from_state(blob),
                Err(Chip8Error::CorruptState { .. })
            ));
        }

        let mut value: serde_json::Value =
            serde_json::from_str(&busy_machine().save_state().unwrap()).unwrap();
        value.as_object_mut().unwrap().remove("pc");
        assert!(matches!(
            Chip8::from_state(&value.to_string()),
            Err(Chip8Error::CorruptState { .. })
        ));
    }

    #[test]
    fn failed_load_leaves_machine_untouched() {
        let mut chip8 = busy_machine();
        let before = chip8.clone();

        let err = chip8.load_state(&tampered(|s| s.pc = 0xFFFF)).unwrap_err();

        assert!(matches!(err, Chip8Error::CorruptState { .. }));
        assert_same_state(&chip8, &before);
    }
}

use rand::Rng;

use super::{
    ADDRESS_MASK, Chip8, Chip8Error, Chip8Result, DISPLAY_SIZE, DISPLAY_X, DISPLAY_Y,
    FONT_GLYPH_SIZE, FONT_START_ADDRESS, Opcode, OpcodeALU, STACK_DEPTH,
};
use crate::u4;

impl Chip8 {
    /// Applies a decoded opcode.
    ///
    /// Preconditions (stack depth, memory ranges, jump targets) are checked
    /// before any field is written, so an error leaves the machine untouched.
    /// PC never leaves the 12-bit address space.
    pub(crate) fn execute(&mut self, opcode: Opcode) -> Result<Chip8Result, Chip8Error> {
        let next = self.pc.wrapping_add(2);
        let skip = self.pc.wrapping_add(4);
        let skip_if = |cond: bool| if cond { skip } else { next };

        if opcode.falls_through() {
            self.check_address(next)?;
        }

        let mut result = Chip8Result::Continue;

        let next_pc = match opcode {
            Opcode::ClearDisplay => {
                self.display = [false; DISPLAY_SIZE];
                self.redraw = true;
                next
            }
            Opcode::Jump { nnn } => nnn,
            Opcode::JumpWithOffset { nnn } => {
                self.check_address(nnn.wrapping_add(self.v[0].into()))?
            }
            Opcode::Call { nnn } => {
                if self.stack.len() >= STACK_DEPTH {
                    return Err(Chip8Error::StackOverflow { pc: self.pc });
                }
                self.stack.push(self.pc);
                nnn
            }
            Opcode::Return => {
                let call_address = *self
                    .stack
                    .last()
                    .ok_or(Chip8Error::StackUnderflow { pc: self.pc })?;
                // The stack holds the address of the call itself
                let return_address = self.check_address(call_address.wrapping_add(2))?;
                self.stack.pop();
                return_address
            }
            Opcode::SkipRegEqualImm { x, nn } => skip_if(self.v[x] == nn),
            Opcode::SkipRegNotEqualImm { x, nn } => skip_if(self.v[x] != nn),
            Opcode::SkipRegEqualReg { x, y } => skip_if(self.v[x] == self.v[y]),
            Opcode::SkipRegNotEqualReg { x, y } => skip_if(self.v[x] != self.v[y]),
            Opcode::SetRegImm { x, nn } => {
                self.v[x] = nn;
                next
            }
            Opcode::AddRegImm { x, nn } => {
                self.v[x] = self.v[x].wrapping_add(nn);
                next
            }
            Opcode::ALU { x, y, op } => {
                self.execute_alu(x, y, op);
                next
            }
            Opcode::Random { x, nn } => {
                let rand_byte: u8 = self.rng.random();
                self.v[x] = rand_byte & nn;
                next
            }
            Opcode::SetIndexImm { nnn } => {
                self.i = nnn;
                next
            }
            Opcode::AddIndexReg { x } => {
                self.i = self.i.wrapping_add(self.v[x].into()) & ADDRESS_MASK;
                next
            }
            Opcode::Draw { x, y, n } => {
                self.execute_draw(x, y, n)?;
                result = Chip8Result::WaitForNextFrame;
                next
            }
            Opcode::SkipIfPressed { x } => skip_if(self.keypad[u4::from_low_bits(self.v[x])]),
            Opcode::SkipIfNotPressed { x } => skip_if(!self.keypad[u4::from_low_bits(self.v[x])]),
            Opcode::WaitForKey { x } => {
                if self.execute_wait_for_key(x) {
                    next
                } else {
                    result = Chip8Result::AwaitingKey;
                    self.pc
                }
            }
            Opcode::ReadDelayTimer { x } => {
                self.v[x] = self.delay_timer;
                next
            }
            Opcode::SetDelayTimer { x } => {
                self.delay_timer = self.v[x];
                next
            }
            Opcode::SetSoundTimer { x } => {
                self.sound_timer = self.v[x];
                next
            }
            Opcode::FontChar { x } => {
                self.i = (FONT_START_ADDRESS + usize::from(self.v[x]) * FONT_GLYPH_SIZE) as u16;
                next
            }
            Opcode::BCD { x } => {
                let start = usize::from(self.i);
                self.check_range(start, 3)?;

                let value = self.v[x];
                self.memory[start] = value / 100;
                self.memory[start + 1] = (value / 10) % 10;
                self.memory[start + 2] = value % 10;
                next
            }
            Opcode::StoreRegs { x } => {
                let start = usize::from(self.i);
                let count = usize::from(x) + 1;
                self.check_range(start, count)?;

                self.memory[start..start + count].copy_from_slice(&self.v[..count]);
                next
            }
            Opcode::LoadRegs { x } => {
                let start = usize::from(self.i);
                let count = usize::from(x) + 1;
                self.check_range(start, count)?;

                self.v[..count].copy_from_slice(&self.memory[start..start + count]);
                next
            }
            Opcode::Unknown(opcode) => {
                return Err(Chip8Error::UnsupportedOpcode {
                    opcode,
                    pc: self.pc,
                });
            }
        };

        // Skips are the only arms that reach here without a checked target
        self.pc = self.check_address(next_pc)?;
        Ok(result)
    }

    fn execute_alu(&mut self, x: u4, y: u4, op: OpcodeALU) {
        let (vx, vy) = (self.v[x], self.v[y]);

        // VF is written after the result, so the flag wins when x is F
        match op {
            OpcodeALU::Set => self.v[x] = vy,
            OpcodeALU::Or => self.v[x] = vx | vy,
            OpcodeALU::And => self.v[x] = vx & vy,
            OpcodeALU::Xor => self.v[x] = vx ^ vy,
            OpcodeALU::Add => {
                let (res, overflow) = vx.overflowing_add(vy);
                self.v[x] = res;
                self.v[0xF] = u8::from(overflow);
            }
            OpcodeALU::Sub => {
                self.v[x] = vx.wrapping_sub(vy);
                self.v[0xF] = u8::from(vx > vy);
            }
            OpcodeALU::SubReverse => {
                self.v[x] = vy.wrapping_sub(vx);
                self.v[0xF] = u8::from(vy > vx);
            }
            OpcodeALU::ShiftRight => {
                self.v[x] = vx >> 1;
                self.v[0xF] = vx & 1;
            }
            OpcodeALU::ShiftLeft => {
                self.v[x] = vx << 1;
                self.v[0xF] = vx >> 7;
            }
        }
    }

    fn execute_draw(&mut self, x: u4, y: u4, n: u4) -> Result<(), Chip8Error> {
        let sprite_start = usize::from(self.i);
        let row_count = usize::from(n);
        self.check_range(sprite_start, row_count)?;

        let x_pos = self.v[x] as usize % DISPLAY_X;
        let y_pos = self.v[y] as usize % DISPLAY_Y;

        let mut collision = false;
        for row in 0..row_count {
            let sprite_byte = self.memory[sprite_start + row];
            let pixel_y = (y_pos + row) % DISPLAY_Y;

            for col in 0..8 {
                // If current sprite bit is non-zero
                if (sprite_byte & (0x80 >> col)) != 0 {
                    let pixel_x = (x_pos + col) % DISPLAY_X;
                    let pixel = &mut self.display[pixel_y * DISPLAY_X + pixel_x];

                    collision |= *pixel;
                    // Flip the pixel
                    *pixel ^= true;
                }
            }
        }

        self.v[0xF] = u8::from(collision);
        self.redraw = true;
        Ok(())
    }

    /// Returns true once a key has changed state since the wait began.
    fn execute_wait_for_key(&mut self, x: u4) -> bool {
        let Some(initial) = self.key_wait else {
            // First visit: remember the keypad and yield
            self.key_wait = Some(self.keypad);
            return false;
        };

        match u4::all().find(|&key| self.keypad[key] != initial[key]) {
            Some(key) => {
                self.v[x] = key.into();
                self.key_wait = None;
                true
            }
            None => false,
        }
    }
}

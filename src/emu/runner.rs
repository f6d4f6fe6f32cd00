use super::{Chip8, Chip8Error, Chip8Result};
use crate::u4;

pub const TIMER_HZ: f32 = 60.0;
pub const TIMER_TIME_STEP: f32 = 1.0 / TIMER_HZ;

/// Instructions per timer tick, roughly 700 instructions per second.
pub const DEFAULT_CYCLES_PER_TICK: u32 = 12;

/// Most timer ticks a single `update` will catch up on.
const MAX_TICKS_PER_UPDATE: u32 = 4;

/// High-level emulator runner that manages timing internally.
///
/// Timers always tick at 60Hz; the clock rate only changes how many
/// instructions run between two ticks.
pub struct Chip8Runner {
    chip8: Chip8,
    cycles_per_tick: u32,
    timer_dt_accumulator: f32,
}

impl Chip8Runner {
    pub fn new(chip8: Chip8) -> Self {
        Self::with_cycles_per_tick(chip8, DEFAULT_CYCLES_PER_TICK)
    }

    pub fn with_cycles_per_tick(chip8: Chip8, cycles_per_tick: u32) -> Self {
        Self {
            chip8,
            cycles_per_tick: cycles_per_tick.max(1),
            timer_dt_accumulator: 0.0,
        }
    }

    /// Update emulator by delta time, handles both CPU and timer cycles.
    ///
    /// Runs one tick per elapsed 1/60 s. Returns the result of the last
    /// cycle that ran, so the host knows whether a key wait is pending.
    pub fn update(&mut self, dt: f32) -> Result<Chip8Result, Chip8Error> {
        self.timer_dt_accumulator += dt;

        let mut result = Chip8Result::Continue;
        let mut ticks = 0;
        while self.timer_dt_accumulator >= TIMER_TIME_STEP {
            if ticks == MAX_TICKS_PER_UPDATE {
                // We clear the accumulator to avoid "catching up" too fast after a stall.
                log::debug!("dropping {:.3}s of emulation backlog", self.timer_dt_accumulator);
                self.timer_dt_accumulator = 0.0;
                break;
            }

            self.timer_dt_accumulator -= TIMER_TIME_STEP;
            result = self.tick()?;
            ticks += 1;
        }

        Ok(result)
    }

    /// Runs up to `cycles_per_tick` instructions, then one timer tick.
    ///
    /// Anything other than `Continue` ends the instruction burst early. The
    /// timers tick even when the burst fails.
    pub fn tick(&mut self) -> Result<Chip8Result, Chip8Error> {
        let mut result = Ok(Chip8Result::Continue);

        for _ in 0..self.cycles_per_tick {
            result = self
                .chip8
                .cpu_cycle()
                .inspect_err(|e| log::warn!("cpu cycle failed: {e}"));

            if !matches!(result, Ok(Chip8Result::Continue)) {
                break;
            }
        }

        self.chip8.timers_cycle();
        result
    }

    /// Loads a new program, discarding any pending key wait and timing backlog.
    pub fn load(&mut self, rom: &[u8]) -> Result<(), Chip8Error> {
        self.chip8.load(rom)?;
        self.timer_dt_accumulator = 0.0;
        Ok(())
    }

    pub fn cycles_per_tick(&self) -> u32 {
        self.cycles_per_tick
    }

    pub fn set_cycles_per_tick(&mut self, cycles_per_tick: u32) {
        self.cycles_per_tick = cycles_per_tick.max(1);
    }

    /// Changes the clock rate by `delta` instructions per tick, never going
    /// below one. Returns the new rate.
    pub fn adjust_cycles_per_tick(&mut self, delta: i32) -> u32 {
        self.set_cycles_per_tick(self.cycles_per_tick.saturating_add_signed(delta));
        log::debug!("clock rate set to {} cycles per tick", self.cycles_per_tick);
        self.cycles_per_tick
    }

    /// Set the state of a key on the keypad.
    pub fn set_key(&mut self, key: u4, pressed: bool) {
        self.chip8.set_key(key, pressed)
    }

    pub fn chip8_ref(&self) -> &Chip8 {
        &self.chip8
    }

    pub fn chip8_mut(&mut self) -> &mut Chip8 {
        &mut self.chip8
    }
}

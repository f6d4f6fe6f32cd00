use std::{path::PathBuf, sync::Arc, time::Instant};

use anyhow::Context;
use clap::Parser;
use pixels::{Pixels, SurfaceTexture};
use rodio::{OutputStream, OutputStreamBuilder, Sink, Source, source::SquareWave};
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{Key, KeyCode, NamedKey, PhysicalKey},
    window::{Window, WindowId},
};

use chip8_vm::{
    emu::{
        Chip8, Chip8Runner, DEFAULT_CYCLES_PER_TICK, DISPLAY_SIZE, DISPLAY_X, DISPLAY_Y, TIMER_HZ,
    },
    u4,
};

/// The rate at which pixels fade out (phosphor decay).
const DISPLAY_PHOSPHOR_RATE: f32 = 10.0;

/// Mapping from physical keyboard keys to CHIP-8 hex keypad (0x0-0xF).
const KEY_MAP: [KeyCode; 16] = [
    KeyCode::KeyX,   // 0x00
    KeyCode::Digit1, // 0x01
    KeyCode::Digit2, // 0x02
    KeyCode::Digit3, // 0x03
    KeyCode::KeyQ,   // 0x04
    KeyCode::KeyW,   // 0x05
    KeyCode::KeyE,   // 0x06
    KeyCode::KeyA,   // 0x07
    KeyCode::KeyS,   // 0x08
    KeyCode::KeyD,   // 0x09
    KeyCode::KeyZ,   // 0x0A
    KeyCode::KeyC,   // 0x0B
    KeyCode::Digit4, // 0x0C
    KeyCode::KeyR,   // 0x0D
    KeyCode::KeyF,   // 0x0E
    KeyCode::KeyV,   // 0x0F
];

const SAVE_STATE_KEY: KeyCode = KeyCode::F5;
const LOAD_STATE_KEY: KeyCode = KeyCode::F9;
const RELOAD_KEY: KeyCode = KeyCode::Backspace;
const FASTER_KEY: KeyCode = KeyCode::Equal;
const SLOWER_KEY: KeyCode = KeyCode::Minus;

/// Instructions per tick added or removed by one press of the clock keys.
const CYCLES_PER_TICK_STEP: i32 = 2;

struct App {
    pixels: Option<Pixels<'static>>,
    window: Option<Arc<Window>>,
    /// Stores the brightness of each pixel (0.0 to 1.0) to implement phosphor decay.
    display_float: [f32; DISPLAY_SIZE],
    /// Set when the surface lost its contents and must be repainted.
    surface_dirty: bool,

    /// Audio output stream (must be kept alive).
    _audio_stream: OutputStream,
    audio_sink: Sink,

    runner: Chip8Runner,
    rom: Vec<u8>,
    state_file: PathBuf,
    /// Used for delta time calculation.
    last_frame_instant: Instant,

    /// Stores the result of the application to be returned from main.
    exit_result: anyhow::Result<()>,
}

impl App {
    fn new(args: &Args, rom: Vec<u8>) -> anyhow::Result<Self> {
        // Initialize audio
        let mut _audio_stream = OutputStreamBuilder::open_default_stream()
            .context("Failed to open audio output stream")?;
        _audio_stream.log_on_drop(false);

        let audio_sink = Sink::connect_new(_audio_stream.mixer());
        audio_sink.pause();
        audio_sink.append(SquareWave::new(440.0).amplify(0.5));

        // Initialize CHIP-8
        let mut chip8 = match args.seed {
            Some(seed) => Chip8::with_seed(seed),
            None => Chip8::new(),
        };
        chip8
            .load(&rom)
            .context("Failed to load ROM into CHIP-8 memory")?;
        let runner = Chip8Runner::with_cycles_per_tick(chip8, args.cycles_per_tick);

        let state_file = args
            .state_file
            .clone()
            .unwrap_or_else(|| args.rom_path.with_extension("state.json"));

        Ok(Self {
            pixels: None,
            window: None,
            display_float: [0.0; DISPLAY_SIZE],
            surface_dirty: true,

            _audio_stream,
            audio_sink,

            runner,
            rom,
            state_file,
            last_frame_instant: Instant::now(),
            exit_result: Ok(()),
        })
    }

    /// Updates pixel brightness and returns true if the frame needs to be rendered.
    fn process_display(&mut self, dt: f32) -> bool {
        let chip8 = self.runner.chip8_mut();
        let fading = self.display_float.iter().any(|&b| b > 0.0 && b < 1.0);
        if !chip8.needs_redraw() && !fading && !self.surface_dirty {
            return false;
        }

        let Some(pixels) = self.pixels.as_mut() else {
            return false;
        };
        let frame_buffer = chip8.frame_buffer();

        for (i, pxl) in pixels.frame_mut().chunks_exact_mut(4).enumerate() {
            // We use display_float to track the "brightness" of each pixel over time.
            // This allows us to implement a phosphor decay effect where pixels fade out
            // slowly instead of turning off instantly.
            self.display_float[i] = if frame_buffer[i] {
                // Pixel is currently on, set to full brightness
                1.0
            } else {
                // Pixel is off, but we decay the previous brightness value based on elapsed time
                (self.display_float[i] - DISPLAY_PHOSPHOR_RATE * dt).max(0.0)
            };

            let rgba = [0, 0xff, 0, (self.display_float[i] * 255.0) as u8];
            pxl.copy_from_slice(&rgba);
        }

        chip8.clear_redraw();
        self.surface_dirty = false;
        true
    }

    fn save_state(&self) -> anyhow::Result<()> {
        let blob = self
            .runner
            .chip8_ref()
            .save_state()
            .context("Failed to encode save state")?;
        std::fs::write(&self.state_file, blob).with_context(|| {
            format!("Failed to write save state to {}", self.state_file.display())
        })?;

        log::info!("saved state to {}", self.state_file.display());
        Ok(())
    }

    fn load_state(&mut self) -> anyhow::Result<()> {
        let blob = std::fs::read_to_string(&self.state_file).with_context(|| {
            format!("Failed to read save state from {}", self.state_file.display())
        })?;
        self.runner
            .chip8_mut()
            .load_state(&blob)
            .context("Failed to restore save state")?;

        log::info!("loaded state from {}", self.state_file.display());
        Ok(())
    }

    fn change_clock_rate(&mut self, delta: i32) {
        let cycles_per_tick = self.runner.adjust_cycles_per_tick(delta);
        log::info!(
            "clock rate: {} cycles per tick ({} Hz)",
            cycles_per_tick,
            cycles_per_tick as f32 * TIMER_HZ
        );
    }

    fn handle_hotkey(&mut self, key: KeyCode) {
        let result = match key {
            SAVE_STATE_KEY => self.save_state(),
            LOAD_STATE_KEY => self.load_state(),
            RELOAD_KEY => self
                .runner
                .load(&self.rom)
                .context("Failed to reload ROM"),
            FASTER_KEY | KeyCode::NumpadAdd => {
                self.change_clock_rate(CYCLES_PER_TICK_STEP);
                Ok(())
            }
            SLOWER_KEY | KeyCode::NumpadSubtract => {
                self.change_clock_rate(-CYCLES_PER_TICK_STEP);
                Ok(())
            }
            _ => Ok(()),
        };

        // A failed save or load is not fatal, the running program keeps going
        if let Err(e) = result {
            log::error!("{e:#}");
        }
    }

    fn try_resumed(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let window = {
            let size = LogicalSize::new(DISPLAY_X as u32 * 10, DISPLAY_Y as u32 * 10);
            let min_size = LogicalSize::new(DISPLAY_X as u32, DISPLAY_Y as u32);

            Arc::new(
                event_loop
                    .create_window(
                        Window::default_attributes()
                            .with_title("chip8-vm")
                            .with_inner_size(size)
                            .with_min_inner_size(min_size),
                    )
                    .context("Failed to create window")?,
            )
        };

        self.window = Some(window.clone());
        self.pixels = {
            let window_size = window.inner_size();
            let surface_texture =
                SurfaceTexture::new(window_size.width, window_size.height, window.clone());

            let pixels = Pixels::new(DISPLAY_X as u32, DISPLAY_Y as u32, surface_texture)
                .context("Failed to create pixels surface")?;

            window.request_redraw();
            Some(pixels)
        };

        // Avoid large dt on first frame
        self.last_frame_instant = Instant::now();
        Ok(())
    }

    fn try_window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        event: WindowEvent,
    ) -> anyhow::Result<()> {
        match event {
            WindowEvent::CloseRequested
            | WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        logical_key: Key::Named(NamedKey::Escape),
                        ..
                    },
                ..
            } => {
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                if let Some(pixels) = self.pixels.as_mut() {
                    pixels
                        .resize_surface(size.width, size.height)
                        .context("Failed to resize pixels surface")?;
                    // The surface is blank after a resize
                    self.surface_dirty = true;
                }
            }

            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                let dt = (now - self.last_frame_instant).as_secs_f32();
                self.last_frame_instant = now;

                self.runner.update(dt).context("Chip8 Execution error")?;

                if self.runner.chip8_mut().take_tone_requests() > 0 {
                    self.audio_sink.play();
                } else {
                    self.audio_sink.pause();
                }

                if self.process_display(dt)
                    && let Some(pixels) = self.pixels.as_ref()
                {
                    pixels.render().context("Pixels render error")?;
                }

                if let Some(window) = self.window.as_ref() {
                    window.request_redraw();
                }
            }

            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return Ok(());
                };

                match event.state {
                    ElementState::Pressed => {
                        if let Some(key) = KEY_MAP.iter().position(|&k| k == code) {
                            self.runner.set_key(u4::new(key as u8), true);
                        } else if !event.repeat {
                            self.handle_hotkey(code);
                        }
                    }
                    ElementState::Released => {
                        if let Some(key) = KEY_MAP.iter().position(|&k| k == code) {
                            self.runner.set_key(u4::new(key as u8), false);
                        }
                    }
                }
            }

            _ => (),
        }
        Ok(())
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Err(e) = self.try_resumed(event_loop) {
            self.exit_result = Err(e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Err(e) = self.try_window_event(event_loop, event) {
            self.exit_result = Err(e);
            event_loop.exit();
        }
    }
}

/// CHIP-8 emulator written in Rust.
///
/// Keys 1-4, Q-R, A-F, Z-V map to CHIP-8 keys.
/// F5 saves the machine state, F9 restores it, Backspace reloads the ROM.
/// + and - change the clock rate.
/// Escape is used to exit the emulator.
#[derive(Parser, Debug)]
#[command(about)]
struct Args {
    /// Path to the CHIP-8 ROM file
    rom_path: PathBuf,

    /// Instructions executed per 60Hz timer tick
    #[arg(long, default_value_t = DEFAULT_CYCLES_PER_TICK)]
    cycles_per_tick: u32,

    /// Save state file [default: ROM path with a .state.json extension]
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Seed for the random number generator
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let rom = std::fs::read(&args.rom_path).context("Failed to read ROM file")?;

    let event_loop = EventLoop::new().context("Failed to create event loop")?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new(&args, rom).context("Failed to initialize application")?;
    event_loop
        .run_app(&mut app)
        .context("Error occurred during event loop execution")?;

    // Return the result captured during the event loop
    app.exit_result
}

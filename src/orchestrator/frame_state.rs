//! Per-frame scalars exposed to every pass through `Params`.

use glam::Vec2;

#[cfg(not(target_arch = "wasm32"))]
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[cfg(target_arch = "wasm32")]
use web_time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::resources::UniformDecl;

/// Built-in uniforms, registered before anything the caller declares.
pub const BUILTIN_UNIFORMS: [(&str, &str); 9] = [
    ("time", "f32"),
    ("delta", "f32"),
    ("epoch", "f32"),
    ("screen", "vec2<f32>"),
    ("mouse", "vec2<f32>"),
    ("mouseClick", "f32"),
    ("mouseDown", "f32"),
    ("mouseWheel", "f32"),
    ("mouseDelta", "vec2<f32>"),
];

/// Wall-clock time between [`Orchestrator::update`] calls.
///
/// [`Orchestrator::update`]: crate::orchestrator::Orchestrator::update
pub struct Timer {
    last_tick: Instant,
    pub delta: Duration,
    /// Sum of every delta since creation.
    pub elapsed: Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_tick: Instant::now(),
            delta: Duration::ZERO,
            elapsed: Duration::ZERO,
        }
    }

    pub fn tick(&mut self) {
        let now = Instant::now();
        self.delta = now - self.last_tick;
        self.elapsed += self.delta;
        self.last_tick = now;
    }
}

/// Pointer and timing state of the current frame.
///
/// Input is injected between frames; [`FrameState::end_frame`] clears the
/// one-shot click / wheel flags and the accumulated delta.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameState {
    pub time: f32,
    pub delta: f32,
    /// Wall clock seconds since the Unix epoch.
    pub epoch: f32,
    pub screen: Vec2,
    pub mouse: Vec2,
    pub mouse_click: bool,
    pub mouse_down: bool,
    pub mouse_wheel: bool,
    pub mouse_delta: Vec2,
}

impl FrameState {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            screen: Vec2::new(width as f32, height as f32),
            ..Self::default()
        }
    }

    /// Declarations of the built-in uniforms with their initial values.
    #[must_use]
    pub fn declarations(&self) -> Vec<UniformDecl> {
        BUILTIN_UNIFORMS
            .iter()
            .zip(self.values())
            .map(|((name, ty), value)| UniformDecl::typed(*name, *ty, value))
            .collect()
    }

    /// Current values in [`BUILTIN_UNIFORMS`] order.
    #[must_use]
    pub fn values(&self) -> [Vec<f32>; 9] {
        [
            vec![self.time],
            vec![self.delta],
            vec![self.epoch],
            self.screen.to_array().to_vec(),
            self.mouse.to_array().to_vec(),
            vec![flag(self.mouse_click)],
            vec![flag(self.mouse_down)],
            vec![flag(self.mouse_wheel)],
            self.mouse_delta.to_array().to_vec(),
        ]
    }

    pub fn advance(&mut self, timer: &Timer) {
        self.time = timer.elapsed.as_secs_f32();
        self.delta = timer.delta.as_secs_f32();
        self.epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f32());
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.screen = Vec2::new(width as f32, height as f32);
    }

    pub fn pointer_moved(&mut self, x: f32, y: f32) {
        let position = Vec2::new(x, y);
        if self.mouse_down {
            self.mouse_delta += position - self.mouse;
        }
        self.mouse = position;
    }

    pub fn pointer_pressed(&mut self) {
        self.mouse_down = true;
        self.mouse_click = true;
    }

    pub fn pointer_released(&mut self) {
        self.mouse_down = false;
    }

    pub fn wheel(&mut self) {
        self.mouse_wheel = true;
    }

    pub fn end_frame(&mut self) {
        self.mouse_click = false;
        self.mouse_wheel = false;
        self.mouse_delta = Vec2::ZERO;
    }
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

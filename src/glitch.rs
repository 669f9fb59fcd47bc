//! Digital glitch post-process: parameters, timing and a CPU reference of the
//! composite shader (the GPU pass in `render::shared` mirrors it line for line).

use std::time::Duration;

use glam::{Vec2, Vec4};
use rand::Rng;

use crate::heightmap::{self, Heightmap};
use crate::scheduler::TaskHandle;
use crate::settings::StageSettings;

/// Shader uniforms of the composite pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GlitchParameters {
    pub enabled: bool,
    pub amount: f32,
    pub angle: f32,
    pub seed: f32,
    pub seed_x: f32,
    pub seed_y: f32,
    pub distortion_x: f32,
    pub distortion_y: f32,
    pub col_s: f32,
}

/// RGBA float image used by the CPU compositor.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<Vec4>,
}

impl Image {
    pub fn filled(width: usize, height: usize, color: Vec4) -> Self {
        Self {
            width,
            height,
            pixels: vec![color; width * height],
        }
    }

    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Vec4) -> Self {
        let mut pixels = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn pixel(&self, x: usize, y: usize) -> Vec4 {
        self.pixels[y * self.width + x]
    }

    /// Nearest sample with clamp-to-edge addressing.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if self.width == 0 || self.height == 0 {
            return Vec4::ZERO;
        }
        let x = ((uv.x.clamp(0.0, 1.0) * self.width as f32) as usize).min(self.width - 1);
        let y = ((uv.y.clamp(0.0, 1.0) * self.height as f32) as usize).min(self.height - 1);
        self.pixel(x, y)
    }
}

/// Post-process stage blending the main and shadow layers.
#[derive(Debug, Clone)]
pub struct GlitchCompositor {
    params: GlitchParameters,
    latched: bool,
    pulses: u32,
    displacement: Heightmap,
}

impl GlitchCompositor {
    pub fn new<R: Rng + ?Sized>(settings: &StageSettings, rng: &mut R) -> Self {
        Self {
            params: GlitchParameters {
                enabled: false,
                amount: settings.glitch_amount,
                angle: settings.glitch_angle,
                seed: settings.glitch_initial_seed,
                seed_x: settings.glitch_initial_seed_xy,
                seed_y: settings.glitch_initial_seed_xy,
                distortion_x: 0.0,
                distortion_y: 0.0,
                col_s: settings.glitch_col_s,
            },
            latched: false,
            pulses: 0,
            displacement: heightmap::generate(settings.heightmap_startup_size, rng),
        }
    }

    pub fn params(&self) -> &GlitchParameters {
        &self.params
    }

    pub fn displacement(&self) -> &Heightmap {
        &self.displacement
    }

    pub fn enabled(&self) -> bool {
        self.params.enabled
    }

    /// Flips the latched on/off state. Applying it twice is a no-op.
    ///
    /// The stage itself only uses [`begin_pulse`](Self::begin_pulse) and
    /// [`end_pulse`](Self::end_pulse) for its timed bursts; the latch is for
    /// hosts that want the effect held on indefinitely.
    pub fn toggle(&mut self) {
        self.latched = !self.latched;
        self.refresh();
    }

    /// Holds the effect on until the matching [`end_pulse`](Self::end_pulse).
    pub fn begin_pulse(&mut self) {
        self.pulses += 1;
        self.refresh();
    }

    pub fn end_pulse(&mut self) {
        self.pulses = self.pulses.saturating_sub(1);
        self.refresh();
    }

    fn refresh(&mut self) {
        self.params.enabled = self.latched || self.pulses > 0;
    }

    /// Redraws the seeds and replaces the displacement texture.
    pub fn reseed<R: Rng + ?Sized>(&mut self, rng: &mut R, size: usize) {
        self.params.seed = rng.gen_range(-1.0..1.0);
        self.params.seed_x = rng.gen_range(-1.0..1.0);
        self.params.seed_y = rng.gen_range(-1.0..1.0);
        self.displacement = heightmap::generate(size, rng);
    }

    /// Blends `main` and `shadow` the way the composite pass does.
    ///
    /// Both layers are sampled at each output pixel centre; the output has the
    /// dimensions of `main`.
    pub fn composite(&self, main: &Image, shadow: &Image) -> Image {
        Image::from_fn(main.width, main.height, |x, y| {
            let uv = Vec2::new(
                (x as f32 + 0.5) / main.width as f32,
                (y as f32 + 0.5) / main.height as f32,
            );
            self.shade(main, shadow, uv)
        })
    }

    fn shade(&self, main: &Image, shadow: &Image, uv: Vec2) -> Vec4 {
        let overlay = shadow.sample(uv);
        if !self.params.enabled {
            return main.sample(uv) + overlay;
        }

        let GlitchParameters {
            amount,
            angle,
            seed,
            seed_x,
            seed_y,
            distortion_x,
            distortion_y,
            col_s,
            ..
        } = self.params;

        let mut p = uv;
        let disp = self.displacement.sample(p.x * seed * seed, p.y * seed * seed);
        if p.y < distortion_x + col_s && p.y > distortion_x - col_s * seed {
            p.y = if seed_x > 0.0 {
                1.0 - (p.y + distortion_y)
            } else {
                distortion_y
            };
        }
        if p.x < distortion_y + col_s && p.x > distortion_y - col_s * seed {
            p.x = if seed_y > 0.0 {
                distortion_x
            } else {
                1.0 - (p.x + distortion_x)
            };
        }
        p.x += disp * seed_x * (seed / 5.0);
        p.y += disp * seed_y * (seed / 5.0);

        let offset = amount * Vec2::new(angle.cos(), angle.sin());
        let red = main.sample(p + offset);
        let green_alpha = main.sample(p);
        let blue = main.sample(p - offset);
        Vec4::new(red.x, green_alpha.y, blue.z, green_alpha.w) + overlay
    }
}

/// Randomly timed ambient glitch bursts, independent of user interaction.
#[derive(Debug, Clone)]
pub struct AmbientGlitch {
    next_trigger: f32,
    burst: Option<TaskHandle>,
}

impl AmbientGlitch {
    pub fn new<R: Rng + ?Sized>(settings: &StageSettings, rng: &mut R) -> Self {
        Self {
            next_trigger: rng.gen_range(settings.ambient_first_window.clone()),
            burst: None,
        }
    }

    /// Elapsed seconds at which the next burst starts.
    pub fn next_trigger(&self) -> f32 {
        self.next_trigger
    }

    pub fn in_flight(&self) -> bool {
        self.burst.is_some()
    }

    /// Returns the burst length when `elapsed` crosses the next trigger.
    ///
    /// The following trigger is drawn relative to this one, and no new burst
    /// starts while one is in flight.
    pub fn poll<R: Rng + ?Sized>(
        &mut self,
        elapsed: f32,
        settings: &StageSettings,
        rng: &mut R,
    ) -> Option<Duration> {
        if self.burst.is_some() || elapsed <= self.next_trigger {
            return None;
        }
        self.next_trigger = elapsed + rng.gen_range(settings.ambient_next_window.clone());
        let millis = rng.gen_range(settings.ambient_burst_ms.clone());
        Some(Duration::from_secs_f32(millis / 1000.0))
    }

    pub fn track(&mut self, handle: TaskHandle) {
        self.burst = Some(handle);
    }

    /// Clears the in-flight burst, returning its timer if one was pending.
    pub fn finish(&mut self) -> Option<TaskHandle> {
        self.burst.take()
    }
}

//! Pixel disintegration of the invoice panel.
//!
//! The captured panel is split into `L` jittered column bands, each drawn on
//! its own layer and blown away on a staggered schedule. Layer cleanup and the
//! final reveal are driven by timers, not by animation completion.

use crate::countdown::Trigger;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};

pub const DEFAULT_LAYERS: usize = 32;
pub const STAGGER_MS: u64 = 70;
pub const LAYER_LIFETIME_MS: u64 = 1500;
pub const REVEAL_SLACK_MS: u64 = 500;
pub const REVEAL_FADE_MS: u64 = 500;
pub const BLUR_FILTER: &str = "blur(2px)";

const TRANSFORM_BASE_MS: u64 = 800;
const OPACITY_BASE_MS: u64 = 600;
const DURATION_STEP_MS: u64 = 50;

/// RGBA8 pixel buffer, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("raster buffer is {actual} bytes, expected {expected} for {width}x{height} RGBA")]
pub struct RasterSizeError {
    pub width: u32,
    pub height: u32,
    pub expected: usize,
    pub actual: usize,
}

impl Raster {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, RasterSizeError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(RasterSizeError {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn transparent(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }
}

/// `floor((x / width) * layers)`, computed in integers.
pub fn base_layer(x: u32, width: u32, layers: usize) -> usize {
    if width == 0 {
        return 0;
    }
    ((x as u64 * layers as u64) / width as u64) as usize
}

/// Integer jitter in `[-4, 3]`.
pub fn draw_jitter<R: Rng + ?Sized>(rng: &mut R) -> i32 {
    ((rng.gen::<f64>() - 0.5) * 8.0).floor() as i32
}

pub fn assign_layer(x: u32, width: u32, layers: usize, jitter: i32) -> usize {
    let top = layers.saturating_sub(1) as i64;
    (base_layer(x, width, layers) as i64 + jitter as i64).clamp(0, top) as usize
}

/// Distributes every source pixel into exactly one of `layers` buffers; all
/// other layers stay transparent at that position.
pub fn partition<R: Rng + ?Sized>(source: &Raster, layers: usize, rng: &mut R) -> Vec<Raster> {
    let mut out: Vec<Raster> = (0..layers)
        .map(|_| Raster::transparent(source.width, source.height))
        .collect();
    if layers == 0 {
        return out;
    }

    for y in 0..source.height {
        for x in 0..source.width {
            let target = assign_layer(x, source.width, layers, draw_jitter(rng));
            let i = source.offset(x, y);
            out[target].data[i..i + 4].copy_from_slice(&source.data[i..i + 4]);
        }
    }
    out
}

/// Timing and random fling for one layer.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerMotion {
    pub index: usize,
    pub delay_ms: u64,
    pub transform_ms: u64,
    pub opacity_ms: u64,
    pub rotate_deg: f64,
    pub translate_x: f64,
    pub translate_y: f64,
}

impl LayerMotion {
    pub fn random<R: Rng + ?Sized>(index: usize, rng: &mut R) -> Self {
        let step = index as u64;
        Self {
            index,
            delay_ms: step * STAGGER_MS,
            transform_ms: TRANSFORM_BASE_MS + step * DURATION_STEP_MS,
            opacity_ms: OPACITY_BASE_MS + step * DURATION_STEP_MS,
            rotate_deg: (rng.gen::<f64>() - 0.5) * 30.0,
            // Biased right and up.
            translate_x: (rng.gen::<f64>() - 0.3) * 120.0,
            translate_y: (rng.gen::<f64>() - 0.7) * 80.0,
        }
    }

    pub fn remove_at_ms(&self) -> u64 {
        self.delay_ms + LAYER_LIFETIME_MS
    }

    pub fn transition_css(&self) -> String {
        format!(
            "transform {}ms ease-out, opacity {}ms ease-out",
            self.transform_ms, self.opacity_ms
        )
    }

    pub fn transform_css(&self) -> String {
        format!(
            "rotate({:.3}deg) translate({:.3}px, {:.3}px)",
            self.rotate_deg, self.translate_x, self.translate_y
        )
    }
}

/// Delay from the panel being hidden until the expired view is revealed.
pub fn reveal_after_ms(layers: usize) -> u64 {
    layers as u64 * STAGGER_MS + LAYER_LIFETIME_MS + REVEAL_SLACK_MS
}

/// Document position of the captured panel (scroll offset included).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PanelRect {
    pub left: f64,
    pub top: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("no rasterizer available for the self-destruct animation")]
    Unavailable,
    #[error("panel capture failed: {0}")]
    Failed(String),
}

/// Host page operations the effect drives.
#[async_trait]
pub trait Stage: Send + Sync + 'static {
    fn locate_panel(&self) -> Option<PanelRect>;
    async fn capture_panel(&self) -> Result<Raster, CaptureError>;
    fn hide_panel(&self);
    /// Places a layer over the panel with its transition already configured.
    fn mount_layer(&self, layer: Raster, at: PanelRect, motion: &LayerMotion);
    /// Applies transform, zero opacity and [`BLUR_FILTER`].
    fn animate_layer(&self, motion: &LayerMotion);
    fn unmount_layer(&self, index: usize);
    fn reveal_expired(&self, fade_ms: u64);
}

#[derive(Debug)]
pub enum EffectOutcome {
    /// No panel on the page; went straight to the expired view.
    PanelAbsent,
    /// Capture was impossible; went straight to the expired view.
    CaptureSkipped(CaptureError),
    /// Layers are in flight; the handle resolves once the expired view is shown.
    Animating { reveal: JoinHandle<()> },
}

/// One-shot self-destruct sequence for a page.
pub struct SelfDestruct<S: Stage> {
    stage: Arc<S>,
    layers: usize,
    seed: Option<u64>,
    fired: AtomicBool,
}

impl<S: Stage> SelfDestruct<S> {
    pub fn new(stage: Arc<S>) -> Arc<Self> {
        Self::with_layers(stage, DEFAULT_LAYERS)
    }

    pub fn with_layers(stage: Arc<S>, layers: usize) -> Arc<Self> {
        Arc::new(Self {
            stage,
            layers,
            seed: None,
            fired: AtomicBool::new(false),
        })
    }

    pub fn seeded(stage: Arc<S>, layers: usize, seed: u64) -> Arc<Self> {
        Arc::new(Self {
            stage,
            layers,
            seed: Some(seed),
            fired: AtomicBool::new(false),
        })
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Trigger to hand to the countdown controller.
    pub fn trigger_fn(self: &Arc<Self>) -> Trigger {
        let this = Arc::clone(self);
        Box::new(move || {
            this.fire();
        })
    }

    /// Starts the sequence on the current runtime. Later calls do nothing.
    pub fn fire(self: &Arc<Self>) -> Option<JoinHandle<EffectOutcome>> {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("self-destruct already fired");
            return None;
        }
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                tracing::error!(error = %e, "no runtime for self-destruct; revealing expired view");
                self.stage.reveal_expired(REVEAL_FADE_MS);
                return None;
            }
        };
        let this = Arc::clone(self);
        Some(runtime.spawn(async move { this.run().await }))
    }

    async fn run(&self) -> EffectOutcome {
        let Some(rect) = self.stage.locate_panel() else {
            self.stage.reveal_expired(REVEAL_FADE_MS);
            return EffectOutcome::PanelAbsent;
        };

        let raster = match self.stage.capture_panel().await {
            Ok(raster) => raster,
            Err(e) => {
                tracing::error!(error = %e, "skipping disintegration");
                self.stage.reveal_expired(REVEAL_FADE_MS);
                return EffectOutcome::CaptureSkipped(e);
            }
        };

        let mut rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let layers = partition(&raster, self.layers, &mut rng);

        self.stage.hide_panel();
        let start = Instant::now();

        for (index, layer) in layers.into_iter().enumerate() {
            let motion = LayerMotion::random(index, &mut rng);
            self.stage.mount_layer(layer, rect, &motion);

            let stage = Arc::clone(&self.stage);
            tokio::spawn(async move {
                sleep_until(start + Duration::from_millis(motion.delay_ms)).await;
                stage.animate_layer(&motion);
                sleep(Duration::from_millis(LAYER_LIFETIME_MS)).await;
                stage.unmount_layer(motion.index);
            });
        }

        let stage = Arc::clone(&self.stage);
        let reveal_at = start + Duration::from_millis(reveal_after_ms(self.layers));
        let reveal = tokio::spawn(async move {
            sleep_until(reveal_at).await;
            stage.reveal_expired(REVEAL_FADE_MS);
        });

        tracing::info!(
            layers = self.layers,
            width = raster.width(),
            height = raster.height(),
            "disintegration started"
        );
        EffectOutcome::Animating { reveal }
    }
}

//! Fire-and-forget collaborators the core pokes at: a celebratory burst and
//! a short chime on completion, focus release before a toggle, and alerts
//! for failed confirm-first writes. None of them can change core state;
//! their errors are logged and dropped.

use tracing::{info, warn};

/// Normalized click position, both axes in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Origin {
    pub x: f32,
    pub y: f32,
}

impl Origin {
    pub fn new(x: f32, y: f32) -> Self {
        Self {
            x: x.clamp(0.0, 1.0),
            y: y.clamp(0.0, 1.0),
        }
    }

    pub fn center() -> Self {
        Self::new(0.5, 0.5)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Burst {
    pub origin: Origin,
    pub particle_count: u32,
    pub spread: f32,
    pub ticks: u32,
    pub start_velocity: f32,
    pub gravity: f32,
    pub colors: &'static [&'static str],
}

pub const BURST_COLORS: &[&str] = &["#ff6b35", "#ef4444", "#a16207", "#f59e0b", "#fbbf24"];

impl Burst {
    pub fn at(origin: Origin) -> Self {
        Self {
            origin,
            particle_count: 5,
            spread: 15.0,
            ticks: 70,
            start_velocity: 13.0,
            gravity: 1.4,
            colors: BURST_COLORS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chime {
    pub volume: f32,
}

impl Default for Chime {
    fn default() -> Self {
        Self { volume: 0.3 }
    }
}

pub trait Feedback {
    /// Called before a toggle so an in-progress text edit can commit or
    /// cancel before the task list changes under it.
    fn release_focus(&self) {}

    fn burst(&self, burst: &Burst) -> anyhow::Result<()>;

    fn chime(&self, chime: &Chime) -> anyhow::Result<()>;

    fn alert(&self, message: &str);
}

/// Runs the completion side effects allowed by the user's toggles,
/// swallowing collaborator failures.
pub fn celebrate<F: Feedback + ?Sized>(
    feedback: &F,
    origin: Origin,
    confetti_enabled: bool,
    sound_enabled: bool,
) {
    if confetti_enabled
        && let Err(err) = feedback.burst(&Burst::at(origin))
    {
        warn!(error = %err, "celebration burst failed");
    }
    if sound_enabled
        && let Err(err) = feedback.chime(&Chime::default())
    {
        warn!(error = %err, "completion chime failed");
    }
}

/// Feedback for headless use: everything goes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFeedback;

impl Feedback for LogFeedback {
    fn burst(&self, burst: &Burst) -> anyhow::Result<()> {
        info!(x = burst.origin.x, y = burst.origin.y, particles = burst.particle_count, "burst");
        Ok(())
    }

    fn chime(&self, chime: &Chime) -> anyhow::Result<()> {
        info!(volume = chime.volume, "chime");
        Ok(())
    }

    fn alert(&self, message: &str) {
        warn!(message, "alert");
    }
}

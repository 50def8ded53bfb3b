//! Tracing setup with a level that can be changed while the session runs

use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};

use strum::{AsRefStr, Display, EnumString};
use tracing::{Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::Registry;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{Error, Result};

static CURRENT_LEVEL: AtomicU8 = AtomicU8::new(1); // WARN until told otherwise

/// Filter layer reading the level set through [`TracingLevel::set_tracing_level`]
#[derive(Clone)]
pub struct DynamicFilter;

impl<S> Layer<S> for DynamicFilter
where
    S: Subscriber,
{
    fn enabled(
        &self,
        metadata: &tracing::Metadata<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) -> bool {
        let level_value = match *metadata.level() {
            Level::ERROR => 0,
            Level::WARN => 1,
            Level::INFO => 2,
            Level::DEBUG => 3,
            Level::TRACE => 4,
        };
        level_value <= CURRENT_LEVEL.load(Ordering::Relaxed)
    }
}

/// Tracing levels that can be set dynamically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TracingLevel {
    /// Errors only
    Error,
    /// Recoverable anomalies such as unusable default literals
    Warn,
    /// Session level events
    Info,
    /// Tree construction and mutations
    Debug,
    /// Every node created and every leaf edit
    Trace,
}

impl TracingLevel {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Error => 0,
            Self::Warn => 1,
            Self::Info => 2,
            Self::Debug => 3,
            Self::Trace => 4,
        }
    }

    /// Install a stderr subscriber filtered by [`DynamicFilter`], starting at `level`
    pub fn init_tracing(level: Self) -> Result<()> {
        CURRENT_LEVEL.store(level.as_u8(), Ordering::Relaxed);
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .with_target(true);
        Registry::default()
            .with(DynamicFilter)
            .with(stderr_layer)
            .try_init()
            .map_err(|e| Error::Configuration(format!("tracing already initialised: {e}")).into())
    }

    /// Read the level from a string such as `"debug"`
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_str(text.trim()).map_err(|_| {
            Error::Configuration(format!(
                "Invalid tracing level '{text}'. Valid levels are: error, warn, info, debug, trace"
            ))
            .into()
        })
    }

    /// Get the current tracing level
    pub fn get_current_tracing_level() -> Self {
        match CURRENT_LEVEL.load(Ordering::Relaxed) {
            0 => Self::Error,
            2 => Self::Info,
            3 => Self::Debug,
            4 => Self::Trace,
            _ => Self::Warn,
        }
    }

    /// Set the current tracing level dynamically
    pub fn set_tracing_level(level: Self) {
        CURRENT_LEVEL.store(level.as_u8(), Ordering::Relaxed);
        tracing::info!(level = %level, "Tracing level changed");
    }
}

//! Global subscriber setup

use serde::Deserialize;
use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Output profile, selected by `logging.profile` in the service config
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// Human-readable lines on stderr
    #[default]
    Development,
    /// One JSON object per event on stderr
    Production,
    /// Registry only; tests attach their own capture layer
    Test,
}

impl Profile {
    /// Filter used when `RUST_LOG` is unset; covers every `lineage*` target
    pub fn default_directive(&self) -> &'static str {
        match self {
            Profile::Development => "lineage=debug",
            Profile::Production => "lineage=info",
            Profile::Test => "off",
        }
    }

    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.default_directive()))
    }
}

static INIT_ONCE: Once = Once::new();

/// Install the global subscriber for `profile`
///
/// Only the first call has an effect. A subscriber installed earlier by
/// someone else (a test capture layer, an embedding application) is left in
/// place.
///
/// # Example
///
/// ```
/// use lineage_core::logging_facility::{init, Profile};
///
/// init(Profile::Production);
/// ```
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        let installed = match profile {
            Profile::Development => tracing_subscriber::fmt()
                .with_env_filter(profile.filter())
                .with_writer(std::io::stderr)
                .try_init()
                .is_ok(),
            Profile::Production => tracing_subscriber::fmt()
                .json()
                .with_current_span(true)
                .with_env_filter(profile.filter())
                .with_writer(std::io::stderr)
                .try_init()
                .is_ok(),
            Profile::Test => tracing_subscriber::registry().try_init().is_ok(),
        };
        if installed {
            tracing::debug!(?profile, "logging initialised");
        }
    });
}

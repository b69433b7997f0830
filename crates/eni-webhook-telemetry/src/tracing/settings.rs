//! Subscriber settings.

use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
/// Re-export to save the end crate a direct dependency.
pub use tracing_appender::rolling::Rotation;

/// General settings that apply to any subscriber.
#[derive(Debug, PartialEq)]
pub struct Settings {
    /// The environment variable used to set the [`LevelFilter`].
    ///
    /// When the environment variable is set, it overrides
    /// [`Self::default_level`].
    pub environment_variable: &'static str,

    /// The [`LevelFilter`] to fall back to if [`Self::environment_variable`]
    /// is not set.
    pub default_level: LevelFilter,
}

/// Console log subscriber settings.
#[derive(Debug, Default, PartialEq)]
pub enum ConsoleLogSettings {
    #[default]
    Disabled,
    Enabled { common_settings: Settings },
}

/// `(environment variable, default level, enabled)`
impl From<(&'static str, LevelFilter, bool)> for ConsoleLogSettings {
    fn from((environment_variable, default_level, enabled): (&'static str, LevelFilter, bool)) -> Self {
        if !enabled {
            return Self::Disabled;
        }

        Self::Enabled {
            common_settings: Settings {
                environment_variable,
                default_level,
            },
        }
    }
}

/// Rolling JSON file log subscriber settings.
#[derive(Debug, Default, PartialEq)]
pub enum FileLogSettings {
    #[default]
    Disabled,
    Enabled {
        common_settings: Settings,

        /// Path to directory for log files.
        file_log_dir: PathBuf,

        /// Log rotation frequency.
        rotation_period: Rotation,

        /// Suffix for the rolled files, which are prefixed with the service
        /// name.
        filename_suffix: &'static str,
    },
}

impl FileLogSettings {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Enabled { .. })
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(false)]
    #[case(true)]
    fn console_settings_from_triple(#[case] enabled: bool) {
        let settings = ConsoleLogSettings::from(("ABC", LevelFilter::DEBUG, enabled));

        let expected = match enabled {
            true => ConsoleLogSettings::Enabled {
                common_settings: Settings {
                    environment_variable: "ABC",
                    default_level: LevelFilter::DEBUG,
                },
            },
            false => ConsoleLogSettings::Disabled,
        };
        assert_eq!(settings, expected);
    }
}

//! Initialises the [`tracing`] subscribers for console output and rolling
//! JSON file output.
//!
//! To get started, see [`Tracing`].
use std::path::PathBuf;

use snafu::{ResultExt as _, Snafu};
use tracing::{level_filters::LevelFilter, subscriber::SetGlobalDefaultError};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{EnvFilter, Layer, Registry, filter::Directive, layer::SubscriberExt};

use crate::tracing::settings::*;

pub mod settings;

type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors which can be encountered when initialising [`Tracing`].
#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender"))]
    InitRollingFileAppender { source: InitError },

    #[snafu(display("unable to set the global default subscriber"))]
    SetGlobalDefaultSubscriber { source: SetGlobalDefaultError },
}

/// A set of configured [`tracing`] subscriber layers.
///
/// [`Tracing::init`] installs the subscribers as the process-wide default.
/// That cannot be undone, so it succeeds at most once per process. File
/// output is written synchronously and needs no flushing on exit.
///
/// ```no_run
/// use eni_webhook_telemetry::tracing::{TelemetryOptions, Tracing};
///
/// Tracing::pre_configured("my-webhook", TelemetryOptions::default())
///     .init()
///     .unwrap();
/// ```
///
/// ## Environment variables
///
/// | Variable            | Default | Purpose                           |
/// |---------------------|---------|-----------------------------------|
/// | `CONSOLE_LOG_LEVEL` | `INFO`  | Filter directives for the console |
/// | `FILE_LOG_LEVEL`    | `INFO`  | Filter directives for log files   |
#[derive(Debug)]
pub struct Tracing {
    service_name: &'static str,
    console_log_settings: ConsoleLogSettings,
    file_log_settings: FileLogSettings,
}

impl Tracing {
    /// The environment variable used to set the console log level filter.
    pub const CONSOLE_LOG_LEVEL: &str = "CONSOLE_LOG_LEVEL";
    /// The environment variable used to set the rolling file log level filter.
    pub const FILE_LOG_LEVEL: &str = "FILE_LOG_LEVEL";
    /// The filename suffix used for the rolling file logs.
    pub const FILE_LOG_SUFFIX: &str = "tracing-rs.json";

    /// Creates a [`Tracing`] instance with console output (unless disabled)
    /// and optional file output, both at `INFO` by default.
    ///
    /// If `file_log_rotation_period` is [`None`], files are never rolled.
    pub fn pre_configured(service_name: &'static str, options: TelemetryOptions) -> Self {
        let TelemetryOptions {
            console_log_disabled,
            file_log_directory,
            file_log_rotation_period,
        } = options;

        let rotation_period = file_log_rotation_period.unwrap_or_default();

        Self::new(service_name)
            .with_console_output((
                Self::CONSOLE_LOG_LEVEL,
                LevelFilter::INFO,
                !console_log_disabled,
            ))
            .with_file_output(file_log_directory.map_or(
                FileLogSettings::Disabled,
                |file_log_dir| FileLogSettings::Enabled {
                    common_settings: Settings {
                        environment_variable: Self::FILE_LOG_LEVEL,
                        default_level: LevelFilter::INFO,
                    },
                    file_log_dir,
                    rotation_period: rotation_period.into(),
                    filename_suffix: Self::FILE_LOG_SUFFIX,
                },
            ))
    }

    /// Creates an instance with every output disabled.
    pub fn new(service_name: &'static str) -> Self {
        Self {
            service_name,
            console_log_settings: ConsoleLogSettings::default(),
            file_log_settings: FileLogSettings::default(),
        }
    }

    pub fn with_console_output(mut self, settings: impl Into<ConsoleLogSettings>) -> Self {
        self.console_log_settings = settings.into();
        self
    }

    pub fn with_file_output(mut self, settings: FileLogSettings) -> Self {
        self.file_log_settings = settings;
        self
    }

    /// Installs the configured subscribers as the global default and hands
    /// the configuration back.
    pub fn init(self) -> Result<Tracing> {
        let mut layers: Vec<Box<dyn Layer<Registry> + Sync + Send>> = Vec::new();

        if let ConsoleLogSettings::Enabled { common_settings } = &self.console_log_settings {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );
            layers.push(
                tracing_subscriber::fmt::layer()
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
        }

        if let FileLogSettings::Enabled {
            common_settings,
            file_log_dir,
            rotation_period,
            filename_suffix,
        } = &self.file_log_settings
        {
            let env_filter_layer = env_filter_builder(
                common_settings.environment_variable,
                common_settings.default_level,
            );

            let file_appender = RollingFileAppender::builder()
                .rotation(rotation_period.clone())
                .filename_prefix(self.service_name)
                .filename_suffix(*filename_suffix)
                .build(file_log_dir)
                .context(InitRollingFileAppenderSnafu)?;

            layers.push(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(file_appender)
                    .with_filter(env_filter_layer)
                    .boxed(),
            );
        }

        if !layers.is_empty() {
            tracing::subscriber::set_global_default(tracing_subscriber::registry().with(layers))
                .context(SetGlobalDefaultSubscriberSnafu)?;
        }

        tracing::debug!(
            service.name = self.service_name,
            file_log.enabled = self.file_log_settings.is_enabled(),
            "initialized tracing subscribers"
        );

        Ok(self)
    }
}

/// Create an [`EnvFilter`] configured with the given environment variable and default [`Directive`].
fn env_filter_builder(env_var: &str, default_directive: impl Into<Directive>) -> EnvFilter {
    EnvFilter::builder()
        .with_env_var(env_var)
        .with_default_directive(default_directive.into())
        .from_env_lossy()
}

/// Contains options which can be passed to [`Tracing::pre_configured()`].
///
/// With the `clap` feature enabled this struct can be flattened into a CLI.
#[cfg_attr(feature = "clap", derive(clap::Args, PartialEq, Eq))]
#[derive(Debug, Default)]
pub struct TelemetryOptions {
    /// Disable console logs.
    #[cfg_attr(feature = "clap", arg(long, env))]
    pub console_log_disabled: bool,

    /// Enable logging to files located in the specified DIRECTORY.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "DIRECTORY", group = "file_log")
    )]
    pub file_log_directory: Option<PathBuf>,

    /// Time PERIOD after which log files are rolled over.
    #[cfg_attr(
        feature = "clap",
        arg(long, env, value_name = "PERIOD", requires = "file_log")
    )]
    pub file_log_rotation_period: Option<RotationPeriod>,
}

/// Supported periods when the log file is rolled over.
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[derive(Clone, Debug, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "PascalCase")]
#[allow(missing_docs)]
pub enum RotationPeriod {
    Minutely,
    Hourly,
    Daily,

    #[default]
    Never,
}

impl From<RotationPeriod> for Rotation {
    fn from(value: RotationPeriod) -> Self {
        match value {
            RotationPeriod::Minutely => Self::MINUTELY,
            RotationPeriod::Hourly => Self::HOURLY,
            RotationPeriod::Daily => Self::DAILY,
            RotationPeriod::Never => Self::NEVER,
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn pre_configured_defaults_to_console_only() {
        let tracing = Tracing::pre_configured("test", TelemetryOptions::default());

        assert_eq!(
            tracing.console_log_settings,
            ConsoleLogSettings::Enabled {
                common_settings: Settings {
                    environment_variable: Tracing::CONSOLE_LOG_LEVEL,
                    default_level: LevelFilter::INFO,
                }
            }
        );
        assert!(!tracing.file_log_settings.is_enabled());
    }

    #[test]
    fn pre_configured_with_file_output() {
        let tracing = Tracing::pre_configured("test", TelemetryOptions {
            console_log_disabled: true,
            file_log_directory: Some(PathBuf::from("/logs")),
            file_log_rotation_period: Some(RotationPeriod::Hourly),
        });

        assert_eq!(tracing.console_log_settings, ConsoleLogSettings::Disabled);
        assert_eq!(tracing.file_log_settings, FileLogSettings::Enabled {
            common_settings: Settings {
                environment_variable: Tracing::FILE_LOG_LEVEL,
                default_level: LevelFilter::INFO,
            },
            file_log_dir: PathBuf::from("/logs"),
            rotation_period: Rotation::HOURLY,
            filename_suffix: Tracing::FILE_LOG_SUFFIX,
        });
    }

    #[rstest]
    #[case(RotationPeriod::Minutely, Rotation::MINUTELY)]
    #[case(RotationPeriod::Hourly, Rotation::HOURLY)]
    #[case(RotationPeriod::Daily, Rotation::DAILY)]
    #[case(RotationPeriod::Never, Rotation::NEVER)]
    fn rotation_period_maps_to_rotation(#[case] period: RotationPeriod, #[case] expected: Rotation) {
        assert_eq!(Rotation::from(period), expected);
    }

    #[test]
    fn init_creates_log_directory_appender() {
        let directory = tempfile::tempdir().expect("failed to create temp dir");
        let tracing = Tracing::new("test").with_file_output(FileLogSettings::Enabled {
            common_settings: Settings {
                environment_variable: "TEST_FILE_LOG_LEVEL",
                default_level: LevelFilter::DEBUG,
            },
            file_log_dir: directory.path().to_path_buf(),
            rotation_period: Rotation::NEVER,
            filename_suffix: Tracing::FILE_LOG_SUFFIX,
        });

        // Only one test in this crate may install the global subscriber.
        let tracing = tracing.init().expect("failed to init tracing");
        tracing::info!("hello");

        let files = std::fs::read_dir(directory.path())
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(files.len(), 1);

        let err = tracing.init().expect_err("global subscriber was installed twice");
        assert!(matches!(err, Error::SetGlobalDefaultSubscriber { .. }));
    }
}

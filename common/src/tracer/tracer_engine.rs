use clap::Args;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{EnvFilter, filter::ParseError, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Error)]
pub enum TracerError {
    #[error("Invalid log filter directive: {0}")]
    Filter(#[from] ParseError),
    #[error("Global subscriber already set: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

#[derive(Clone, Debug, Default, Args)]
pub struct TracerOptions {
    /// Log filter directives, in the same format as `RUST_LOG`. If unset, `RUST_LOG` is used,
    /// falling back to `info`.
    #[clap(long)]
    pub log_filter: Option<String>,

    /// Disable coloured log output.
    #[clap(long)]
    pub no_ansi: bool,
}

impl TracerOptions {
    pub fn new(log_filter: Option<&str>) -> Self {
        Self {
            log_filter: log_filter.map(ToOwned::to_owned),
            no_ansi: false,
        }
    }

    fn env_filter(&self) -> Result<EnvFilter, TracerError> {
        match &self.log_filter {
            Some(directives) => Ok(EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .parse(directives)?),
            None => Ok(EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy()),
        }
    }
}

pub struct TracerEngine {
    service_name: &'static str,
    setup_error: Option<TracerError>,
}

impl TracerEngine {
    /// Installs a `fmt` subscriber filtered by the given options.
    /// Failure is not fatal, the error is retained and can be reported by the caller.
    pub fn new(options: TracerOptions, service_name: &'static str) -> Self {
        let setup_error = Self::install(&options).err();
        Self {
            service_name,
            setup_error,
        }
    }

    fn install(options: &TracerOptions) -> Result<(), TracerError> {
        let filter = options.env_filter()?;
        let fmt_layer = fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(!options.no_ansi)
            .with_target(false);
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()?;
        Ok(())
    }

    pub fn service_name(&self) -> &'static str {
        self.service_name
    }

    pub fn get_setup_error(&self) -> Option<&TracerError> {
        self.setup_error.as_ref()
    }
}

mod tracer_engine;

pub use tracer_engine::{TracerEngine, TracerError, TracerOptions};

/// Should be called at the start of each component.
/// Installs the global subscriber, and reports any failure to do so
/// once a subscriber is available.
#[macro_export]
macro_rules! init_tracer {
    ($options:expr) => {{
        let tracer = TracerEngine::new($options, env!("CARGO_BIN_NAME"));
        // This is called here (in the macro) rather than as part of `TracerEngine::new`
        // to ensure the warning is emitted in the correct module.
        if let Some(e) = tracer.get_setup_error() {
            warn!("{e}");
        }
        tracer
    }};
}

pub mod tracer;

pub use const_format;
pub use git_version;

pub type Channel = u32;
pub type EventId = u64;
pub type Intensity = u16;
pub type SampleIndex = usize;
/// Time in nanoseconds, relative to the nominal proton bunch time.
pub type Time = f64;

/// Version string used by the `--version` flag of each component.
#[macro_export]
macro_rules! version {
    () => {
        $crate::const_format::concatcp!(
            env!("CARGO_PKG_VERSION"),
            " (",
            $crate::git_version::git_version!(fallback = "unknown"),
            ")"
        )
    };
}

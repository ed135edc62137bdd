pub mod registry;
pub mod shared;

pub use registry::{TestRegistry, aid, hid, pid};
pub use shared::SharedDatabase;

/// Route `tracing` output through the test writer. Safe to call from every
/// test; only the first call installs the subscriber.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

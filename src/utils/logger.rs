use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Installs the process logger. Every line carries the node name so that the
/// output of several nodes started from one terminal stays readable.
pub fn setup_logging(node_name: &str, verbose: bool) {
    let level = if verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let node = node_name.to_string();

    let mut builder = Builder::new();
    builder
        .target(Target::Stdout)
        .filter_level(level)
        .parse_default_env()
        .format(move |buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] [{}] {}",
                chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                node,
                record.target(),
                record.args()
            )
        });

    // A second call (tests, embedders) keeps the first logger.
    let _ = builder.try_init();
}

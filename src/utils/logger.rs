use env_logger::{Builder, Target};
use log::LevelFilter;
use std::io::Write;

/// Installs the global logger. `RUST_LOG` still overrides `level` per module.
pub fn setup_logging(level: LevelFilter) {
    let mut builder = Builder::new();

    builder
        .target(Target::Stdout)
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] [{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.module_path().unwrap_or("unknown"),
                record.args()
            )
        })
        .init();
}

//! Backend registration and dispatch
//!
//! Backends are feature-gated. Each one turns the global CLI options into a
//! [`GpioProvider`](lineio_core::GpioProvider) and hands it to the command
//! runner, which is generic over the provider type.

use crate::cli::Cli;
use crate::commands;

/// Information about a backend
pub struct BackendInfo {
    /// Name passed to `--backend`
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Backends enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "linux")]
    backends.push(BackendInfo {
        name: "linux",
        aliases: &["cdev", "gpiochip"],
        description: "Linux GPIO character devices (--dev-root <dir>)",
    });

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy",
        aliases: &["emulator"],
        description: "In-memory controller emulator (--dummy-chips <n,n,...>)",
    });

    backends
}

/// Resolve a backend name or alias
pub fn find_backend(name: &str) -> Option<&'static str> {
    available_backends()
        .into_iter()
        .find(|b| b.name == name || b.aliases.contains(&name))
        .map(|b| b.name)
}

/// Open the selected backend and run the command against it
pub fn dispatch(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let backend = find_backend(&cli.backend).ok_or_else(|| {
        let names: Vec<&str> = available_backends().iter().map(|b| b.name).collect();
        format!(
            "Unknown backend: {} (available: {})",
            cli.backend,
            names.join(", ")
        )
    })?;
    log::debug!("Using backend {}", backend);

    match backend {
        #[cfg(feature = "linux")]
        "linux" => {
            use lineio_linux::{LinuxGpio, LinuxGpioConfig};
            let gpio = LinuxGpio::new(LinuxGpioConfig::new().with_dev_root(&cli.dev_root));
            commands::run(&gpio, cli)
        }
        #[cfg(feature = "dummy")]
        "dummy" => {
            use lineio_dummy::{DummyConfig, DummyGpio};
            let gpio = DummyGpio::new(DummyConfig::parse_line_counts(&cli.dummy_chips)?);
            commands::run(&gpio, cli)
        }
        other => Err(format!("Backend {} is not compiled in", other).into()),
    }
}

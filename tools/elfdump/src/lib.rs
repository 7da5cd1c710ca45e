//! elfdump: load a binary through the loader registry and report on it.

pub mod cli;
pub mod error;
pub mod logger;
pub mod output;
pub mod report;

use std::path::Path;
use std::sync::Arc;

use rekon_db::{Address, LoaderRegistry, MemoryImage, MemorySink, SymbolStore, PEEK_LEN};
use rekon_elf::{ElfLoaderPlugin, LoaderConfig};
use spin::Mutex;

use crate::cli::Cli;
use crate::error::ElfdumpError;
use crate::report::{Detail, Report};

/// Registry with every loader this build knows about.
pub fn registry(config: LoaderConfig, sink: &MemorySink) -> LoaderRegistry {
    let mut registry = LoaderRegistry::new();
    registry.register(Box::new(
        ElfLoaderPlugin::with_config(config).with_sink(sink.clone()),
    ));
    registry
}

/// Load `cli.path` and build its report.
pub fn run(cli: &Cli) -> Result<Report, ElfdumpError> {
    let data = std::fs::read(&cli.path)?;
    let config = LoaderConfig {
        apply_relocations: !cli.no_relocate,
        ..LoaderConfig::default()
    };
    let detail = Detail {
        sections: cli.sections,
        symbols: cli.symbols,
    };
    dump(&cli.path, data, config, &cli.relocs_at, detail)
}

/// Select a loader for `data`, load it and report.
pub fn dump(
    path: &Path,
    data: Vec<u8>,
    config: LoaderConfig,
    relocs_at: &[Address],
    detail: Detail,
) -> Result<Report, ElfdumpError> {
    let sink = MemorySink::new();
    let registry = registry(config, &sink);

    let header = &data[..data.len().min(PEEK_LEN)];
    let (plugin, mut loader) = registry.select(header).ok_or_else(|| ElfdumpError::NoLoader {
        path: path.to_path_buf(),
    })?;
    log::info!("[elfdump] {} selected for {}", plugin.name, path.display());

    let image = Arc::new(Mutex::new(MemoryImage::new()));
    let symbols = Arc::new(Mutex::new(SymbolStore::new()));
    loader.initialize(image.clone(), symbols.clone());

    let loaded = loader.load_from_memory(data);
    replay(&sink);
    loaded.map_err(|source| ElfdumpError::Load {
        path: path.to_path_buf(),
        source,
    })?;

    let main = loader.main_entry_point();
    let report = Report::collect(
        &path.display().to_string(),
        &plugin,
        &*loader,
        &image.lock(),
        &symbols.lock(),
        main,
        relocs_at,
        detail,
        &sink.records(),
    );
    loader.close();
    Ok(report)
}

/// Pass captured loader diagnostics on to the `log` facade.
fn replay(sink: &MemorySink) {
    for record in sink.records() {
        log::log!(target: "rekon_elf", record.level, "{}", record.message);
    }
}

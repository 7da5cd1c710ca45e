//! ELF32 file loader.
//!
//! Implements the [`FileLoader`] contract on top of the parsing modules.
//! A load is staged entirely in local state and committed to the image
//! store and symbol table only once the structural checks have passed.

use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use hashbrown::HashSet;
use spin::Mutex;
use rekon_db::{
    Address, FileLoader, ImageHandle, LoadError, LoadFormat, LoaderPlugin, LogForwarder, LogSink,
    Machine, MemorySink, PluginInfo, SectionFlags, SectionInfo, SymbolAttrs, SymbolHandle, SymbolKind,
};

use crate::dynamic;
use crate::endian::Endian;
use crate::entry::{EntryContext, LibcStartMainHeuristic, MainEntryHeuristic};
use crate::header::{self, ElfLayout, ParseLimits, MAX_SECTIONS, MAX_SEGMENTS};
use crate::plt::PltInfo;
use crate::reloc::{self, RelocStats, RelocationModel};
use crate::sections::SectionTable;
use crate::symbols::{self, SymbolContext, EXTERN_SECTION};
use crate::types::*;

/// Confidence reported for a 32-bit ELF file
pub const CONFIDENCE_ELF32: u32 = 4;

/// Loader settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Patch relocation sites (sites are recorded either way)
    pub apply_relocations: bool,
    /// Reclassify symbols inside the PLT as imports
    pub mark_imports: bool,
    pub max_sections: usize,
    pub max_segments: usize,
    /// Size of each extern area slot
    pub extern_slot_size: u64,
    /// First address given to sections of relocatable objects
    pub relocatable_base: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            apply_relocations: true,
            mark_imports: true,
            max_sections: MAX_SECTIONS,
            max_segments: MAX_SEGMENTS,
            extern_slot_size: 4,
            relocatable_base: 0x0800_0000,
        }
    }
}

/// State of a successful load.
struct LoadedElf {
    data: Vec<u8>,
    layout: ElfLayout,
    sections: SectionTable,
    machine: Machine,
    plt: Option<PltInfo>,
    relocation_sites: HashSet<Address>,
    relocation_stats: RelocStats,
}

/// ELF32 loader.
pub struct ElfLoader {
    config: LoaderConfig,
    sink: Mutex<Box<dyn LogSink + Send>>,
    heuristics: Vec<Box<dyn MainEntryHeuristic>>,
    models: Vec<Box<dyn RelocationModel + Send>>,
    image: Option<ImageHandle>,
    symbols: Option<SymbolHandle>,
    loaded: Option<LoadedElf>,
}

impl Default for ElfLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ElfLoader {
    /// Loader with default settings, logging through the `log` facade.
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self {
            config,
            sink: Mutex::new(Box::new(LogForwarder::new("rekon_elf"))),
            heuristics: alloc::vec![Box::new(LibcStartMainHeuristic) as Box<dyn MainEntryHeuristic>],
            models: Vec::new(),
            image: None,
            symbols: None,
            loaded: None,
        }
    }

    /// Replace the diagnostics sink.
    pub fn with_sink(mut self, sink: impl LogSink + Send + 'static) -> Self {
        self.sink = Mutex::new(Box::new(sink));
        self
    }

    /// Add a main-entry heuristic, tried after the built-in ones.
    pub fn with_heuristic(mut self, heuristic: impl MainEntryHeuristic + 'static) -> Self {
        self.heuristics.push(Box::new(heuristic));
        self
    }

    /// Use `model` for its machine instead of the built-in table.
    pub fn with_relocation_model(mut self, model: impl RelocationModel + Send + 'static) -> Self {
        self.models.push(Box::new(model));
        self
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.is_some()
    }

    pub fn endian(&self) -> Option<Endian> {
        self.loaded.as_ref().map(|l| l.layout.endian)
    }

    /// `e_type` of the loaded file.
    pub fn elf_type(&self) -> Option<u16> {
        self.loaded.as_ref().map(|l| l.layout.header.e_type)
    }

    /// Lowest loadable address: minimum `PT_LOAD` vaddr, or the lowest
    /// mapped section when there are no program headers.
    pub fn base_address(&self) -> Option<Address> {
        let loaded = self.loaded.as_ref()?;
        loaded
            .layout
            .base_address
            .or_else(|| loaded.sections.lowest_address())
    }

    /// Half-open PLT range.
    pub fn plt_bounds(&self) -> Option<(Address, Address)> {
        Some(self.loaded.as_ref()?.plt.as_ref()?.bounds())
    }

    /// Resolved section records.
    pub fn sections(&self) -> Option<&SectionTable> {
        self.loaded.as_ref().map(|l| &l.sections)
    }

    /// NUL-terminated string at `offset` in section `section`.
    pub fn get_str_ptr(&self, section: usize, offset: u32) -> Option<&str> {
        let loaded = self.loaded.as_ref()?;
        loaded.sections.get_str_ptr(&loaded.data, section, offset)
    }

    /// PLT stub for symbol index `sym` of the PLT's symbol table.
    pub fn find_rel_plt_offset(&self, sym: u32) -> Option<Address> {
        self.loaded.as_ref()?.plt.as_ref()?.find_rel_plt_offset(sym)
    }

    pub fn soname(&self) -> Option<String> {
        let loaded = self.loaded.as_ref()?;
        dynamic::soname(&loaded.sections, &loaded.data, loaded.layout.endian)
    }

    pub fn relocation_stats(&self) -> Option<RelocStats> {
        self.loaded.as_ref().map(|l| l.relocation_stats)
    }

    /// Every recorded relocation site, sorted.
    pub fn relocation_sites(&self) -> Vec<Address> {
        let mut sites: Vec<Address> = self
            .loaded
            .iter()
            .flat_map(|l| l.relocation_sites.iter().copied())
            .collect();
        sites.sort_unstable();
        sites
    }

    /// The loaded bytes, with relocations applied.
    pub fn data(&self) -> Option<&[u8]> {
        self.loaded.as_ref().map(|l| l.data.as_slice())
    }

    fn handles(&self) -> Option<(ImageHandle, SymbolHandle)> {
        Some((self.image.clone()?, self.symbols.clone()?))
    }
}

impl FileLoader for ElfLoader {
    fn initialize(&mut self, image: ImageHandle, symbols: SymbolHandle) {
        self.unload();
        self.image = Some(image);
        self.symbols = Some(symbols);
    }

    fn can_load(&self, header: &[u8]) -> u32 {
        if header.len() < ELF_MAGIC.len() || header[..4] != ELF_MAGIC {
            return 0;
        }
        match header.get(EI_CLASS) {
            None => 1,
            Some(&ELFCLASS32) => CONFIDENCE_ELF32,
            Some(_) => 0,
        }
    }

    fn load_from_memory(&mut self, data: Vec<u8>) -> Result<(), LoadError> {
        let Some((image, symbol_table)) = self.handles() else {
            return Err(LoadError::NotInitialized);
        };
        self.unload();

        let sink = &mut **self.sink.get_mut();
        let limits = ParseLimits {
            max_sections: self.config.max_sections,
            max_segments: self.config.max_segments,
        };
        let layout = match header::parse(&data, &limits) {
            Ok(layout) => layout,
            Err(err) => {
                diag!(sink, Warn, "Rejected {} byte file: {}", data.len(), err);
                return Err(err.into());
            }
        };
        let machine = machine_from(layout.header.e_machine);
        diag!(
            sink,
            Debug,
            "{} type {} {:?}-endian, {} segments, {} sections",
            machine,
            layout.header.e_type,
            layout.endian,
            layout.program_headers.len(),
            layout.section_headers.len()
        );

        let sections = SectionTable::resolve(&layout, &data, self.config.relocatable_base, sink);
        let plt = PltInfo::scan(&sections, &data, layout.endian);

        let ctx = SymbolContext {
            layout: &layout,
            sections: &sections,
            data: &data,
        };
        let collected = symbols::collect(&ctx, plt.as_ref(), self.config.extern_slot_size, sink);
        let pending = reloc::plan(&ctx, &collected.imports, sink);

        let model = self
            .models
            .iter()
            .find(|m| m.machine() == machine)
            .map(|m| &**m as &dyn RelocationModel)
            .or_else(|| reloc::model_for(machine));
        let mut data = data;
        let mut relocation_sites = HashSet::new();
        let relocation_stats = reloc::apply(
            &mut data,
            layout.endian,
            model,
            &pending,
            self.config.apply_relocations,
            &mut relocation_sites,
            sink,
        );

        // Commit
        {
            let mut image = image.lock();
            for section in sections.mapped() {
                let name = if section.name.is_empty() {
                    format!("section{}", section.index)
                } else {
                    section.name.clone()
                };
                let info = SectionInfo {
                    name,
                    address: section.address,
                    size: section.size as u64,
                    flags: section.image_flags(),
                };
                let bytes = sections.section_data(&data, section.index).unwrap_or(&[]);
                if !image.add_section(info, bytes) {
                    diag!(sink, Warn, "Section {} at {} not mapped", section.name, section.address);
                }
            }
            if let Some(area) = &collected.extern_area {
                let info = SectionInfo {
                    name: String::from(EXTERN_SECTION),
                    address: area.base(),
                    size: area.size(),
                    flags: SectionFlags::BSS | SectionFlags::SYNTHETIC,
                };
                if !image.add_section(info, &[]) {
                    diag!(sink, Warn, "Extern area at {} not mapped", area.base());
                }
            }
        }
        let symbol_count = collected.symbols.len();
        {
            let mut table = symbol_table.lock();
            for symbol in collected.symbols {
                table.insert(symbol);
            }
            if self.config.mark_imports {
                if let Some((min, max)) = plt.as_ref().map(PltInfo::bounds) {
                    let marked = table.mark_range(
                        min,
                        max,
                        SymbolAttrs::IMPORTED | SymbolAttrs::THUNK,
                        Some(SymbolKind::Function),
                    );
                    diag!(sink, Trace, "{} symbols in the PLT marked imported", marked);
                }
            }
        }

        diag!(
            sink,
            Info,
            "Loaded {} image: {} symbols, {} relocation sites, {} patched",
            machine,
            symbol_count,
            relocation_stats.recorded,
            relocation_stats.applied
        );

        self.loaded = Some(LoadedElf {
            data,
            layout,
            sections,
            machine,
            plt,
            relocation_sites,
            relocation_stats,
        });
        Ok(())
    }

    fn unload(&mut self) {
        if self.loaded.take().is_none() {
            return;
        }
        if let Some(image) = &self.image {
            image.lock().clear();
        }
        if let Some(symbols) = &self.symbols {
            symbols.lock().clear();
        }
        diag!(&mut **self.sink.get_mut(), Trace, "Unloaded");
    }

    fn close(&mut self) {
        self.unload();
        self.image = None;
        self.symbols = None;
    }

    fn format(&self) -> LoadFormat {
        LoadFormat::Elf
    }

    fn machine(&self) -> Machine {
        self.loaded
            .as_ref()
            .map_or(Machine::Unknown, |l| l.machine)
    }

    fn main_entry_point(&self) -> Option<Address> {
        let entry = self.entry_point()?;
        let machine = self.machine();
        let (image, symbols) = self.handles()?;
        let image = image.lock();
        let symbols = symbols.lock();

        if let Some(main) = symbols.find_by_name("main").filter(|s| !s.is_imported()) {
            return Some(main.address);
        }

        let ctx = EntryContext {
            machine,
            entry,
            image: &*image,
            symbols: &*symbols,
        };
        let (addr, heuristic) = self
            .heuristics
            .iter()
            .find_map(|h| h.find_main(&ctx).map(|addr| (addr, h.name())))?;
        diag!(&mut **self.sink.lock(), Debug, "main at {} via {}", addr, heuristic);
        Some(addr)
    }

    fn entry_point(&self) -> Option<Address> {
        self.loaded
            .as_ref()
            .map(|l| Address::from(l.layout.header.e_entry))
    }

    fn is_relocation_at(&self, addr: Address) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|l| l.relocation_sites.contains(&addr))
    }

    fn is_library(&self) -> bool {
        self.loaded
            .as_ref()
            .is_some_and(|l| l.layout.is_shared_object())
    }

    fn dependency_list(&self) -> Vec<String> {
        match &self.loaded {
            Some(l) => dynamic::needed_libraries(&l.sections, &l.data, l.layout.endian),
            None => Vec::new(),
        }
    }
}

/// Registry entry for [`ElfLoader`].
#[derive(Debug, Clone, Default)]
pub struct ElfLoaderPlugin {
    config: LoaderConfig,
    sink: Option<MemorySink>,
}

impl ElfLoaderPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        Self { config, sink: None }
    }

    /// Loaders created by this plugin report into `sink`.
    pub fn with_sink(mut self, sink: MemorySink) -> Self {
        self.sink = Some(sink);
        self
    }
}

impl LoaderPlugin for ElfLoaderPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "elf32",
            version: env!("CARGO_PKG_VERSION"),
            author: "rekon Contributors",
        }
    }

    fn create(&self) -> Box<dyn FileLoader + Send> {
        let loader = ElfLoader::with_config(self.config);
        match &self.sink {
            Some(sink) => Box::new(loader.with_sink(sink.clone())),
            None => Box::new(loader),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{ElfBuilder, SectionSpec, SegmentSpec};
    use alloc::sync::Arc;
    use alloc::vec;
    use rekon_db::{BinaryImage, Level, LoaderRegistry, MemoryImage, SymbolStore, SymbolTable};

    fn handles() -> (Arc<Mutex<MemoryImage>>, Arc<Mutex<SymbolStore>>) {
        (
            Arc::new(Mutex::new(MemoryImage::new())),
            Arc::new(Mutex::new(SymbolStore::new())),
        )
    }

    fn loader_with(image: &Arc<Mutex<MemoryImage>>, symbols: &Arc<Mutex<SymbolStore>>) -> ElfLoader {
        let mut loader = ElfLoader::new();
        loader.initialize(image.clone(), symbols.clone());
        loader
    }

    fn simple(machine: u16) -> Vec<u8> {
        let mut b = ElfBuilder::new(machine, Endian::Little);
        b.entry(0x8000);
        let text = b.section(SectionSpec::progbits(".text", 0x8000, vec![0x90; 0x20]).code());
        b.segment(SegmentSpec::Section {
            index: text,
            flags: SegmentFlags::R | SegmentFlags::X,
        });
        b.build()
    }

    #[test]
    fn test_can_load() {
        let loader = ElfLoader::new();
        let data = simple(EM_386);
        assert_eq!(loader.can_load(&data[..16]), CONFIDENCE_ELF32);
        assert_eq!(loader.can_load(&data[..4]), 1);
        assert_eq!(loader.can_load(b"\x7fEL"), 0);
        assert_eq!(loader.can_load(b"MZ\x90\x00\x03\x00\x00\x00"), 0);

        let mut elf64 = data[..16].to_vec();
        elf64[EI_CLASS] = ELFCLASS64;
        assert_eq!(loader.can_load(&elf64), 0);
    }

    #[test]
    fn test_not_initialized() {
        let mut loader = ElfLoader::new();
        assert_eq!(
            loader.load_from_memory(simple(EM_386)),
            Err(LoadError::NotInitialized)
        );
        assert!(!loader.is_loaded());
    }

    #[test]
    fn test_failed_load_leaves_nothing_behind() {
        let (image, symbols) = handles();
        let sink = MemorySink::new();
        let mut loader = ElfLoader::new().with_sink(sink.clone());
        loader.initialize(image.clone(), symbols.clone());

        loader.load_from_memory(simple(EM_386)).unwrap();
        assert_eq!(image.lock().section_count(), 1);

        let mut bad = simple(EM_386);
        bad[0] = 0;
        assert_eq!(
            loader.load_from_memory(bad),
            Err(LoadError::Malformed("invalid ELF magic"))
        );
        assert!(!loader.is_loaded());
        assert_eq!(image.lock().section_count(), 0);
        assert!(symbols.lock().is_empty());
        assert_eq!(loader.entry_point(), None);
        assert_eq!(loader.machine(), Machine::Unknown);
        assert!(sink.contains(Level::Warn, "invalid ELF magic"));
    }

    #[test]
    fn test_unload_is_idempotent() {
        let (image, symbols) = handles();
        let mut loader = loader_with(&image, &symbols);
        loader.load_from_memory(simple(EM_386)).unwrap();
        assert_eq!(loader.machine(), Machine::X86);

        loader.unload();
        loader.unload();
        assert!(!loader.is_loaded());
        assert_eq!(image.lock().section_count(), 0);
        assert!(loader.dependency_list().is_empty());

        loader.close();
        loader.close();
        assert_eq!(
            loader.load_from_memory(simple(EM_386)),
            Err(LoadError::NotInitialized)
        );
    }

    #[test]
    fn test_reload_replaces_previous() {
        let (image, symbols) = handles();
        let mut loader = loader_with(&image, &symbols);
        loader.load_from_memory(simple(EM_386)).unwrap();
        loader.load_from_memory(simple(EM_SPARC)).unwrap();
        assert_eq!(loader.machine(), Machine::Sparc);
        assert_eq!(image.lock().section_count(), 1);
        assert_eq!(loader.format(), LoadFormat::Elf);
        assert!(!loader.is_library());
        assert_eq!(loader.base_address(), Some(Address::new(0x8000)));
    }

    #[test]
    fn test_plugin_through_registry() {
        let mut registry = LoaderRegistry::new();
        registry.register(Box::new(ElfLoaderPlugin::new()));

        let data = simple(EM_ARM);
        let (info, mut loader) = registry.select(&data[..16]).unwrap();
        assert_eq!(info.name, "elf32");

        let (image, symbols) = handles();
        loader.initialize(image.clone(), symbols);
        loader.load_from_memory(data).unwrap();
        assert_eq!(loader.machine(), Machine::Arm);
        assert_eq!(loader.entry_point(), Some(Address::new(0x8000)));
        assert!(image.lock().section_by_name(".text").is_some());
    }
}

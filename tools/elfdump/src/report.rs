//! What elfdump prints about a loaded file.

use std::fmt;

use rekon_db::{
    Address, BinarySymbol, BinaryImage, FileLoader, ImageSection, LogRecord, MemoryImage,
    PluginInfo, SymbolAttrs, SymbolKind, SymbolStore, SymbolTable,
};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionRow {
    pub name: String,
    pub address: String,
    pub size: u64,
    pub flags: Vec<String>,
}

impl From<&ImageSection> for SectionRow {
    fn from(section: &ImageSection) -> Self {
        Self {
            name: section.name().to_string(),
            address: section.address().to_string(),
            size: section.size(),
            flags: section
                .flags()
                .iter_names()
                .map(|(name, _)| name.to_ascii_lowercase())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolRow {
    pub name: String,
    pub address: String,
    pub size: u64,
    pub kind: &'static str,
    pub imported: bool,
    pub thunk: bool,
}

impl SymbolRow {
    fn new(symbol: &BinarySymbol) -> Self {
        Self {
            name: symbol.name.clone(),
            address: symbol.address.to_string(),
            size: symbol.size,
            kind: match symbol.kind {
                SymbolKind::Function => "function",
                SymbolKind::Object => "object",
                SymbolKind::Other => "other",
            },
            imported: symbol.attrs.contains(SymbolAttrs::IMPORTED),
            thunk: symbol.attrs.contains(SymbolAttrs::THUNK),
        }
    }
}

/// Answer to a `--relocs-at` query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RelocQuery {
    pub address: String,
    pub relocated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub level: String,
    pub message: String,
}

impl From<&LogRecord> for Diagnostic {
    fn from(record: &LogRecord) -> Self {
        Self {
            level: record.level.as_str().to_ascii_lowercase(),
            message: record.message.clone(),
        }
    }
}

/// Which optional listings to include.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Detail {
    pub sections: bool,
    pub symbols: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub path: String,
    pub loader: String,
    pub format: String,
    pub machine: String,
    pub entry_point: Option<String>,
    pub main_entry_point: Option<String>,
    pub library: bool,
    pub dependencies: Vec<String>,
    pub section_count: usize,
    pub symbol_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sections: Option<Vec<SectionRow>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<SymbolRow>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub relocations: Vec<RelocQuery>,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    /// Snapshot a loader after a successful load.
    ///
    /// `main_entry_point` is queried up front since the loader locks the
    /// image and symbol table to answer it.
    #[allow(clippy::too_many_arguments)]
    pub fn collect(
        path: &str,
        plugin: &PluginInfo,
        loader: &dyn FileLoader,
        image: &MemoryImage,
        symbols: &SymbolStore,
        main_entry_point: Option<Address>,
        relocs_at: &[Address],
        detail: Detail,
        diagnostics: &[LogRecord],
    ) -> Self {
        Self {
            path: path.to_string(),
            loader: format!("{} {}", plugin.name, plugin.version),
            format: loader.format().to_string(),
            machine: loader.machine().to_string(),
            entry_point: loader.entry_point().map(|a| a.to_string()),
            main_entry_point: main_entry_point.map(|a| a.to_string()),
            library: loader.is_library(),
            dependencies: loader.dependency_list(),
            section_count: image.section_count(),
            symbol_count: symbols.len(),
            sections: detail
                .sections
                .then(|| image.sections().map(SectionRow::from).collect()),
            symbols: detail
                .symbols
                .then(|| symbols.iter().map(SymbolRow::new).collect()),
            relocations: relocs_at
                .iter()
                .map(|&addr| RelocQuery {
                    address: addr.to_string(),
                    relocated: loader.is_relocation_at(addr),
                })
                .collect(),
            diagnostics: diagnostics.iter().map(Diagnostic::from).collect(),
        }
    }
}

fn or_none(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("none")
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}: {} {} ({})", self.path, self.format, self.machine, self.loader)?;
        writeln!(f, "  kind:        {}", if self.library { "library" } else { "program" })?;
        writeln!(f, "  entry point: {}", or_none(&self.entry_point))?;
        writeln!(f, "  main:        {}", or_none(&self.main_entry_point))?;
        writeln!(f, "  sections:    {}", self.section_count)?;
        writeln!(f, "  symbols:     {}", self.symbol_count)?;
        for dep in &self.dependencies {
            writeln!(f, "  needs:       {dep}")?;
        }

        if let Some(sections) = &self.sections {
            writeln!(f)?;
            writeln!(f, "Sections:")?;
            for s in sections {
                writeln!(
                    f,
                    "  {:<12} {:>10} {:>8x}  {}",
                    s.name,
                    s.address,
                    s.size,
                    s.flags.join(",")
                )?;
            }
        }

        if let Some(symbols) = &self.symbols {
            writeln!(f)?;
            writeln!(f, "Symbols:")?;
            for s in symbols {
                let mark = match (s.imported, s.thunk) {
                    (true, true) => " [import, stub]",
                    (true, false) => " [import]",
                    _ => "",
                };
                writeln!(f, "  {:>10} {:<8} {}{}", s.address, s.kind, s.name, mark)?;
            }
        }

        if !self.relocations.is_empty() {
            writeln!(f)?;
            writeln!(f, "Relocations:")?;
            for r in &self.relocations {
                let answer = if r.relocated { "relocated" } else { "not relocated" };
                writeln!(f, "  {:>10} {}", r.address, answer)?;
            }
        }

        if !self.diagnostics.is_empty() {
            writeln!(f)?;
            writeln!(f, "Diagnostics:")?;
            for d in &self.diagnostics {
                writeln!(f, "  {:<5} {}", d.level, d.message)?;
            }
        }
        Ok(())
    }
}

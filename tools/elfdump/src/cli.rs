use std::path::PathBuf;

use clap::Parser;
use rekon_db::Address;

use crate::output::OutputFormat;

/// Load a binary the way the decompiler does and report what was found.
#[derive(Parser, Debug, Clone)]
#[command(name = "elfdump", version, about)]
pub struct Cli {
    /// File to load.
    pub path: PathBuf,

    /// Output format.
    #[arg(long, value_enum, default_value = "human")]
    pub output: OutputFormat,

    /// List the symbols the loader registered.
    #[arg(long)]
    pub symbols: bool,

    /// List the sections mapped into the image.
    #[arg(long)]
    pub sections: bool,

    /// Ask whether a relocation was applied at this address (hex or decimal, repeatable).
    #[arg(long = "relocs-at", value_name = "ADDR", value_parser = parse_address)]
    pub relocs_at: Vec<Address>,

    /// Record relocation sites without patching them.
    #[arg(long)]
    pub no_relocate: bool,

    /// Log loader activity to stderr (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Parse `0x`-prefixed hex or plain decimal.
pub fn parse_address(text: &str) -> Result<Address, String> {
    let text = text.trim();
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse::<u64>(),
    };
    parsed
        .map(Address::new)
        .map_err(|e| format!("invalid address '{text}': {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_parse_as_hex_or_decimal() {
        assert_eq!(parse_address("0x8048000"), Ok(Address::new(0x0804_8000)));
        assert_eq!(parse_address("0XFF"), Ok(Address::new(0xff)));
        assert_eq!(parse_address("4096"), Ok(Address::new(4096)));
        assert!(parse_address("0x").is_err());
        assert!(parse_address("main").is_err());
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "elfdump",
            "a.out",
            "--output",
            "json",
            "--symbols",
            "--relocs-at",
            "0x8010",
            "--relocs-at",
            "32788",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.path, PathBuf::from("a.out"));
        assert_eq!(cli.output, OutputFormat::Json);
        assert!(cli.symbols);
        assert!(!cli.sections);
        assert!(!cli.no_relocate);
        assert_eq!(cli.relocs_at, [Address::new(0x8010), Address::new(0x8014)]);
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn path_is_required() {
        assert!(Cli::try_parse_from(["elfdump"]).is_err());
    }
}

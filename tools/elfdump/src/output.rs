use serde::Serialize;
use std::fmt;
use std::io::{self, Write};

/// Report format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Single JSON object on stdout.
    Json,
    /// Plain text summary on stdout.
    #[default]
    Human,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "json"),
            Self::Human => write!(f, "human"),
        }
    }
}

/// Render a value in the selected format.
pub fn render<T: Serialize + fmt::Display>(
    format: OutputFormat,
    value: &T,
) -> Result<String, serde_json::Error> {
    match format {
        OutputFormat::Json => serde_json::to_string(value),
        OutputFormat::Human => Ok(value.to_string()),
    }
}

/// Write a successful result to stdout.
pub fn emit<T: Serialize + fmt::Display>(format: OutputFormat, value: &T) -> io::Result<()> {
    let text = render(format, value).map_err(io::Error::other)?;
    let mut out = io::stdout().lock();
    writeln!(out, "{}", text.trim_end())
}

/// Render an error. JSON errors carry the exit code.
pub fn render_error(format: OutputFormat, exit_code: u8, message: &str) -> String {
    match format {
        OutputFormat::Json => serde_json::json!({
            "error": message,
            "exit_code": exit_code,
        })
        .to_string(),
        OutputFormat::Human => format!("error: {message}"),
    }
}

/// Write an error to stdout (JSON mode) or stderr (human mode).
pub fn emit_error(format: OutputFormat, exit_code: u8, message: &str) {
    let text = render_error(format, exit_code, message);
    match format {
        // JSON callers always get valid JSON on stdout
        OutputFormat::Json => println!("{text}"),
        OutputFormat::Human => eprintln!("{text}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Sample {
        name: &'static str,
        count: u32,
    }

    impl fmt::Display for Sample {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{}: {}", self.name, self.count)
        }
    }

    #[test]
    fn json_render_is_one_object() {
        let text = render(OutputFormat::Json, &Sample { name: "x", count: 42 }).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed["name"], "x");
        assert_eq!(parsed["count"], 42);
        assert!(!text.contains('\n'));
    }

    #[test]
    fn human_render_uses_display() {
        let text = render(OutputFormat::Human, &Sample { name: "x", count: 42 }).unwrap();
        assert_eq!(text, "x: 42");
    }

    #[test]
    fn error_rendering() {
        let json = render_error(OutputFormat::Json, 2, "no loader");
        let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed["error"], "no loader");
        assert_eq!(parsed["exit_code"], 2);
        assert_eq!(render_error(OutputFormat::Human, 1, "bad"), "error: bad");
    }

    #[test]
    fn format_display() {
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::default().to_string(), "human");
    }
}

use std::path::Path;

use {
    tidemark_config::{Diagnostic, Severity, TidemarkConfig, ValidationResult},
    tidemark_media::{FontRasterizer, Transcoder},
};

/// ANSI color codes.
const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const CYAN: &str = "\x1b[36m";
const BOLD: &str = "\x1b[1m";
const RESET: &str = "\x1b[0m";

/// File checks, then semantic and runtime checks on the effective config.
///
/// Semantic checks are skipped when the file itself has errors.
pub fn collect(path: Option<&Path>) -> ValidationResult {
    let mut result = tidemark_config::validate(path);
    if result.has_errors() {
        return result;
    }

    let config = match crate::load(path) {
        Ok(config) => config,
        Err(e) => {
            result.diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("{e:#}"),
            });
            return result;
        },
    };
    result
        .diagnostics
        .extend(tidemark_config::check_config(&config));
    result.diagnostics.extend(runtime_checks(&config));
    result
}

/// Font and transcoder availability. Both degrade to unmarked delivery.
fn runtime_checks(config: &TidemarkConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    match FontRasterizer::discover(config.watermark.font_path.as_deref()) {
        Ok(font) => diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "file-ref",
            path: "watermark.font_path".into(),
            message: format!("using font {}", font.source().display()),
        }),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "file-ref",
            path: "watermark.font_path".into(),
            message: format!("{e}; images will be delivered unmarked"),
        }),
    }

    match Transcoder::new(&config.transcoder.binary).resolve() {
        Ok(path) => diagnostics.push(Diagnostic {
            severity: Severity::Info,
            category: "file-ref",
            path: "transcoder.binary".into(),
            message: format!("using {}", path.display()),
        }),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "file-ref",
            path: "transcoder.binary".into(),
            message: format!("{e}; videos will be delivered unmarked"),
        }),
    }

    diagnostics
}

/// Human-readable report. Info lines only when `verbose`.
pub fn render(result: &ValidationResult, verbose: bool, color: bool) -> String {
    let paint = |code: &'static str| if color { code } else { "" };
    let mut out = String::new();

    match &result.config_path {
        Some(path) => out.push_str(&format!("Checking {}\n\n", path.display())),
        None => out.push_str("No config file found; checking defaults.\n\n"),
    }

    let mut shown = 0;
    for d in &result.diagnostics {
        if d.severity == Severity::Info && !verbose {
            continue;
        }
        let tint = match d.severity {
            Severity::Error => paint(RED),
            Severity::Warning => paint(YELLOW),
            Severity::Info => paint(CYAN),
        };
        let (bold, reset) = (paint(BOLD), paint(RESET));
        if d.path.is_empty() {
            out.push_str(&format!("  {bold}{tint}{}{reset} {}\n", d.severity, d.message));
        } else {
            out.push_str(&format!(
                "  {bold}{tint}{}{reset} {}: {}\n",
                d.severity, d.path, d.message
            ));
        }
        shown += 1;
    }
    if shown > 0 {
        out.push('\n');
    }

    let errors = result.count(Severity::Error);
    let warnings = result.count(Severity::Warning);
    if errors == 0 && warnings == 0 {
        out.push_str("No issues found.\n");
    } else {
        out.push_str(&format!("{errors} error(s), {warnings} warning(s)\n"));
    }
    out
}

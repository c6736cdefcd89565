// diag.rs — Structured errors and source-region diagnostics.
//
// Every failure in the evaluator is an `Err`: a kind, an optional source
// region, and a message. Regions are half-open byte ranges `[start, stop)`
// measured against the whole file; `add_ctx` rebases them onto a block's
// own text and appends a highlight. Only `CompilerErr` is enriched with
// pipeline-internal debug context — user-facing kinds stay clean.

use std::fmt;

use serde::Serialize;

// ── Error kind ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrKind {
    ParseErr,
    TypeErr,
    LinErr,
    UnboundVarErr,
    CompilerErr,
    NotImplementedErr,
    RuntimeErr,
}

impl ErrKind {
    fn label(self) -> &'static str {
        match self {
            ErrKind::ParseErr => "Parse error",
            ErrKind::TypeErr => "Type error",
            ErrKind::LinErr => "Linearity error",
            ErrKind::UnboundVarErr => "Variable not in scope",
            ErrKind::CompilerErr => "Compiler bug!",
            ErrKind::NotImplementedErr => "Not implemented",
            ErrKind::RuntimeErr => "Runtime error",
        }
    }
}

// ── Source region ────────────────────────────────────────────────────────

/// Half-open byte range `[start, stop)` in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SrcRegion {
    pub start: usize,
    pub stop: usize,
}

impl SrcRegion {
    pub fn new(start: usize, stop: usize) -> Self {
        Self { start, stop }
    }

    /// Cover both regions.
    pub fn merge(self, other: SrcRegion) -> SrcRegion {
        SrcRegion {
            start: self.start.min(other.start),
            stop: self.stop.max(other.stop),
        }
    }

    /// Shift a file-absolute region onto a block starting at `offset`.
    pub fn rebase(self, offset: usize) -> SrcRegion {
        SrcRegion {
            start: self.start.saturating_sub(offset),
            stop: self.stop.saturating_sub(offset),
        }
    }
}

// ── Err ──────────────────────────────────────────────────────────────────

/// A structured evaluation error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Err {
    pub kind: ErrKind,
    pub region: Option<SrcRegion>,
    pub msg: String,
}

impl Err {
    pub fn new(kind: ErrKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            region: None,
            msg: msg.into(),
        }
    }

    /// Shorthand for internal invariant violations and hard host failures.
    pub fn compiler(msg: impl Into<String>) -> Self {
        Self::new(ErrKind::CompilerErr, msg)
    }

    pub fn with_region(mut self, region: SrcRegion) -> Self {
        self.region = Some(region);
        self
    }
}

impl fmt::Display for Err {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.label(), self.msg)
    }
}

// ── Block context ────────────────────────────────────────────────────────

/// Rebase an error's region onto a block and append a highlight of the
/// offending text. Errors without a region pass through unchanged.
pub fn add_ctx(block_text: &str, block_offset: usize, mut err: Err) -> Err {
    let region = match err.region {
        Some(r) => r.rebase(block_offset),
        None => return err,
    };
    err.region = Some(region);
    let highlight = highlight_region(block_text, region);
    if !highlight.is_empty() {
        err.msg.push_str("\n\n");
        err.msg.push_str(&highlight);
    }
    err
}

/// Append pipeline-internal context to compiler errors only. A type error
/// must not be polluted with pass-internal pretty prints.
pub fn add_debug_ctx(ctx: &str, mut err: Err) -> Err {
    if err.kind == ErrKind::CompilerErr {
        err.msg.push_str("\n=== context ===\n");
        err.msg.push_str(ctx);
    }
    err
}

/// Render the line containing `region` with a caret underline.
///
/// Regions are byte offsets; slicing is guarded so a region that lands off
/// a UTF-8 boundary or outside the text yields no highlight rather than a
/// panic. Multi-line regions are underlined up to the end of the first line.
pub fn highlight_region(text: &str, region: SrcRegion) -> String {
    let start = region.start.min(text.len());
    let stop = region.stop.clamp(start, text.len());

    let line_start = match text.get(..start) {
        Some(head) => head.rfind('\n').map_or(0, |i| i + 1),
        None => return String::new(),
    };
    let line_stop = match text.get(start..) {
        Some(tail) => start + tail.find('\n').unwrap_or(tail.len()),
        None => return String::new(),
    };
    let line = match text.get(line_start..line_stop) {
        Some(l) => l,
        None => return String::new(),
    };

    let pad = " ".repeat(start - line_start);
    let width = (stop.min(line_stop) - start).max(1);
    format!("{}\n{}{}\n", line, pad, "^".repeat(width))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_labels_by_kind() {
        let e = Err::new(ErrKind::TypeErr, "expected Int, got Real");
        assert_eq!(e.to_string(), "Type error: expected Int, got Real");
        let e = Err::compiler("oops");
        assert_eq!(e.to_string(), "Compiler bug!: oops");
    }

    #[test]
    fn rebase_subtracts_offset() {
        let r = SrcRegion::new(12, 15).rebase(10);
        assert_eq!(r, SrcRegion::new(2, 5));
    }

    #[test]
    fn add_ctx_rebases_and_highlights() {
        let text = "x = y + 1\n";
        // `y` at file offset 104, block offset 100.
        let err = Err::new(ErrKind::UnboundVarErr, "y").with_region(SrcRegion::new(104, 105));
        let err = add_ctx(text, 100, err);
        assert_eq!(err.region, Some(SrcRegion::new(4, 5)));
        assert!(err.msg.contains("x = y + 1"));
        assert!(err.msg.contains("    ^"));
    }

    #[test]
    fn add_ctx_leaves_regionless_errors() {
        let err = Err::new(ErrKind::ParseErr, "unexpected token");
        let out = add_ctx("text", 0, err.clone());
        assert_eq!(out, err);
    }

    #[test]
    fn debug_ctx_only_for_compiler_errors() {
        let e = add_debug_ctx("jit pass with input:\nfoo\n", Err::compiler("boom"));
        assert!(e.msg.contains("=== context ===\njit pass with input:"));
        let e = add_debug_ctx("ctx", Err::new(ErrKind::TypeErr, "bad"));
        assert!(!e.msg.contains("=== context ==="));
    }

    #[test]
    fn highlight_clamps_to_line() {
        let text = "ab\ncdef\ngh";
        let h = highlight_region(text, SrcRegion::new(4, 6));
        assert_eq!(h, "cdef\n ^^\n");
    }

    #[test]
    fn highlight_out_of_range_never_panics() {
        let h = highlight_region("ab", SrcRegion::new(10, 12));
        // Clamped to the end of the text: underlines nothing meaningful but
        // never panics.
        assert!(h.is_empty() || h.starts_with("ab"));
    }
}

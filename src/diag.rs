//! Source locations and the diagnostic subsystem (component C2).
//!
//! Ported from `include/loc.h` and `include/diagnostics.h`: a `SrcLoc` is an
//! `(offset, length)` pair into the translation unit's text; the tracker
//! owns a sorted line-break index for reconstructing line/column, and a
//! growing list of severities/locations/messages. Diagnostics never abort
//! parsing (`spec.md` §7) — they are recorded as a side effect and the
//! parser always keeps going.

use std::fmt;

/// A `(byte_offset, length)` span into the current translation unit's text.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SrcLoc {
  pub offset: u32,
  pub len: u32,
}

impl SrcLoc {
  #[must_use]
  pub fn new(offset: u32, len: u32) -> Self { Self { offset, len } }

  #[must_use]
  pub fn end(self) -> u32 { self.offset + self.len }

  /// A zero-length point location at the start of `self`, used for
  /// diagnostics that want to point at a position rather than a range
  /// (`SrcLoc::truncate(0)` in the original).
  #[must_use]
  pub fn truncate(self) -> Self { Self { offset: self.offset, len: 0 } }
}

impl std::ops::BitOr for SrcLoc {
  type Output = SrcLoc;
  /// Union of two locations: `(min offset, max end - min offset)`.
  fn bitor(self, other: SrcLoc) -> SrcLoc {
    let lo = self.offset.min(other.offset);
    let hi = self.end().max(other.end());
    SrcLoc::new(lo, hi - lo)
  }
}

/// Diagnostic severity.
#[derive(Clone, Copy, PartialEq, Eq, Debug, PartialOrd, Ord)]
pub enum Severity {
  Note,
  Warning,
  Error,
}

/// A single recorded diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
  pub severity: Severity,
  pub loc: Option<SrcLoc>,
  pub message: String,
}

/// Owns the source text, the line-break index, and the accumulated
/// diagnostics for one translation unit (`spec.md` §4.2).
pub struct DiagnosticTracker {
  source: String,
  line_breaks: Vec<u32>,
  diagnostics: Vec<Diagnostic>,
  silenced: u32,
  had_error: bool,
}

impl DiagnosticTracker {
  #[must_use]
  pub fn new(source: impl Into<String>) -> Self {
    let source = source.into();
    let mut line_breaks = vec![0];
    for (i, b) in source.bytes().enumerate() {
      if b == b'\n' { line_breaks.push(u32::try_from(i + 1).unwrap_or(u32::MAX)) }
    }
    Self { source, line_breaks, diagnostics: vec![], silenced: 0, had_error: false }
  }

  #[must_use]
  pub fn source(&self) -> &str { &self.source }

  #[must_use]
  pub fn source_at(&self, loc: SrcLoc) -> &str {
    let start = loc.offset as usize;
    let end = loc.end() as usize;
    &self.source[start.min(self.source.len())..end.min(self.source.len())]
  }

  /// Record a diagnostic at `loc` with the given `severity`. Silenced
  /// (cascaded) errors are dropped, not buffered (`spec.md` §4.2).
  pub fn report(&mut self, severity: Severity, loc: Option<SrcLoc>, message: impl Into<String>) {
    if self.silenced > 0 { return }
    if severity == Severity::Error { self.had_error = true }
    self.diagnostics.push(Diagnostic { severity, loc, message: message.into() });
  }

  pub fn error(&mut self, loc: SrcLoc, message: impl Into<String>) {
    self.report(Severity::Error, Some(loc), message);
  }

  pub fn warning(&mut self, loc: SrcLoc, message: impl Into<String>) {
    self.report(Severity::Warning, Some(loc), message);
  }

  /// A `note:` attached to the diagnostic immediately preceding it, e.g.
  /// "previous declaration here".
  pub fn note(&mut self, loc: SrcLoc, message: impl Into<String>) {
    self.report(Severity::Note, Some(loc), message);
  }

  /// Suppress further diagnostics (used while recovering from an error that
  /// would otherwise cascade into unrelated follow-on errors).
  pub fn silence(&mut self) { self.silenced += 1 }

  pub fn unsilence(&mut self) {
    self.silenced = self.silenced.saturating_sub(1);
  }

  /// True iff no error-severity diagnostic has been recorded.
  #[must_use]
  pub fn empty(&self) -> bool { !self.had_error }

  #[must_use]
  pub fn diagnostics(&self) -> &[Diagnostic] { &self.diagnostics }

  /// 1-based (line, column) for a byte offset, via binary search over the
  /// line-break index.
  #[must_use]
  pub fn line_col(&self, offset: u32) -> (u32, u32) {
    let line_idx = match self.line_breaks.binary_search(&offset) {
      Ok(i) => i,
      Err(i) => i.saturating_sub(1),
    };
    let line_start = self.line_breaks[line_idx];
    (u32::try_from(line_idx + 1).unwrap_or(u32::MAX), offset - line_start + 1)
  }

  fn line_text(&self, offset: u32) -> &str {
    let (line_idx, _) = self.line_col(offset);
    let start = self.line_breaks[(line_idx - 1) as usize] as usize;
    let end = self.source[start..].find('\n').map_or(self.source.len(), |i| start + i);
    &self.source[start..end]
  }

  /// Render all recorded diagnostics as `file:line:col: severity: message`
  /// followed by a caret-annotated source excerpt, matching the contract in
  /// `spec.md` §6 (messages need not be byte-identical across
  /// implementations, but severities and locations are).
  pub fn render(&self, file: &str, w: &mut impl fmt::Write) -> fmt::Result {
    for diag in &self.diagnostics {
      let sev = match diag.severity {
        Severity::Error => "error",
        Severity::Warning => "warning",
        Severity::Note => "note",
      };
      if let Some(loc) = diag.loc {
        let (line, col) = self.line_col(loc.offset);
        writeln!(w, "{file}:{line}:{col}: {sev}: {}", diag.message)?;
        writeln!(w, "{}", self.line_text(loc.offset))?;
        writeln!(w, "{}^", " ".repeat((col - 1) as usize))?;
      } else {
        writeln!(w, "{file}: {sev}: {}", diag.message)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn loc_union() {
    let a = SrcLoc::new(4, 3); // [4, 7)
    let b = SrcLoc::new(2, 2); // [2, 4)
    let u = a | b;
    assert_eq!(u, SrcLoc::new(2, 5));
  }

  #[test]
  fn truncate_is_a_point() {
    let a = SrcLoc::new(10, 5);
    assert_eq!(a.truncate(), SrcLoc::new(10, 0));
  }

  #[test]
  fn line_col_reconstruction() {
    let tracker = DiagnosticTracker::new("int x;\nint y;\n");
    assert_eq!(tracker.line_col(0), (1, 1));
    assert_eq!(tracker.line_col(7), (2, 1));
  }

  #[test]
  fn empty_until_error() {
    let mut t = DiagnosticTracker::new("");
    assert!(t.empty());
    t.warning(SrcLoc::default(), "just a warning");
    assert!(t.empty());
    t.error(SrcLoc::default(), "boom");
    assert!(!t.empty());
  }

  #[test]
  fn silence_drops_diagnostics() {
    let mut t = DiagnosticTracker::new("");
    t.silence();
    t.error(SrcLoc::default(), "dropped");
    assert!(t.empty());
    assert!(t.diagnostics().is_empty());
    t.unsilence();
    t.error(SrcLoc::default(), "kept");
    assert!(!t.empty());
  }
}

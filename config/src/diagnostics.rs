//! Line/column positions for TOML parse failures and a compiler-style
//! rendering of them.

use std::fmt;
use std::ops::Range;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPosition {
    pub line: usize,
    pub column: usize,
}

impl TextPosition {
    const START: Self = Self { line: 1, column: 1 };
}

/// Text range in 1-based line/column coordinates, end inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextRange {
    pub start: TextPosition,
    pub end: TextPosition,
}

impl TextRange {
    pub(crate) fn from_span(contents: &str, span: Option<Range<usize>>) -> Self {
        let Some(span) = span else {
            return Self {
                start: TextPosition::START,
                end: TextPosition::START,
            };
        };
        let lines = LineStarts::new(contents);
        let last = span.end.saturating_sub(1).max(span.start);
        Self {
            start: lines.position(span.start),
            end: lines.position(last),
        }
    }

    /// Columns to underline on the start line. Ranges spanning several lines
    /// underline their first character only.
    fn underline_width(&self) -> usize {
        if self.end.line == self.start.line {
            self.end.column.saturating_sub(self.start.column) + 1
        } else {
            1
        }
    }
}

/// Byte offsets at which each line begins.
struct LineStarts<'a> {
    contents: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineStarts<'a> {
    fn new(contents: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(at, _)| at + 1))
            .collect();
        Self { contents, starts }
    }

    /// Offsets past the end (e.g. "unexpected EOF") keep counting columns on
    /// the last line.
    fn position(&self, offset: usize) -> TextPosition {
        let index = self.starts.partition_point(|&start| start <= offset) - 1;
        let start = self.starts[index];
        let end = offset.min(self.contents.len());
        let column = match self.contents.get(start..end) {
            Some(text) => text.chars().count(),
            None => end - start,
        } + (offset - end);
        TextPosition {
            line: index + 1,
            column: column + 1,
        }
    }
}

/// A message pinned to a range of a source file. `Display` prints
///
/// ```text
/// path:2:8: message
///   |
/// 2 | args = 3
///   |        ^
/// ```
///
/// and only the header line when the range lies outside `contents`.
#[derive(Debug, Clone, Copy)]
pub struct Diagnostic<'a> {
    pub path: &'a Path,
    pub range: TextRange,
    pub message: &'a str,
    pub contents: &'a str,
}

impl fmt::Display for Diagnostic<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let TextPosition { line, column } = self.range.start;
        write!(f, "{}:{line}:{column}: {}", self.path.display(), self.message)?;

        let Some(source) = self.contents.lines().nth(line - 1) else {
            return Ok(());
        };
        let number = line.to_string();
        let blank = " ".repeat(number.len());
        write!(f, "\n{blank} |")?;
        write!(f, "\n{number} | {}", source.trim_end_matches('\r'))?;
        write!(
            f,
            "\n{blank} | {}{}",
            " ".repeat(column - 1),
            "^".repeat(self.range.underline_width())
        )
    }
}

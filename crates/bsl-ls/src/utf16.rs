//
// utf16.rs
//
// Conversions between byte offsets and LSP positions (UTF-16 columns)
//

use tower_lsp::lsp_types::{Position, Range};

/// Convert a UTF-16 column offset (from LSP Position.character) to a byte
/// offset within the given line. Columns past the end of the line clamp to
/// the line length.
pub fn utf16_column_to_byte_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    for (byte_idx, ch) in line.char_indices() {
        if utf16_count >= utf16_col as usize {
            return byte_idx;
        }
        utf16_count += ch.len_utf16();
    }
    line.len()
}

/// Convert a UTF-16 column offset to a char offset within the given line.
pub fn utf16_column_to_char_offset(line: &str, utf16_col: u32) -> usize {
    let mut utf16_count = 0;
    let mut char_count = 0;

    for ch in line.chars() {
        if utf16_count >= utf16_col as usize {
            return char_count;
        }
        utf16_count += ch.len_utf16();
        char_count += 1;
    }
    char_count
}

/// Line start table for one text, used to turn lexer byte spans into LSP
/// positions.
///
/// Line breaks are `\n`, `\r\n` and a lone `\r`, matching how editors count
/// lines for BSL sources exported from Windows tooling.
#[derive(Debug, Clone)]
pub struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let bytes = text.as_bytes();
        let mut line_starts = vec![0];
        let mut i = 0;
        while i < bytes.len() {
            match bytes[i] {
                b'\n' => line_starts.push(i + 1),
                b'\r' => {
                    if bytes.get(i + 1) == Some(&b'\n') {
                        i += 1;
                    }
                    line_starts.push(i + 1);
                }
                _ => {}
            }
            i += 1;
        }
        Self { line_starts }
    }

    /// Number of lines (a trailing line break opens an empty last line)
    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    /// Position of a byte offset in `text`
    ///
    /// # Arguments
    /// * `text` - The text this index was built from
    /// * `offset` - Byte offset, clamped to the text length
    pub fn position(&self, text: &str, offset: usize) -> Position {
        let offset = offset.min(text.len());
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(next) => next - 1,
        };
        let start = self.line_starts[line];
        let character: usize = text
            .get(start..offset)
            .map(|s| s.chars().map(char::len_utf16).sum())
            .unwrap_or(0);
        Position::new(line as u32, character as u32)
    }

    /// Range covering the byte span `start..end` in `text`
    pub fn range(&self, text: &str, start: usize, end: usize) -> Range {
        Range::new(self.position(text, start), self.position(text, end))
    }
}

/// Whether `position` lies inside `range`, both ends inclusive.
///
/// Inclusive ends let a cursor placed right after an identifier still
/// resolve to it.
pub fn range_contains(range: &Range, position: Position) -> bool {
    position_le(range.start, position) && position_le(position, range.end)
}

/// Whether `inner` lies entirely inside `outer`
pub fn range_contains_range(outer: &Range, inner: &Range) -> bool {
    range_contains(outer, inner.start) && range_contains(outer, inner.end)
}

fn position_le(a: Position, b: Position) -> bool {
    (a.line, a.character) <= (b.line, b.character)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_conversions_with_cyrillic() {
        let line = "Процедура Тест()";
        assert_eq!(utf16_column_to_byte_offset(line, 10), "Процедура ".len());
        assert_eq!(utf16_column_to_char_offset(line, 10), 10);
        assert_eq!(utf16_column_to_byte_offset(line, 100), line.len());
    }

    #[test]
    fn test_column_conversion_surrogate_pairs() {
        // U+1F600 takes two UTF-16 code units
        let line = "a\u{1F600}b";
        assert_eq!(utf16_column_to_char_offset(line, 3), 2);
        assert_eq!(utf16_column_to_byte_offset(line, 3), 5);
    }

    #[test]
    fn test_line_index_mixed_line_endings() {
        let text = "А\r\nБ\nВ\rГ";
        let index = LineIndex::new(text);
        assert_eq!(index.line_count(), 4);
        let g = text.find('Г').unwrap();
        assert_eq!(index.position(text, g), Position::new(3, 0));
        let b = text.find('Б').unwrap();
        assert_eq!(index.position(text, b + 'Б'.len_utf8()), Position::new(1, 1));
    }

    #[test]
    fn test_range_contains_inclusive() {
        let range = Range::new(Position::new(10, 4), Position::new(10, 8));
        assert!(range_contains(&range, Position::new(10, 4)));
        assert!(range_contains(&range, Position::new(10, 8)));
        assert!(!range_contains(&range, Position::new(10, 9)));
        assert!(!range_contains(&range, Position::new(9, 5)));
    }
}

//
// text_edit.rs
//
// Applying LSP content changes to document text
//

use anyhow::{bail, Result};
use ropey::Rope;
use tower_lsp::lsp_types::{Position, TextDocumentContentChangeEvent};

use crate::utf16::utf16_column_to_char_offset;

/// Apply a batch of content changes to `content`, in order.
///
/// A change without a range replaces the whole text. Ranged changes are
/// spliced in place, so the line endings of untouched text survive as-is.
///
/// # Errors
/// Fails when a change addresses a line past the end of the document or
/// when its end precedes its start.
pub fn apply_content_changes(
    content: &str,
    changes: &[TextDocumentContentChangeEvent],
) -> Result<String> {
    let mut rope = Rope::from_str(content);
    for change in changes {
        apply_change_to_rope(&mut rope, change)?;
    }
    Ok(rope.to_string())
}

/// Apply a single change to a Rope
pub fn apply_change_to_rope(contents: &mut Rope, change: &TextDocumentContentChangeEvent) -> Result<()> {
    let Some(range) = change.range else {
        // Full document sync
        *contents = Rope::from_str(&change.text);
        return Ok(());
    };

    let start_idx = position_to_char(contents, range.start)?;
    let end_idx = position_to_char(contents, range.end)?;
    if end_idx < start_idx {
        bail!(
            "change range end {}:{} precedes start {}:{}",
            range.end.line,
            range.end.character,
            range.start.line,
            range.start.character
        );
    }

    contents.remove(start_idx..end_idx);
    contents.insert(start_idx, &change.text);
    Ok(())
}

fn position_to_char(contents: &Rope, position: Position) -> Result<usize> {
    let line = position.line as usize;
    if line >= contents.len_lines() {
        bail!(
            "line {} is past the end of the document ({} lines)",
            line,
            contents.len_lines()
        );
    }

    let line_text = contents.line(line).to_string();
    let line_text = line_text.trim_end_matches(|c| c == '\n' || c == '\r');
    Ok(contents.line_to_char(line) + utf16_column_to_char_offset(line_text, position.character))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp::lsp_types::Range;

    fn ranged(sl: u32, sc: u32, el: u32, ec: u32, text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range::new(Position::new(sl, sc), Position::new(el, ec))),
            range_length: None,
            text: text.to_string(),
        }
    }

    fn full(text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_insert_at_beginning() {
        let content = "Процедура Тест()\nКонецПроцедуры";
        let result = apply_content_changes(content, &[ranged(0, 0, 0, 0, "// Комментарий\n")]).unwrap();
        assert_eq!(result, "// Комментарий\nПроцедура Тест()\nКонецПроцедуры");
    }

    #[test]
    fn test_replace_text() {
        let content = "Процедура Тест()\nКонецПроцедуры";
        let result = apply_content_changes(content, &[ranged(0, 10, 0, 14, "Проверка")]).unwrap();
        assert_eq!(result, "Процедура Проверка()\nКонецПроцедуры");
    }

    #[test]
    fn test_delete_multiple_lines() {
        let content = "Строка 1\nСтрока 2\nСтрока 3";
        let result = apply_content_changes(content, &[ranged(0, 8, 2, 0, "")]).unwrap();
        assert_eq!(result, "Строка 1Строка 3");
    }

    #[test]
    fn test_full_document_update() {
        let result = apply_content_changes("Старое содержимое", &[full("Новое содержимое")]).unwrap();
        assert_eq!(result, "Новое содержимое");
    }

    #[test]
    fn test_sequential_changes_use_updated_positions() {
        let content = "Процедура Тест()\nКонецПроцедуры";
        let changes = vec![
            ranged(0, 0, 0, 0, "// Комментарий\n"),
            ranged(2, 0, 2, 0, "  Возврат;\n"),
        ];
        let result = apply_content_changes(content, &changes).unwrap();
        assert_eq!(result, "// Комментарий\nПроцедура Тест()\n  Возврат;\nКонецПроцедуры");
    }

    #[test]
    fn test_preserves_line_endings() {
        let crlf = apply_content_changes("Строка1\r\nСтрока2\r\nСтрока3", &[ranged(1, 0, 1, 7, "Изменено")]).unwrap();
        assert_eq!(crlf, "Строка1\r\nИзменено\r\nСтрока3");

        let cr = apply_content_changes("Строка1\rСтрока2\rСтрока3", &[ranged(1, 0, 1, 7, "Изменено")]).unwrap();
        assert_eq!(cr, "Строка1\rИзменено\rСтрока3");

        let mixed = apply_content_changes(
            "Строка1\r\nСтрока2\nСтрока3\rСтрока4",
            &[ranged(2, 0, 2, 7, "Изменено")],
        )
        .unwrap();
        assert_eq!(mixed, "Строка1\r\nСтрока2\nИзменено\rСтрока4");
    }

    #[test]
    fn test_column_past_line_end_clamps() {
        let result = apply_content_changes("Процедура\nТест", &[ranged(0, 40, 0, 40, " Тест()")]).unwrap();
        assert_eq!(result, "Процедура Тест()\nТест");
    }

    #[test]
    fn test_line_past_document_end_is_error() {
        let result = apply_content_changes("одна строка", &[ranged(5, 0, 5, 1, "x")]);
        assert!(result.is_err());
    }

    #[test]
    fn test_inverted_range_is_error() {
        let result = apply_content_changes("абвгд", &[ranged(0, 4, 0, 1, "x")]);
        assert!(result.is_err());
    }
}

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

pub const COMMA: char = ',';

pub type Row = Vec<(String, String)>;

pub fn parse_records(content: &str, delimiter: char) -> Vec<Row> {
    let mut rows = parse_rows(strip_bom(content), delimiter).into_iter();
    let Some(header) = rows.next() else {
        return Vec::new();
    };
    let columns = header
        .iter()
        .map(|name| normalize_column(name))
        .collect::<Vec<_>>();

    rows.filter(|row| row.iter().any(|value| !value.trim().is_empty()))
        .map(|row| {
            columns
                .iter()
                .enumerate()
                .filter(|(_, column)| !column.is_empty())
                .map(|(index, column)| {
                    (column.clone(), row.get(index).cloned().unwrap_or_default())
                })
                .collect()
        })
        .collect()
}

pub fn render_records(rows: &[Row], delimiter: char) -> String {
    let mut columns: Vec<&str> = Vec::new();
    for row in rows {
        for (key, _) in row {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut output = String::new();
    push_line(&mut output, columns.iter().copied(), delimiter);
    for row in rows {
        push_line(
            &mut output,
            columns
                .iter()
                .map(|column| row_value(row, column).unwrap_or("")),
            delimiter,
        );
    }
    output
}

pub fn read_records(path: &Path, delimiter: char) -> Result<Vec<Row>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(parse_records(&content, delimiter))
}

pub fn write_records(path: &Path, rows: &[Row], delimiter: char) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, render_records(rows, delimiter))
        .with_context(|| format!("failed to write {}", path.display()))
}

pub fn row_value<'a>(row: &'a Row, key: &str) -> Option<&'a str> {
    row.iter()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

fn parse_rows(content: &str, delimiter: char) -> Vec<Vec<String>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = content.chars().peekable();

    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' if chars.peek() == Some(&'"') => {
                    chars.next();
                    field.push('"');
                }
                '"' => in_quotes = false,
                other => field.push(other),
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            '\r' | '\n' => {
                if ch == '\r' && chars.peek() == Some(&'\n') {
                    chars.next();
                }
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            other if other == delimiter => row.push(std::mem::take(&mut field)),
            other => field.push(other),
        }
    }

    row.push(field);
    if row.len() > 1 || row.first().is_some_and(|value| !value.trim().is_empty()) {
        rows.push(row);
    }
    rows
}

fn push_line<'a>(output: &mut String, fields: impl Iterator<Item = &'a str>, delimiter: char) {
    let mut first = true;
    for field in fields {
        if !first {
            output.push(delimiter);
        }
        first = false;
        if field.contains(delimiter)
            || field.contains('"')
            || field.contains('\n')
            || field.contains('\r')
        {
            output.push('"');
            output.push_str(&field.replace('"', "\"\""));
            output.push('"');
        } else {
            output.push_str(field);
        }
    }
    output.push('\n');
}

fn normalize_column(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace(' ', "_")
}

fn strip_bom(content: &str) -> &str {
    content.strip_prefix('\u{feff}').unwrap_or(content)
}

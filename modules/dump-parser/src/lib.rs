//! Schema-validating reader for `map.sql` dumps.
//!
//! Each line of a dump is a standalone `INSERT INTO x_world VALUES (...);`
//! statement without a column list. Lines are tokenized, checked against the
//! fixed positional layout in [`COLUMNS`] and turned into [`SnapshotRow`]s, or
//! rewritten into a statement that names its columns explicitly.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;
use worldmap_core::{ColumnKind, SnapshotRow, COLUMNS};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("line {line}: {kind}")]
pub struct ParseError {
    /// 1-based line number in the dump.
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseErrorKind {
    #[error("not an INSERT INTO statement")]
    NotInsert,
    #[error("missing VALUES clause")]
    MissingValues,
    #[error("malformed values list: {0}")]
    Malformed(String),
    #[error("expected {expected} values, found {found}")]
    Arity { expected: usize, found: usize },
    #[error("column {column} expects {expected}, found {found}")]
    Type { column: &'static str, expected: &'static str, found: &'static str },
    #[error("population must be non-negative, found {0}")]
    NegativePopulation(i64),
}

/// A literal from a values list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    Int(i64),
    Text(String),
    Null,
}

impl Literal {
    fn kind_name(&self) -> &'static str {
        match self {
            Literal::Int(_) => "integer",
            Literal::Text(_) => "text",
            Literal::Null => "NULL",
        }
    }

    fn to_sql(&self) -> String {
        match self {
            Literal::Int(n) => n.to_string(),
            Literal::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Literal::Null => "NULL".into(),
        }
    }
}

/// Parse a whole dump. Blank lines are skipped; the first bad line aborts the
/// parse so callers never see a partial snapshot.
pub fn parse_dump(text: &str) -> Result<Vec<SnapshotRow>, ParseError> {
    let mut rows = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_start_matches('\u{feff}');
        if line.trim().is_empty() { continue; }
        rows.push(parse_line(idx + 1, line)?);
    }
    Ok(rows)
}

/// Parse one dump statement into a row.
pub fn parse_line(line_no: usize, line: &str) -> Result<SnapshotRow, ParseError> {
    let at = |kind| ParseError { line: line_no, kind };
    let (_, values) = split_statement(line).map_err(at)?;
    to_row(values).map_err(at)
}

/// Rewrite one dump statement so it declares the full column order before its
/// values clause. The values are validated exactly as [`parse_line`] does.
pub fn rewrite_line(line_no: usize, line: &str) -> Result<String, ParseError> {
    let at = |kind| ParseError { line: line_no, kind };
    let (prefix, values) = split_statement(line).map_err(at)?;
    check_layout(&values).map_err(at)?;
    let columns = COLUMNS.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", ");
    let literals = values.iter().map(Literal::to_sql).collect::<Vec<_>>().join(",");
    Ok(format!("{} ({}) VALUES ({});", prefix.trim_end(), columns, literals))
}

/// Split a statement into the text preceding `VALUES` and its literal list.
pub fn split_statement(line: &str) -> Result<(&str, Vec<Literal>), ParseErrorKind> {
    let line = line.trim();
    if !starts_with_ignore_case(line, "INSERT") || find_keyword(line, "INTO").is_none() {
        return Err(ParseErrorKind::NotInsert);
    }
    let at = find_keyword(line, "VALUES").ok_or(ParseErrorKind::MissingValues)?;
    let values = parse_values(&line[at + "VALUES".len()..])?;
    Ok((&line[..at], values))
}

fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.len() >= prefix.len() && s.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
}

// Byte offset of `word` as a whole word, searched before the first quote so
// string contents can never match.
fn find_keyword(s: &str, word: &str) -> Option<usize> {
    let head = &s.as_bytes()[..s.find('\'').unwrap_or(s.len())];
    let w = word.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
    (0..head.len().saturating_sub(w.len() - 1)).find(|&i| {
        head[i..i + w.len()].eq_ignore_ascii_case(w)
            && (i == 0 || !is_word(head[i - 1]))
            && head.get(i + w.len()).map_or(true, |&b| !is_word(b))
    })
}

fn parse_values(rest: &str) -> Result<Vec<Literal>, ParseErrorKind> {
    let malformed = |msg: &str| ParseErrorKind::Malformed(msg.to_string());
    let mut chars = rest.chars().peekable();
    skip_ws(&mut chars);
    if chars.next() != Some('(') { return Err(malformed("expected '(' after VALUES")); }

    let mut values = Vec::new();
    skip_ws(&mut chars);
    if chars.peek() == Some(&')') {
        chars.next();
    } else {
        loop {
            skip_ws(&mut chars);
            let value = match chars.peek().copied() {
                Some('\'') => {
                    chars.next();
                    Literal::Text(read_quoted(&mut chars)?)
                }
                Some(c) if c == '-' || c == '+' || c.is_ascii_digit() => Literal::Int(read_int(&mut chars)?),
                Some(c) if c.is_ascii_alphabetic() => {
                    let word = read_word(&mut chars);
                    if !word.eq_ignore_ascii_case("NULL") {
                        return Err(ParseErrorKind::Malformed(format!("unexpected bare word {word:?}")));
                    }
                    Literal::Null
                }
                Some(c) => return Err(ParseErrorKind::Malformed(format!("unexpected character {c:?}"))),
                None => return Err(malformed("unterminated values list")),
            };
            values.push(value);
            skip_ws(&mut chars);
            match chars.next() {
                Some(',') => continue,
                Some(')') => break,
                Some(c) => return Err(ParseErrorKind::Malformed(format!("expected ',' or ')', found {c:?}"))),
                None => return Err(malformed("unterminated values list")),
            }
        }
    }

    skip_ws(&mut chars);
    if chars.peek() == Some(&';') { chars.next(); }
    skip_ws(&mut chars);
    if chars.next().is_some() { return Err(malformed("trailing content after values list")); }
    Ok(values)
}

fn skip_ws(chars: &mut Peekable<Chars<'_>>) {
    while chars.next_if(|c| c.is_whitespace()).is_some() {}
}

fn read_word(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut word = String::new();
    while let Some(c) = chars.next_if(|c| c.is_ascii_alphanumeric() || *c == '_') { word.push(c); }
    word
}

fn read_int(chars: &mut Peekable<Chars<'_>>) -> Result<i64, ParseErrorKind> {
    let mut digits = String::new();
    if let Some(sign) = chars.next_if(|c| *c == '-' || *c == '+') { digits.push(sign); }
    while let Some(d) = chars.next_if(|c| c.is_ascii_digit()) { digits.push(d); }
    digits
        .parse::<i64>()
        .map_err(|_| ParseErrorKind::Malformed(format!("invalid integer {digits:?}")))
}

// Opening quote already consumed. Accepts both SQL ('') and MySQL (\') escapes.
fn read_quoted(chars: &mut Peekable<Chars<'_>>) -> Result<String, ParseErrorKind> {
    let unterminated = || ParseErrorKind::Malformed("unterminated string literal".into());
    let mut out = String::new();
    loop {
        match chars.next().ok_or_else(unterminated)? {
            '\'' => {
                if chars.next_if_eq(&'\'').is_some() { out.push('\''); } else { return Ok(out); }
            }
            '\\' => out.push(match chars.next().ok_or_else(unterminated)? {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                '0' => '\0',
                other => other,
            }),
            c => out.push(c),
        }
    }
}

fn check_layout(values: &[Literal]) -> Result<(), ParseErrorKind> {
    if values.len() != COLUMNS.len() {
        return Err(ParseErrorKind::Arity { expected: COLUMNS.len(), found: values.len() });
    }
    for ((column, kind), value) in COLUMNS.iter().zip(values) {
        let ok = matches!((kind, value), (ColumnKind::Integer, Literal::Int(_)) | (ColumnKind::Text, Literal::Text(_)));
        if !ok {
            let expected = match kind { ColumnKind::Integer => "integer", ColumnKind::Text => "text" };
            return Err(ParseErrorKind::Type { column: *column, expected, found: value.kind_name() });
        }
    }
    if let Some(Literal::Int(p)) = values.last() {
        if *p < 0 { return Err(ParseErrorKind::NegativePopulation(*p)); }
    }
    Ok(())
}

fn to_row(values: Vec<Literal>) -> Result<SnapshotRow, ParseErrorKind> {
    use Literal::{Int, Text};
    check_layout(&values)?;
    let Ok([Int(world_id), Int(x), Int(y), Int(tile_id), Int(settlement_id), Text(settlement_name), Int(owner_id), Text(owner_name), Int(group_id), Text(group_name), Int(population)]) =
        <[Literal; 11]>::try_from(values)
    else {
        return Err(ParseErrorKind::Malformed("values do not match column layout".into()));
    };
    Ok(SnapshotRow { world_id, x, y, tile_id, settlement_id, settlement_name, owner_id, owner_name, group_id, group_name, population })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = "INSERT INTO `x_world` VALUES (73261,-146,309,1,26894,'Nordwacht',7408,'Ragnar',63,'WOLF',612);";

    #[test]
    fn parses_a_dump_line() {
        let row = parse_line(1, LINE).unwrap();
        assert_eq!(row.world_id, 73261);
        assert_eq!((row.x, row.y), (-146, 309));
        assert_eq!(row.settlement_name, "Nordwacht");
        assert_eq!(row.owner_id, 7408);
        assert_eq!(row.group_name, "WOLF");
        assert_eq!(row.population, 612);
    }

    #[test]
    fn handles_escapes_and_empty_names() {
        let line = r"insert into x_world values (1, 0, 0, 3, 0, 'O\'Brien''s', 0, '', 0, 'a,b)', 0)";
        let row = parse_line(1, line).unwrap();
        assert_eq!(row.settlement_name, "O'Brien's");
        assert_eq!(row.owner_name, "");
        assert_eq!(row.group_name, "a,b)");
    }

    #[test]
    fn keyword_inside_string_is_not_the_values_clause() {
        let line = "INSERT INTO x_world VALUES (1,0,0,1,2,'VALUES',3,'x',0,'',5);";
        assert_eq!(parse_line(1, line).unwrap().settlement_name, "VALUES");
    }

    #[test]
    fn rejects_wrong_arity() {
        let short = "INSERT INTO x_world VALUES (1,2,3,4,5,'v',6,'p',7,'a');";
        let err = parse_line(4, short).unwrap_err();
        assert_eq!(err.line, 4);
        assert_eq!(err.kind, ParseErrorKind::Arity { expected: 11, found: 10 });

        let long = "INSERT INTO x_world VALUES (1,2,3,4,5,'v',6,'p',7,'a',8,0);";
        assert_eq!(parse_line(1, long).unwrap_err().kind, ParseErrorKind::Arity { expected: 11, found: 12 });
    }

    #[test]
    fn rejects_type_mismatch_and_negative_population() {
        let swapped = "INSERT INTO x_world VALUES (1,2,3,4,'v',5,6,'p',7,'a',8);";
        assert!(matches!(parse_line(1, swapped).unwrap_err().kind, ParseErrorKind::Type { column: "settlement_id", .. }));

        let null = "INSERT INTO x_world VALUES (1,2,3,4,5,NULL,6,'p',7,'a',8);";
        assert!(matches!(parse_line(1, null).unwrap_err().kind, ParseErrorKind::Type { found: "NULL", .. }));

        let negative = "INSERT INTO x_world VALUES (1,2,3,4,5,'v',6,'p',7,'a',-8);";
        assert_eq!(parse_line(1, negative).unwrap_err().kind, ParseErrorKind::NegativePopulation(-8));
    }

    #[test]
    fn rejects_non_statements() {
        assert_eq!(parse_line(1, "DROP TABLE x_world;").unwrap_err().kind, ParseErrorKind::NotInsert);
        assert_eq!(parse_line(1, "INSERT INTO x_world (1,2)").unwrap_err().kind, ParseErrorKind::MissingValues);
        assert!(matches!(parse_line(1, "INSERT INTO x_world VALUES (1,'open").unwrap_err().kind, ParseErrorKind::Malformed(_)));
        assert!(matches!(parse_line(1, "INSERT INTO x_world VALUES (1,2); DELETE").unwrap_err().kind, ParseErrorKind::Malformed(_)));
    }

    #[test]
    fn rewrite_declares_every_column_in_order() {
        let out = rewrite_line(1, LINE).unwrap();
        assert_eq!(
            out,
            "INSERT INTO `x_world` (world_id, x, y, tile_id, settlement_id, settlement_name, owner_id, owner_name, group_id, group_name, population) VALUES (73261,-146,309,1,26894,'Nordwacht',7408,'Ragnar',63,'WOLF',612);"
        );
        let (_, values) = split_statement(&out).unwrap();
        let head = &out[..out.find("VALUES").unwrap()];
        let declared = head[head.find('(').unwrap() + 1..head.rfind(')').unwrap()].split(',').count();
        assert_eq!(declared, values.len());
    }

    #[test]
    fn rewrite_requotes_strings_for_sqlite() {
        let out = rewrite_line(1, r"INSERT INTO x_world VALUES (1,0,0,1,2,'it\'s',3,'',0,'',5);").unwrap();
        assert!(out.ends_with("VALUES (1,0,0,1,2,'it''s',3,'',0,'',5);"));
    }

    #[test]
    fn dump_skips_blank_lines_and_reports_bad_line_number() {
        let text = format!("{LINE}\r\n\n   \n{LINE}\n");
        assert_eq!(parse_dump(&text).unwrap().len(), 2);

        let bad = format!("{LINE}\n{LINE}\nINSERT INTO x_world VALUES (1,2,3);\n{LINE}\n");
        let err = parse_dump(&bad).unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.to_string().starts_with("line 3: expected 11 values"));
    }

    #[test]
    fn leading_byte_order_mark_is_ignored() {
        let text = format!("\u{feff}{LINE}\n");
        assert_eq!(parse_dump(&text).unwrap().len(), 1);
    }
}

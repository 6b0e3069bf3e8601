//! XLSX → Markdown 表格
//!
//! 直接读取 OOXML：zip 解包后用正则取第一个工作表的单元格，
//! 共享字符串（t="s"）与内联字符串（t="inlineStr"）都会还原为文本。

use std::io::{Cursor, Read};
use std::sync::OnceLock;

use regex::Regex;

use crate::core::{BotError, Result};

/// 输出的数据行上限（不含表头）
pub const MAX_ROWS: usize = 50;
/// Excel 最大列数（XFD）
pub const MAX_COLUMNS: usize = 16_384;

static SI_RE: OnceLock<Regex> = OnceLock::new();
static T_RE: OnceLock<Regex> = OnceLock::new();
static ROW_RE: OnceLock<Regex> = OnceLock::new();
static CELL_RE: OnceLock<Regex> = OnceLock::new();
static V_RE: OnceLock<Regex> = OnceLock::new();
static REF_RE: OnceLock<Regex> = OnceLock::new();
static TYPE_RE: OnceLock<Regex> = OnceLock::new();

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).unwrap())
}

/// 读取失败时返回可直接发给用户的错误说明
pub fn excel_to_text(data: &[u8]) -> String {
    match xlsx_to_markdown(data) {
        Ok(md) => md,
        Err(e) => {
            tracing::warn!(error = %e, "xlsx parse failed");
            format!("[Excel 读取失败: {}]", e)
        }
    }
}

/// 第一个工作表转 Markdown：首行作表头，最多 [`MAX_ROWS`] 行数据
pub fn xlsx_to_markdown(data: &[u8]) -> Result<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(data))
        .map_err(|e| BotError::Extract(format!("not an xlsx archive: {}", e)))?;

    let shared = match read_entry(&mut archive, "xl/sharedStrings.xml") {
        Ok(xml) => parse_shared_strings(&xml),
        Err(_) => Vec::new(),
    };

    let sheet_name = first_sheet_name(&archive)
        .ok_or_else(|| BotError::Extract("workbook has no worksheet".into()))?;
    let sheet_xml = read_entry(&mut archive, &sheet_name)?;

    let rows = parse_rows(&sheet_xml, &shared);
    Ok(render_markdown(&rows, MAX_ROWS))
}

fn read_entry<R: Read + std::io::Seek>(
    archive: &mut zip::ZipArchive<R>,
    name: &str,
) -> Result<String> {
    let mut file = archive
        .by_name(name)
        .map_err(|e| BotError::Extract(format!("{}: {}", name, e)))?;
    let mut xml = String::new();
    file.read_to_string(&mut xml)
        .map_err(|e| BotError::Extract(format!("{}: {}", name, e)))?;
    Ok(xml)
}

/// 优先 sheet1.xml，否则取名字排序后的第一个工作表
fn first_sheet_name<R: Read + std::io::Seek>(archive: &zip::ZipArchive<R>) -> Option<String> {
    let mut sheets: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with("xl/worksheets/sheet") && n.ends_with(".xml"))
        .map(String::from)
        .collect();
    if sheets.iter().any(|n| n == "xl/worksheets/sheet1.xml") {
        return Some("xl/worksheets/sheet1.xml".to_string());
    }
    sheets.sort();
    sheets.into_iter().next()
}

fn text_runs(xml: &str) -> String {
    re(&T_RE, r"(?s)<t(?:\s[^>]*)?>(.*?)</t>")
        .captures_iter(xml)
        .map(|c| unescape_xml(&c[1]))
        .collect()
}

fn parse_shared_strings(xml: &str) -> Vec<String> {
    re(&SI_RE, r"(?s)<si(?:\s[^>]*)?>(.*?)</si>")
        .captures_iter(xml)
        .map(|c| text_runs(&c[1]))
        .collect()
}

/// "B12" -> 1；非法引用或超过 XFD 的列返回 None
fn column_index(cell_ref: &str) -> Option<usize> {
    let mut idx = 0usize;
    let mut seen = false;
    for ch in cell_ref.chars().take_while(|c| c.is_ascii_alphabetic()) {
        let digit = ch.to_ascii_uppercase() as usize - 'A' as usize + 1;
        idx = idx.checked_mul(26)?.checked_add(digit)?;
        if idx > MAX_COLUMNS {
            return None;
        }
        seen = true;
    }
    seen.then(|| idx - 1)
}

fn parse_rows(sheet_xml: &str, shared: &[String]) -> Vec<Vec<String>> {
    let row_re = re(&ROW_RE, r"(?s)<row\b[^>]*?(?:/>|>(.*?)</row>)");
    let cell_re = re(&CELL_RE, r"(?s)<c\b([^>]*?)(?:/>|>(.*?)</c>)");
    let v_re = re(&V_RE, r"(?s)<v>(.*?)</v>");
    let ref_re = re(&REF_RE, r#"\br="([A-Za-z]+\d*)""#);
    let type_re = re(&TYPE_RE, r#"\bt="(\w+)""#);

    let mut rows = Vec::new();
    for row in row_re.captures_iter(sheet_xml) {
        let Some(body) = row.get(1) else { continue };
        let mut cells: Vec<String> = Vec::new();
        let mut next_col = 0usize;
        for cell in cell_re.captures_iter(body.as_str()) {
            let attrs = &cell[1];
            let inner = cell.get(2).map(|m| m.as_str()).unwrap_or("");
            let col = match ref_re.captures(attrs) {
                Some(c) => match column_index(&c[1]) {
                    Some(col) => col,
                    None => {
                        tracing::debug!(cell_ref = &c[1], "xlsx cell out of range, skipped");
                        continue;
                    }
                },
                None => next_col,
            };
            if col >= MAX_COLUMNS {
                continue;
            }
            next_col = col + 1;

            let raw = v_re.captures(inner).map(|c| unescape_xml(&c[1]));
            let value = match type_re.captures(attrs).map(|c| c[1].to_string()).as_deref() {
                Some("s") => raw
                    .and_then(|i| i.trim().parse::<usize>().ok())
                    .and_then(|i| shared.get(i).cloned())
                    .unwrap_or_default(),
                Some("inlineStr") => text_runs(inner),
                Some("b") => match raw.as_deref() {
                    Some("1") => "TRUE".to_string(),
                    Some(_) => "FALSE".to_string(),
                    None => String::new(),
                },
                _ => raw.unwrap_or_default(),
            };

            if cells.len() <= col {
                cells.resize(col + 1, String::new());
            }
            cells[col] = value;
        }
        if cells.iter().any(|c| !c.trim().is_empty()) {
            rows.push(cells);
        }
    }
    rows
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn md_cell(s: &str) -> String {
    s.replace('|', "\\|").replace(['\r', '\n'], " ").trim().to_string()
}

fn render_markdown(rows: &[Vec<String>], max_rows: usize) -> String {
    let Some(header) = rows.first() else {
        return "(空表格)".to_string();
    };
    let width = rows
        .iter()
        .take(max_rows + 1)
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(1);

    let line = |cells: &[String]| {
        let padded: Vec<String> = (0..width)
            .map(|i| md_cell(cells.get(i).map(String::as_str).unwrap_or("")))
            .collect();
        format!("| {} |", padded.join(" | "))
    };

    let mut out = vec![line(header), format!("|{}", " --- |".repeat(width))];
    for row in rows.iter().skip(1).take(max_rows) {
        out.push(line(row));
    }
    out.join("\n")
}

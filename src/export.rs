use std::fmt;
use std::io::{Cursor, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Csv,
    Tsv,
    Xlsx,
}

impl Encoding {
    pub const ALL: [Encoding; 3] = [Encoding::Csv, Encoding::Tsv, Encoding::Xlsx];

    pub fn extension(&self) -> &'static str {
        match self {
            Encoding::Csv => "csv",
            Encoding::Tsv => "tsv",
            Encoding::Xlsx => "xlsx",
        }
    }

    pub fn encode(&self, table: &Table, sheet_name: &str) -> Result<Vec<u8>, PipelineError> {
        match self {
            Encoding::Csv => encode_delimited(table, b','),
            Encoding::Tsv => encode_delimited(table, b'\t'),
            Encoding::Xlsx => encode_workbook(&[Sheet {
                name: sheet_name.to_string(),
                table: table.clone(),
            }]),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.extension())
    }
}

impl FromStr for Encoding {
    type Err = PipelineError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "csv" => Ok(Encoding::Csv),
            "tsv" => Ok(Encoding::Tsv),
            "xlsx" => Ok(Encoding::Xlsx),
            _ => Err(PipelineError::InvalidEncoding(value.to_string())),
        }
    }
}

/// Header plus string rows; every encoder works from this shape.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column == name)
    }
}

#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: String,
    pub table: Table,
}

pub fn encode_delimited(table: &Table, delimiter: u8) -> Result<Vec<u8>, PipelineError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .from_writer(Vec::new());
    writer
        .write_record(&table.columns)
        .map_err(|err| PipelineError::Encoding(err.to_string()))?;
    for row in &table.rows {
        writer
            .write_record(row)
            .map_err(|err| PipelineError::Encoding(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| PipelineError::Encoding(err.to_string()))
}

pub fn decode_delimited(bytes: &[u8], delimiter: u8) -> Result<Table, PipelineError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);
    let columns = reader
        .headers()
        .map_err(|err| PipelineError::Encoding(err.to_string()))?
        .iter()
        .map(str::to_string)
        .collect::<Vec<_>>();
    let mut table = Table::new(columns);
    for record in reader.records() {
        let record = record.map_err(|err| PipelineError::Encoding(err.to_string()))?;
        let mut row = record.iter().map(str::to_string).collect::<Vec<_>>();
        row.resize(table.columns.len(), String::new());
        table.rows.push(row);
    }
    Ok(table)
}

/// Writes an Office Open XML workbook with one worksheet per sheet, all
/// cells as inline strings.
pub fn encode_workbook(sheets: &[Sheet]) -> Result<Vec<u8>, PipelineError> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    // A fixed entry timestamp keeps identical tables byte-identical.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .last_modified_time(zip::DateTime::default());

    let names = unique_sheet_names(sheets);

    add_part(&mut zip, "[Content_Types].xml", &content_types(sheets.len()), options)?;
    add_part(&mut zip, "_rels/.rels", ROOT_RELS, options)?;
    add_part(&mut zip, "xl/workbook.xml", &workbook_xml(&names), options)?;
    add_part(
        &mut zip,
        "xl/_rels/workbook.xml.rels",
        &workbook_rels(sheets.len()),
        options,
    )?;
    for (idx, sheet) in sheets.iter().enumerate() {
        add_part(
            &mut zip,
            &format!("xl/worksheets/sheet{}.xml", idx + 1),
            &worksheet_xml(&sheet.table),
            options,
        )?;
    }

    let cursor = zip
        .finish()
        .map_err(|err| PipelineError::Encoding(err.to_string()))?;
    Ok(cursor.into_inner())
}

const ROOT_RELS: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships"><Relationship Id="rId1" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument" Target="xl/workbook.xml"/></Relationships>"#;

fn add_part(
    zip: &mut ZipWriter<Cursor<Vec<u8>>>,
    name: &str,
    content: &str,
    options: SimpleFileOptions,
) -> Result<(), PipelineError> {
    zip.start_file(name, options)
        .map_err(|err| PipelineError::Encoding(err.to_string()))?;
    zip.write_all(content.as_bytes())
        .map_err(|err| PipelineError::Encoding(err.to_string()))
}

fn content_types(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Types xmlns="http://schemas.openxmlformats.org/package/2006/content-types"><Default Extension="rels" ContentType="application/vnd.openxmlformats-package.relationships+xml"/><Default Extension="xml" ContentType="application/xml"/><Override PartName="/xl/workbook.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml"/>"#,
    );
    for idx in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Override PartName="/xl/worksheets/sheet{idx}.xml" ContentType="application/vnd.openxmlformats-officedocument.spreadsheetml.worksheet+xml"/>"#
        ));
    }
    xml.push_str("</Types>");
    xml
}

fn workbook_xml(names: &[String]) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<workbook xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main" xmlns:r="http://schemas.openxmlformats.org/officeDocument/2006/relationships"><sheets>"#,
    );
    for (idx, name) in names.iter().enumerate() {
        xml.push_str(&format!(
            r#"<sheet name="{}" sheetId="{}" r:id="rId{}"/>"#,
            escape_xml(name),
            idx + 1,
            idx + 1
        ));
    }
    xml.push_str("</sheets></workbook>");
    xml
}

fn workbook_rels(sheet_count: usize) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<Relationships xmlns="http://schemas.openxmlformats.org/package/2006/relationships">"#,
    );
    for idx in 1..=sheet_count {
        xml.push_str(&format!(
            r#"<Relationship Id="rId{idx}" Type="http://schemas.openxmlformats.org/officeDocument/2006/relationships/worksheet" Target="worksheets/sheet{idx}.xml"/>"#
        ));
    }
    xml.push_str("</Relationships>");
    xml
}

fn worksheet_xml(table: &Table) -> String {
    let mut xml = String::from(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<worksheet xmlns="http://schemas.openxmlformats.org/spreadsheetml/2006/main"><sheetData>"#,
    );
    let rows = std::iter::once(&table.columns).chain(table.rows.iter());
    for (row_idx, row) in rows.enumerate() {
        let row_number = row_idx + 1;
        xml.push_str(&format!(r#"<row r="{row_number}">"#));
        for (col_idx, cell) in row.iter().enumerate() {
            xml.push_str(&format!(
                r#"<c r="{}{row_number}" t="inlineStr"><is><t xml:space="preserve">{}</t></is></c>"#,
                column_letters(col_idx),
                escape_xml(cell)
            ));
        }
        xml.push_str("</row>");
    }
    xml.push_str("</sheetData></worksheet>");
    xml
}

/// 0 → A, 25 → Z, 26 → AA.
pub fn column_letters(mut idx: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (idx % 26) as u8);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

// Sheet names are capped at 31 characters and must be unique.
fn unique_sheet_names(sheets: &[Sheet]) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(sheets.len());
    for (idx, sheet) in sheets.iter().enumerate() {
        let base = sheet
            .name
            .chars()
            .filter(|ch| !matches!(ch, ':' | '\\' | '/' | '?' | '*' | '[' | ']'))
            .take(31)
            .collect::<String>();
        let base = if base.is_empty() {
            format!("Sheet{}", idx + 1)
        } else {
            base
        };
        let mut candidate = base.clone();
        let mut suffix = 2;
        while names.contains(&candidate) {
            let tail = format!("~{suffix}");
            candidate = base
                .chars()
                .take(31 - tail.len())
                .chain(tail.chars())
                .collect();
            suffix += 1;
        }
        names.push(candidate);
    }
    names
}

fn escape_xml(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // Control characters other than tab/newline are not allowed in XML 1.0.
            ch if (ch as u32) < 0x20 && !matches!(ch, '\t' | '\n' | '\r') => {}
            ch => out.push(ch),
        }
    }
    out
}

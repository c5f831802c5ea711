use std::io::Read;
use std::path::Path;

use anyhow::{Context, Result};
use pulldown_cmark::{Event, Parser, Tag, TagEnd};

/// Raw text of one source, ready for splitting.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub source: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    PlainText,
    Markdown,
    Pdf,
    Docx,
    Xlsx,
    Pptx,
}

impl DocumentFormat {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "txt" | "text" | "csv" | "json" | "yaml" | "yml" | "toml" | "html" | "htm" => {
                Some(Self::PlainText)
            }
            "md" | "markdown" => Some(Self::Markdown),
            "pdf" => Some(Self::Pdf),
            "docx" => Some(Self::Docx),
            "xlsx" => Some(Self::Xlsx),
            "pptx" => Some(Self::Pptx),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(Self::from_extension)
    }
}

/// Reads a file into a [`Document`], picking the reader from its extension.
pub fn load_document(path: &Path) -> Result<Document> {
    let format = DocumentFormat::from_path(path)
        .with_context(|| format!("Unsupported file type: {}", path.display()))?;

    let content = match format {
        DocumentFormat::PlainText => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read text file: {}", path.display()))?,
        DocumentFormat::Markdown => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read markdown file: {}", path.display()))?;
            markdown_to_text(&raw)
        }
        DocumentFormat::Pdf => pdf_extract::extract_text(path)
            .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?,
        DocumentFormat::Docx => read_office_xml(path, |name| name == "word/document.xml", "w:t")?,
        DocumentFormat::Pptx => read_office_xml(
            path,
            |name| name.starts_with("ppt/slides/slide") && name.ends_with(".xml"),
            "a:t",
        )?,
        DocumentFormat::Xlsx => read_workbook(path)?,
    };

    Ok(Document {
        source: path.to_string_lossy().to_string(),
        content,
    })
}

/// Flattens Markdown into plain text, keeping block boundaries as blank lines.
pub fn markdown_to_text(markdown: &str) -> String {
    let mut out = String::with_capacity(markdown.len());

    for event in Parser::new(markdown) {
        match event {
            Event::Text(text) | Event::Code(text) => out.push_str(&text),
            Event::SoftBreak => out.push(' '),
            Event::HardBreak => out.push('\n'),
            Event::Start(Tag::Item) => {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
            }
            Event::End(TagEnd::Paragraph | TagEnd::Heading(_) | TagEnd::CodeBlock | TagEnd::List(_)) => {
                out.push_str("\n\n");
            }
            Event::End(TagEnd::Item) => out.push('\n'),
            Event::End(TagEnd::TableCell) => out.push('\t'),
            Event::End(TagEnd::TableRow | TagEnd::TableHead) => out.push('\n'),
            _ => {}
        }
    }

    collapse_blank_lines(&out)
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}

/// DOCX/PPTX are zip archives of XML parts; text lives in `tag` elements.
fn read_office_xml(path: &Path, wanted: impl Fn(&str) -> bool, tag: &str) -> Result<String> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read {} as ZIP", path.display()))?;

    let mut parts: Vec<(String, String)> = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if !wanted(&name) {
            continue;
        }
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .with_context(|| format!("Failed to read {} from {}", name, path.display()))?;
        let text = xml_element_text(&xml, tag);
        if !text.is_empty() {
            parts.push((name, text));
        }
    }

    if parts.is_empty() {
        anyhow::bail!("No text content found in {}", path.display());
    }

    // slide10.xml must come after slide9.xml
    parts.sort_by(|(a, _), (b, _)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));
    Ok(parts
        .into_iter()
        .map(|(_, text)| text)
        .collect::<Vec<_>>()
        .join("\n\n"))
}

fn read_workbook(path: &Path) -> Result<String> {
    use calamine::{open_workbook, Reader, Xlsx};

    let mut workbook: Xlsx<_> = open_workbook(path)
        .with_context(|| format!("Failed to open XLSX: {}", path.display()))?;

    let mut rows_text = Vec::new();
    for sheet in workbook.sheet_names().to_vec() {
        let Ok(range) = workbook.worksheet_range(&sheet) else {
            tracing::warn!("Skipping unreadable sheet {} in {}", sheet, path.display());
            continue;
        };
        for row in range.rows() {
            let cells: Vec<String> = row
                .iter()
                .map(|cell| cell.to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !cells.is_empty() {
                rows_text.push(cells.join("\t"));
            }
        }
    }

    Ok(rows_text.join("\n"))
}

fn xml_element_text(xml: &str, tag: &str) -> String {
    let open = format!("<{}", tag);
    let close = format!("</{}>", tag);
    let mut texts = Vec::new();
    let mut cursor = 0;

    while let Some(found) = xml[cursor..].find(&open) {
        let start = cursor + found;
        // `<w:t>` and `<w:t xml:space="preserve">`, but not `<w:tab/>`
        let after_name = xml[start + open.len()..].chars().next();
        if !matches!(after_name, Some('>') | Some(' ')) {
            cursor = start + open.len();
            continue;
        }
        let Some(tag_end) = xml[start..].find('>') else {
            break;
        };
        let body_start = start + tag_end + 1;
        let Some(body_len) = xml[body_start..].find(&close) else {
            break;
        };
        let body = &xml[body_start..body_start + body_len];
        if !body.is_empty() {
            texts.push(unescape_xml(body));
        }
        cursor = body_start + body_len + close.len();
    }

    texts.join(" ")
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use html5ever::Attribute;
use lazy_static::lazy_static;
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

use crate::config::ConvertConfig;

lazy_static! {
    static ref INLINE_TAGS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("strong", "**");
        m.insert("b", "**");
        m.insert("em", "_");
        m.insert("i", "_");
        m.insert("del", "~~");
        m.insert("s", "~~");
        m.insert("strike", "~~");
        m
    };

    static ref BLOCK_TAGS: HashSet<&'static str> = [
        "p", "div", "section", "article", "header", "footer", "main", "nav",
        "aside", "figure", "figcaption", "address", "details", "summary",
        "dl", "dt", "dd", "form", "fieldset",
    ]
    .into_iter()
    .collect();

    static ref WHITESPACE_REGEX: Regex = Regex::new(r"\s+").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum ListType {
    Ordered(u32),
    Unordered,
}

/// Walks the DOM and writes Markdown into caller-provided buffers.
///
/// Containers that need to post-process their content (list items, quotes,
/// table cells, headings) render into a scratch buffer first. Inline wrappers
/// render straight into the output and cut their slice back out, so
/// whitespace handling sees the real preceding text.
struct MarkdownFormatter<'a> {
    config: &'a ConvertConfig,
    list_depth: usize,
}

impl<'a> MarkdownFormatter<'a> {
    fn new(config: &'a ConvertConfig) -> Self {
        Self {
            config,
            list_depth: 0,
        }
    }

    fn process_children(&mut self, handle: &Handle, out: &mut String) {
        for child in handle.children.borrow().iter() {
            self.process_node(child, out);
        }
    }

    fn process_node(&mut self, handle: &Handle, out: &mut String) {
        match &handle.data {
            NodeData::Document => self.process_children(handle, out),

            NodeData::Element { name, attrs, .. } => {
                let tag = name.local.as_ref();
                if self.config.ignores(tag) {
                    return;
                }

                match tag {
                    "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                        let level = tag[1..].parse::<u8>().unwrap_or(1);
                        self.process_header(handle, level, out);
                    }
                    "br" => push_line_break(out),
                    "hr" => push_block(out, "---"),
                    "pre" => self.process_code_block(handle, attrs, out),
                    "code" => process_inline_code(handle, out),
                    "blockquote" => self.process_quote(handle, out),
                    "ul" => self.process_list(handle, ListType::Unordered, out),
                    "ol" => {
                        let start = attr(attrs, "start")
                            .and_then(|s| s.trim().parse::<u32>().ok())
                            .unwrap_or(1);
                        self.process_list(handle, ListType::Ordered(start), out);
                    }
                    "a" => self.process_link(handle, attrs, out),
                    "img" => self.process_image(attrs, out),
                    "table" => self.process_table(handle, out),

                    tag if INLINE_TAGS.contains_key(tag) => {
                        self.process_inline(handle, INLINE_TAGS[tag], out)
                    }

                    tag if BLOCK_TAGS.contains(tag) => {
                        ensure_blank_line(out);
                        self.process_children(handle, out);
                        ensure_blank_line(out);
                    }

                    _ => self.process_children(handle, out),
                }
            }

            NodeData::Text { contents } => push_text(out, &contents.borrow()),

            _ => {}
        }
    }

    /// Renders a subtree into a fresh buffer outside any list context.
    fn render_detached(&mut self, handle: &Handle) -> String {
        let depth = std::mem::replace(&mut self.list_depth, 0);
        let mut buffer = String::new();
        self.process_children(handle, &mut buffer);
        self.list_depth = depth;
        buffer
    }

    fn process_header(&mut self, handle: &Handle, level: u8, out: &mut String) {
        let text = self.render_detached(handle);
        let text = WHITESPACE_REGEX.replace_all(text.trim(), " ");
        if text.is_empty() {
            return;
        }

        if level <= self.config.max_heading_level {
            push_block(out, &format!("{} {}", "#".repeat(level as usize), text));
        } else {
            push_block(out, &format!("**{}**", text));
        }
    }

    fn process_inline(&mut self, handle: &Handle, delimiter: &str, out: &mut String) {
        let mark = out.len();
        self.process_children(handle, out);
        let inner = out.split_off(mark);

        let trimmed = inner.trim();
        if trimmed.is_empty() {
            out.push_str(&inner);
            return;
        }

        if inner.starts_with(char::is_whitespace) {
            push_space(out);
        }
        out.push_str(delimiter);
        out.push_str(trimmed);
        out.push_str(delimiter);
        if inner.ends_with(char::is_whitespace) {
            out.push(' ');
        }
    }

    fn process_link(&mut self, handle: &Handle, attrs: &RefCell<Vec<Attribute>>, out: &mut String) {
        let mark = out.len();
        self.process_children(handle, out);

        let href = match attr(attrs, "href") {
            Some(href) if self.config.include_links && is_linkable(&href) => href.replace(' ', "%20"),
            _ => return,
        };

        let inner = out.split_off(mark);
        let label = WHITESPACE_REGEX.replace_all(inner.trim(), " ");

        if inner.starts_with(char::is_whitespace) {
            push_space(out);
        }
        if label.is_empty() || label == href {
            out.push('<');
            out.push_str(&href);
            out.push('>');
        } else {
            out.push('[');
            out.push_str(&label);
            out.push_str("](");
            out.push_str(&href);
            out.push(')');
        }
        if inner.ends_with(char::is_whitespace) && !label.is_empty() {
            out.push(' ');
        }
    }

    fn process_image(&mut self, attrs: &RefCell<Vec<Attribute>>, out: &mut String) {
        if !self.config.include_images {
            return;
        }
        let Some(src) = attr(attrs, "src").filter(|s| !s.trim().is_empty()) else {
            return;
        };
        let alt = attr(attrs, "alt").unwrap_or_default();

        out.push_str("![");
        out.push_str(&WHITESPACE_REGEX.replace_all(alt.trim(), " "));
        out.push_str("](");
        out.push_str(&src.trim().replace(' ', "%20"));
        out.push(')');
    }

    fn process_code_block(&mut self, handle: &Handle, attrs: &RefCell<Vec<Attribute>>, out: &mut String) {
        let mut code = String::new();
        extract_text(handle, &mut code);
        let code = code.strip_prefix('\n').unwrap_or(&code).trim_end_matches('\n');

        let language = code_language(attrs).or_else(|| {
            handle.children.borrow().iter().find_map(|child| match &child.data {
                NodeData::Element { name, attrs, .. } if name.local.as_ref() == "code" => code_language(attrs),
                _ => None,
            })
        });

        let mut fence = String::from("```");
        while code.contains(fence.as_str()) {
            fence.push('`');
        }

        let mut block = String::with_capacity(code.len() + 16);
        block.push_str(&fence);
        block.push_str(language.as_deref().unwrap_or(""));
        block.push('\n');
        block.push_str(code);
        block.push('\n');
        block.push_str(&fence);
        push_block(out, &block);
    }

    fn process_quote(&mut self, handle: &Handle, out: &mut String) {
        let inner = self.render_detached(handle);
        let inner = inner.trim();
        if inner.is_empty() {
            return;
        }

        let quoted = inner
            .lines()
            .map(|line| {
                if line.is_empty() {
                    ">".to_string()
                } else {
                    format!("> {}", line)
                }
            })
            .collect::<Vec<_>>()
            .join("\n");
        push_block(out, &quoted);
    }

    fn process_list(&mut self, handle: &Handle, list_type: ListType, out: &mut String) {
        let mut items: Vec<String> = Vec::new();

        self.list_depth += 1;
        for child in handle.children.borrow().iter() {
            let NodeData::Element { ref name, .. } = child.data else {
                continue;
            };
            match name.local.as_ref() {
                "li" => {
                    let mut item = String::new();
                    self.process_children(child, &mut item);
                    items.push(item);
                }
                // A list directly inside a list belongs to the previous item.
                "ul" | "ol" => {
                    if items.is_empty() {
                        items.push(String::new());
                    }
                    if let Some(last) = items.last_mut() {
                        self.process_node(child, last);
                    }
                }
                _ => {}
            }
        }
        self.list_depth -= 1;

        if items.is_empty() {
            return;
        }

        let mut block = String::new();
        for (i, item) in items.iter().enumerate() {
            let marker = match list_type {
                ListType::Unordered => self.config.bullet_marker.clone(),
                ListType::Ordered(start) => format!("{}.", start as usize + i),
            };
            let indent = " ".repeat(marker.chars().count() + 1);

            if i > 0 {
                block.push('\n');
            }
            block.push_str(&marker);
            for (n, line) in item.trim().lines().enumerate() {
                if n == 0 {
                    block.push(' ');
                    block.push_str(line);
                } else {
                    block.push('\n');
                    if !line.is_empty() {
                        block.push_str(&indent);
                        block.push_str(line);
                    }
                }
            }
        }

        if self.list_depth > 0 {
            ensure_line_break(out);
            out.push_str(&block);
            out.push('\n');
        } else {
            push_block(out, &block);
        }
    }

    fn process_table(&mut self, handle: &Handle, out: &mut String) {
        let mut rows: Vec<Vec<String>> = Vec::new();
        self.collect_rows(handle, &mut rows);
        if rows.is_empty() {
            return;
        }

        let col_count = rows.iter().map(Vec::len).max().unwrap_or(0);
        if col_count == 0 {
            return;
        }
        let mut col_widths = vec![3; col_count];
        for row in &rows {
            for (i, cell) in row.iter().enumerate() {
                col_widths[i] = col_widths[i].max(cell.chars().count());
            }
        }

        let mut table = String::new();
        table.push_str(&format_row(&rows[0], &col_widths));
        table.push('\n');
        table.push('|');
        for width in &col_widths {
            table.push(' ');
            table.push_str(&"-".repeat(*width));
            table.push_str(" |");
        }
        for row in rows.iter().skip(1) {
            table.push('\n');
            table.push_str(&format_row(row, &col_widths));
        }

        push_block(out, &table);
    }

    fn collect_rows(&mut self, handle: &Handle, rows: &mut Vec<Vec<String>>) {
        for child in handle.children.borrow().iter() {
            let NodeData::Element { ref name, .. } = child.data else {
                continue;
            };
            match name.local.as_ref() {
                "thead" | "tbody" | "tfoot" => self.collect_rows(child, rows),
                "tr" => {
                    let mut row = Vec::new();
                    for cell in child.children.borrow().iter() {
                        if let NodeData::Element { ref name, .. } = cell.data {
                            if matches!(name.local.as_ref(), "th" | "td") {
                                let text = self.render_detached(cell);
                                let text = WHITESPACE_REGEX.replace_all(text.trim(), " ");
                                row.push(text.replace('|', "\\|"));
                            }
                        }
                    }
                    if !row.is_empty() {
                        rows.push(row);
                    }
                }
                _ => {}
            }
        }
    }
}

fn format_row(cells: &[String], col_widths: &[usize]) -> String {
    let mut line = String::from("|");
    for (i, width) in col_widths.iter().enumerate() {
        let cell = cells.get(i).map(String::as_str).unwrap_or("");
        let padding = width.saturating_sub(cell.chars().count());
        line.push(' ');
        line.push_str(cell);
        line.extend(std::iter::repeat(' ').take(padding));
        line.push_str(" |");
    }
    line
}

fn process_inline_code(handle: &Handle, out: &mut String) {
    let mut code = String::new();
    extract_text(handle, &mut code);
    let code = code.replace('\n', " ");
    if code.trim().is_empty() {
        return;
    }

    if code.contains('`') {
        out.push_str("`` ");
        out.push_str(&code);
        out.push_str(" ``");
    } else {
        out.push('`');
        out.push_str(&code);
        out.push('`');
    }
}

fn push_text(out: &mut String, raw: &str) {
    let collapsed = WHITESPACE_REGEX.replace_all(raw, " ");
    if out.is_empty() || out.ends_with(char::is_whitespace) {
        out.push_str(collapsed.trim_start());
    } else {
        out.push_str(&collapsed);
    }
}

fn push_space(out: &mut String) {
    if !out.is_empty() && !out.ends_with(char::is_whitespace) {
        out.push(' ');
    }
}

fn push_line_break(out: &mut String) {
    if out.is_empty() || out.ends_with('\n') {
        return;
    }
    let len = out.trim_end_matches(' ').len();
    out.truncate(len);
    out.push_str("  \n");
}

fn ensure_line_break(out: &mut String) {
    let len = out.trim_end().len();
    out.truncate(len);
    if !out.is_empty() {
        out.push('\n');
    }
}

fn ensure_blank_line(out: &mut String) {
    let len = out.trim_end().len();
    out.truncate(len);
    if !out.is_empty() {
        out.push_str("\n\n");
    }
}

fn push_block(out: &mut String, block: &str) {
    ensure_blank_line(out);
    out.push_str(block);
    out.push_str("\n\n");
}

fn attr(attrs: &RefCell<Vec<Attribute>>, name: &str) -> Option<String> {
    attrs
        .borrow()
        .iter()
        .find(|a| a.name.local.as_ref() == name)
        .map(|a| a.value.to_string())
}

fn code_language(attrs: &RefCell<Vec<Attribute>>) -> Option<String> {
    let class = attr(attrs, "class")?;
    class.split_whitespace().find_map(|c| {
        c.strip_prefix("language-")
            .or_else(|| c.strip_prefix("lang-"))
            .filter(|lang| !lang.is_empty())
            .map(str::to_string)
    })
}

fn is_linkable(href: &str) -> bool {
    let href = href.trim();
    !href.is_empty() && !href.to_ascii_lowercase().starts_with("javascript:")
}

fn extract_text(handle: &Handle, buffer: &mut String) {
    match &handle.data {
        NodeData::Text { contents } => buffer.push_str(contents.borrow().as_ref()),
        NodeData::Element { name, .. } if name.local.as_ref() == "br" => buffer.push('\n'),
        NodeData::Element { .. } => {
            for child in handle.children.borrow().iter() {
                extract_text(child, buffer);
            }
        }
        _ => {}
    }
}

/// Converts an HTML document to Markdown.
pub fn html_to_markdown(html: &str, config: &ConvertConfig) -> String {
    let dom = parse_document(RcDom::default(), Default::default()).one(html);

    let mut out = String::with_capacity(html.len() / 2);
    MarkdownFormatter::new(config).process_node(&dom.document, &mut out);
    out.trim().to_string()
}

/// First `limit` characters of `text`, never splitting a character.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

//! Rendered-HTML to plain-text conversion for forum posts.

use scraper::{ElementRef, Html, Node};

const PARAGRAPH_ELEMENTS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "ul", "ol", "table",
];
const LINE_ELEMENTS: &[&str] = &[
    "div", "tr", "section", "article", "header", "footer", "aside", "figure", "hr",
];
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "template", "noscript"];

/// Converts a post body into plain text with one prose line per rendered line.
///
/// Images labelled `:name:` (forum emoji) become `[name]`; other images become
/// `[image: alt]` or `[image]`. Links to absolute URLs keep their target as
/// `text (url)`, and quoted blocks are prefixed with `> `.
pub fn normalize_post_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut text = TextBuilder::default();
    render_children(fragment.root_element(), &mut text);
    text.finish()
}

#[derive(Default)]
struct TextBuilder {
    buffer: String,
    preformatted_depth: usize,
    quote_depth: usize,
    list_item_depth: usize,
    /// Set right after a bullet; block children continue on the bullet line.
    at_item_start: bool,
}

impl TextBuilder {
    fn at_line_start(&self) -> bool {
        self.buffer.is_empty() || self.buffer.ends_with('\n')
    }

    fn push_char(&mut self, ch: char) {
        if ch == '\n' {
            self.buffer.push('\n');
            return;
        }
        if self.at_line_start() {
            for _ in 0..self.quote_depth {
                self.buffer.push_str("> ");
            }
        }
        self.buffer.push(ch);
        self.at_item_start = false;
    }

    fn push_text(&mut self, raw: &str) {
        if self.preformatted_depth > 0 {
            raw.chars().for_each(|ch| self.push_char(ch));
            return;
        }
        for ch in raw.chars() {
            if ch.is_whitespace() {
                if !self.at_line_start() && !self.buffer.ends_with(' ') {
                    self.buffer.push(' ');
                }
            } else {
                self.push_char(ch);
            }
        }
    }

    fn push_inline(&mut self, token: &str) {
        token.chars().for_each(|ch| self.push_char(ch));
    }

    fn line_break(&mut self) {
        self.buffer.push('\n');
    }

    fn ensure_line_start(&mut self) {
        if self.at_item_start {
            return;
        }
        if !self.at_line_start() {
            self.buffer.push('\n');
        }
    }

    /// Inside a list item a block only ends its line, keeping items tight.
    fn paragraph_break(&mut self) {
        self.ensure_line_start();
        if self.list_item_depth == 0 {
            self.buffer.push('\n');
        }
    }

    fn finish(self) -> String {
        let mut lines: Vec<&str> = Vec::new();
        let mut previous_blank = true;
        for line in self.buffer.lines().map(str::trim_end) {
            let blank = line.trim().is_empty();
            if blank && previous_blank {
                continue;
            }
            lines.push(if blank { "" } else { line });
            previous_blank = blank;
        }
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        lines.join("\n")
    }
}

fn render_children(element: ElementRef<'_>, text: &mut TextBuilder) {
    for child in element.children() {
        match child.value() {
            Node::Text(raw) => text.push_text(raw),
            Node::Element(_) => {
                if let Some(child_element) = ElementRef::wrap(child) {
                    render_element(child_element, text);
                }
            }
            _ => {}
        }
    }
}

fn render_element(element: ElementRef<'_>, text: &mut TextBuilder) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }
    match name {
        "br" => text.line_break(),
        "img" => text.push_inline(&image_placeholder(element)),
        "a" => render_link(element, text),
        "li" => {
            text.ensure_line_start();
            text.push_inline("- ");
            text.at_item_start = true;
            text.list_item_depth += 1;
            render_children(element, text);
            text.list_item_depth -= 1;
            text.at_item_start = false;
            text.ensure_line_start();
        }
        "pre" => {
            text.ensure_line_start();
            text.preformatted_depth += 1;
            render_children(element, text);
            text.preformatted_depth -= 1;
            text.paragraph_break();
        }
        "blockquote" => {
            text.ensure_line_start();
            text.quote_depth += 1;
            render_children(element, text);
            text.quote_depth -= 1;
            text.paragraph_break();
        }
        _ if PARAGRAPH_ELEMENTS.contains(&name) => {
            text.ensure_line_start();
            render_children(element, text);
            text.paragraph_break();
        }
        _ if LINE_ELEMENTS.contains(&name) => {
            text.ensure_line_start();
            render_children(element, text);
            text.ensure_line_start();
        }
        _ => render_children(element, text),
    }
}

/// Relative targets such as mention links to `/user/alice` stay text-only.
fn render_link(element: ElementRef<'_>, text: &mut TextBuilder) {
    let start = text.buffer.len();
    render_children(element, text);
    let Some(href) = element
        .value()
        .attr("href")
        .map(str::trim)
        .filter(|href| href.starts_with("https://") || href.starts_with("http://"))
    else {
        return;
    };
    let visible = text.buffer[start..].trim();
    if visible.is_empty() {
        text.push_inline(href);
    } else if !visible.contains(href) {
        if !text.buffer.ends_with(' ') {
            text.buffer.push(' ');
        }
        text.push_inline(&format!("({href})"));
    }
}

fn image_placeholder(element: ElementRef<'_>) -> String {
    let alt = element.value().attr("alt").map(str::trim).unwrap_or("");
    let title = element.value().attr("title").map(str::trim).unwrap_or("");
    if let Some(label) = colon_wrapped_label(alt).or_else(|| colon_wrapped_label(title)) {
        return format!("[{label}]");
    }
    if alt.is_empty() {
        "[image]".to_string()
    } else {
        format!("[image: {alt}]")
    }
}

fn colon_wrapped_label(raw: &str) -> Option<&str> {
    let inner = raw.strip_prefix(':')?.strip_suffix(':')?;
    if inner.is_empty() || inner.contains(char::is_whitespace) || inner.contains(':') {
        return None;
    }
    Some(inner)
}

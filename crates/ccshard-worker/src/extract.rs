//! Main-text extraction from HTML response payloads

use std::borrow::Cow;

use scraper::{ElementRef, Html, Node, Selector};

/// Turns a response payload into plain text, or `None` when there is none.
pub trait ContentExtractor {
    fn extract(&self, payload: &[u8]) -> Option<String>;
}

impl<E: ContentExtractor + ?Sized> ContentExtractor for &E {
    fn extract(&self, payload: &[u8]) -> Option<String> {
        (**self).extract(payload)
    }
}

/// Elements whose text never counts as content
const SKIP_TAGS: &[&str] = &[
    "script", "style", "template", "noscript", "svg", "nav", "header", "footer", "aside", "form",
    "iframe", "head",
];

/// Elements emitted as one text block each
const BLOCK_TAGS: &[&str] = &[
    "h1", "h2", "h3", "h4", "h5", "h6", "p", "li", "blockquote", "pre", "td", "dd", "dt",
    "figcaption",
];

/// Block-structured extractor built on `scraper`.
///
/// Picks `<article>`, then `<main>`, then `<body>` as the content root and
/// emits the text of block elements inside it, one paragraph per block.
/// Navigation, scripts and similar chrome are skipped. When the root has no
/// block elements its whole visible text is used.
#[derive(Clone)]
pub struct HtmlExtractor {
    roots: Vec<Selector>,
}

impl HtmlExtractor {
    pub fn new() -> Self {
        let roots = ["article", "main", "body"]
            .into_iter()
            .filter_map(|s| Selector::parse(s).ok())
            .collect();
        Self { roots }
    }

    /// Extract from a decoded HTML string.
    pub fn extract_html(&self, html: &str) -> Option<String> {
        let document = Html::parse_document(html);
        let root = self
            .roots
            .iter()
            .find_map(|sel| document.select(sel).next())
            .unwrap_or_else(|| document.root_element());

        let mut blocks: Vec<String> = Vec::new();
        for element in root.descendent_elements() {
            let tag = element.value().name();
            if !BLOCK_TAGS.contains(&tag) || inside_skipped_or_block(&element, &root) {
                continue;
            }
            let text = visible_text(&element);
            if !text.is_empty() {
                blocks.push(text);
            }
        }

        let text = if blocks.is_empty() {
            visible_text(&root)
        } else {
            blocks.join("\n\n")
        };
        (!text.is_empty()).then_some(text)
    }
}

impl Default for HtmlExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentExtractor for HtmlExtractor {
    fn extract(&self, payload: &[u8]) -> Option<String> {
        if payload.is_empty() {
            return None;
        }
        let html: Cow<'_, str> = String::from_utf8_lossy(payload);
        self.extract_html(&html)
    }
}

/// Whether an ancestor below `root` is skipped chrome or already a block.
fn inside_skipped_or_block(element: &ElementRef<'_>, root: &ElementRef<'_>) -> bool {
    for ancestor in element.ancestors() {
        if ancestor.id() == root.id() {
            break;
        }
        if let Some(parent) = ElementRef::wrap(ancestor) {
            let name = parent.value().name();
            if SKIP_TAGS.contains(&name) || BLOCK_TAGS.contains(&name) {
                return true;
            }
        }
    }
    false
}

/// Text under `element` minus skipped subtrees, whitespace collapsed.
fn visible_text(element: &ElementRef<'_>) -> String {
    let mut raw = String::new();
    collect_text(element, &mut raw);
    collapse_whitespace(&raw)
}

fn collect_text(element: &ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) if SKIP_TAGS.contains(&el.name()) => {}
            Node::Element(el) => {
                // Keep words from adjacent inline elements apart
                if el.name() == "br" {
                    out.push(' ');
                }
                if let Some(child) = ElementRef::wrap(child) {
                    collect_text(&child, out);
                }
            }
            _ => {}
        }
    }
}

fn collapse_whitespace(input: &str) -> String {
    let mut buf = String::with_capacity(input.len());
    let mut last_space = false;
    for ch in input.chars() {
        if ch.is_whitespace() {
            if !last_space && !buf.is_empty() {
                buf.push(' ');
            }
            last_space = true;
        } else {
            buf.push(ch);
            last_space = false;
        }
    }
    buf.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(html: &str) -> Option<String> {
        HtmlExtractor::new().extract(html.as_bytes())
    }

    #[test]
    fn prefers_article_over_body() {
        let html = "<html><body><p>outside</p><article><h1>Title</h1><p>Inside   the\n article.</p></article></body></html>";
        assert_eq!(extract(html).unwrap(), "Title\n\nInside the article.");
    }

    #[test]
    fn drops_scripts_styles_and_nav() {
        let html = r#"<body><nav><ul><li>Home</li></ul></nav>
            <script>var x = 1;</script><style>p{}</style>
            <p>Real <b>content</b> here.<script>alert(1)</script></p></body>"#;
        assert_eq!(extract(html).unwrap(), "Real content here.");
    }

    #[test]
    fn nested_blocks_are_not_duplicated() {
        let html = "<body><ul><li><p>one</p></li><li>two</li></ul></body>";
        assert_eq!(extract(html).unwrap(), "one\n\ntwo");
    }

    #[test]
    fn falls_back_to_root_text_without_blocks() {
        let html = "<body><div>just <span>a</span> div</div></body>";
        assert_eq!(extract(html).unwrap(), "just a div");
    }

    #[test]
    fn empty_or_blank_pages_yield_none() {
        assert!(extract("").is_none());
        assert!(extract("<html><body>   \n </body></html>").is_none());
        assert!(extract("<body><script>only()</script></body>").is_none());
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let mut payload = b"<body><p>caf".to_vec();
        payload.push(0xff);
        payload.extend_from_slice(b"</p></body>");
        let text = HtmlExtractor::new().extract(&payload).unwrap();
        assert!(text.starts_with("caf"));
    }
}

//! Readable-text extraction from captured HTML.

use knowman_core::defaults::{READABILITY_EASY, READABILITY_HARD, READABILITY_WORDS_PER_SENTENCE};
use scraper::{ElementRef, Html, Node, Selector};

/// Elements whose text never belongs to the page content.
const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "svg", "head"];

/// Elements that separate words when flattened to text.
const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main", "nav",
    "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// Content roots, most specific first.
const CONTENT_ROOTS: &[&str] = &["article", "main", "body"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPage {
    /// `<title>`, else the first `<h1>`.
    pub title: Option<String>,
    /// Whitespace-collapsed visible text.
    pub text: String,
}

pub fn extract_page(html: &str) -> ExtractedPage {
    let document = Html::parse_document(html);

    let title = first_text(&document, "title").or_else(|| first_text(&document, "h1"));

    let root = CONTENT_ROOTS
        .iter()
        .find_map(|name| first_element(&document, name))
        .unwrap_or_else(|| document.root_element());

    let mut raw = String::new();
    push_visible_text(root, &mut raw);

    ExtractedPage {
        title,
        text: collapse_whitespace(&raw),
    }
}

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Readability heuristic: short sentences read easier.
///
/// Sentences are the pieces between runs of `.`, `!` and `?`, counting a
/// trailing empty piece the same way a plain split does.
pub fn readability_score(text: &str) -> f32 {
    let words = text.split_whitespace().count().max(1);
    let mut boundaries = 0usize;
    let mut in_run = false;
    for c in text.chars() {
        let terminator = matches!(c, '.' | '!' | '?');
        if terminator && !in_run {
            boundaries += 1;
        }
        in_run = terminator;
    }
    let sentences = boundaries + 1;

    if (words as f32 / sentences as f32) < READABILITY_WORDS_PER_SENTENCE as f32 {
        READABILITY_EASY
    } else {
        READABILITY_HARD
    }
}

fn selector(name: &str) -> Option<Selector> {
    Selector::parse(name).ok()
}

fn first_element<'a>(document: &'a Html, name: &str) -> Option<ElementRef<'a>> {
    let selector = selector(name)?;
    document.select(&selector).next()
}

fn first_text(document: &Html, name: &str) -> Option<String> {
    let element = first_element(document, name)?;
    let text = collapse_whitespace(&element.text().collect::<String>());
    (!text.is_empty()).then_some(text)
}

fn push_visible_text(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if SKIPPED_ELEMENTS.contains(&name) {
                    continue;
                }
                if let Some(child_element) = ElementRef::wrap(child) {
                    let block = BLOCK_ELEMENTS.contains(&name);
                    if block {
                        out.push(' ');
                    }
                    push_visible_text(child_element, out);
                    if block {
                        out.push(' ');
                    }
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefers_article() {
        let html = r#"<html><head><title>Page Title</title></head>
            <body><nav>Menu</nav><article><h1>Heading</h1><p>First   para.</p><p>Second.</p></article>
            <footer>Footer</footer></body></html>"#;
        let page = extract_page(html);
        assert_eq!(page.title.as_deref(), Some("Page Title"));
        assert_eq!(page.text, "Heading First para. Second.");
    }

    #[test]
    fn test_falls_back_to_main_then_body() {
        let main = extract_page("<body><p>Out</p><main>Inside main</main></body>");
        assert_eq!(main.text, "Inside main");

        let body = extract_page("<body><div>Just</div><div>body</div></body>");
        assert_eq!(body.text, "Just body");
    }

    #[test]
    fn test_skips_scripts_and_styles() {
        let html = "<body><script>var x = 1;</script><style>p{}</style><p>Visible</p>\
                    <noscript>enable js</noscript></body>";
        assert_eq!(extract_page(html).text, "Visible");
    }

    #[test]
    fn test_title_from_h1_when_missing() {
        let page = extract_page("<body><h1>  Big   Heading </h1><p>x</p></body>");
        assert_eq!(page.title.as_deref(), Some("Big Heading"));

        let page = extract_page("<body><p>no headings</p></body>");
        assert!(page.title.is_none());
    }

    #[test]
    fn test_inline_elements_do_not_split_words() {
        let page = extract_page("<body><p>un<b>bold</b>ed</p></body>");
        assert_eq!(page.text, "unbolded");
    }

    #[test]
    fn test_readability_short_sentences() {
        assert_eq!(readability_score("Short one. Another short one."), 0.8);
    }

    #[test]
    fn test_readability_long_sentence() {
        let long = vec!["word"; 70].join(" ");
        assert_eq!(readability_score(&long), 0.5);
    }

    #[test]
    fn test_readability_terminator_runs_are_one_boundary() {
        let half = vec!["word"; 29].join(" ");
        assert_eq!(readability_score(&format!("{half}... {half}")), 0.8);

        // 60 words and one run of terminators: two pieces, 30 words each.
        let long = vec!["word"; 60].join(" ");
        assert_eq!(readability_score(&format!("{long}!!!")), 0.5);
    }

    #[test]
    fn test_readability_empty_text() {
        assert_eq!(readability_score(""), 0.8);
    }
}

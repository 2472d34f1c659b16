//! HTML 블록 추출
//!
//! 제목 태그와 본문 블록 태그를 문서 순서대로 뽑습니다.
//! 스크립트/스타일 텍스트는 블록 선택자에 걸리지 않으므로 포함되지 않습니다.

use scraper::{ElementRef, Html, Selector};

use super::Block;

const BLOCK_SELECTOR: &str = "h1, h2, h3, h4, h5, h6, p, li, pre, blockquote, td";

/// 문서의 `<title>`
pub fn extract_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|e| collapse_whitespace(&e.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// 블록 목록 추출
///
/// 블록 태그가 하나도 없으면 `<body>` 전체를 한 블록으로 돌려줍니다.
pub fn extract_blocks(html: &str) -> Vec<Block> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse(BLOCK_SELECTOR) else {
        return vec![];
    };

    let mut blocks = Vec::new();
    for element in document.select(&selector) {
        // 중첩 블록(li 안의 p 등)은 가장 안쪽 것만
        if element.select(&selector).next().is_some() {
            continue;
        }
        let text = element_text(&element);
        if text.is_empty() {
            continue;
        }
        if is_heading(element.value().name()) {
            blocks.push(Block::Heading(text));
        } else {
            blocks.push(Block::Text(text));
        }
    }

    if blocks.is_empty() {
        if let Ok(body) = Selector::parse("body") {
            if let Some(element) = document.select(&body).next() {
                let text = element_text(&element);
                if !text.is_empty() {
                    blocks.push(Block::Text(text));
                }
            }
        }
    }

    blocks
}

fn is_heading(tag: &str) -> bool {
    matches!(tag, "h1" | "h2" | "h3" | "h4" | "h5" | "h6")
}

fn element_text(element: &ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

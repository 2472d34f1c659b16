//! PDF 텍스트 추출
//!
//! pdf-extract로 전체 텍스트를 뽑은 뒤 폼피드(`\x0c`) 기준으로 페이지를 나눕니다.

use anyhow::{Context, Result};

/// (페이지 번호, 텍스트) 목록. 페이지 번호는 1부터 시작합니다.
pub async fn extract_pages(name: &str, bytes: Vec<u8>) -> Result<Vec<(usize, String)>> {
    let label = name.to_string();
    let text = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
        .await
        .context("PDF extraction task panicked")?
        .with_context(|| format!("Failed to extract text from PDF: {}", label))?;

    if text.trim().is_empty() {
        tracing::warn!("No text extracted from PDF: {}. It might be a scanned document.", name);
        return Ok(vec![]);
    }

    Ok(split_pages(&text))
}

/// 폼피드로 페이지 분리 (빈 페이지도 번호는 유지)
fn split_pages(text: &str) -> Vec<(usize, String)> {
    text.split('\x0c')
        .enumerate()
        .map(|(i, page)| (i + 1, page.trim().to_string()))
        .filter(|(_, page)| !page.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_pages_keeps_numbering() {
        let pages = split_pages("first page\x0c\x0cthird page\x0c");
        assert_eq!(
            pages,
            vec![(1, "first page".to_string()), (3, "third page".to_string())]
        );
    }

    #[test]
    fn test_split_single_page() {
        assert_eq!(split_pages("  only  "), vec![(1, "only".to_string())]);
    }

    #[tokio::test]
    async fn test_invalid_pdf_fails() {
        assert!(extract_pages("broken.pdf", b"not a pdf".to_vec()).await.is_err());
    }
}

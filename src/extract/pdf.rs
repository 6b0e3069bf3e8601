//! PDF 文字提取（pdf-extract）

use crate::extract::{truncate_chars, TEXT_MAX_CHARS};

/// 提取 PDF 文字，最多 200 000 字符；失败时返回可直接发给用户的错误说明
pub fn pdf_to_text(data: &[u8]) -> String {
    // pdf-extract 遇到畸形文件可能 panic
    let result = std::panic::catch_unwind(|| pdf_extract::extract_text_from_mem(data));
    match result {
        Ok(Ok(text)) => truncate_chars(text.trim(), TEXT_MAX_CHARS).to_string(),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "pdf extract failed");
            format!("[PDF 文字提取失败: {}]", e)
        }
        Err(_) => {
            tracing::warn!("pdf extract panicked");
            "[PDF 文字提取失败: 文件格式无法解析]".to_string()
        }
    }
}

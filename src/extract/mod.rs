//! 附件解析：按 MIME 把飞书下载的文件转成可摘要的文字，或压缩后的图片
//!
//! - PDF：pdf-extract
//! - XLSX：zip + 正则读取第一个工作表
//! - 文本 / CSV / Markdown：UTF-8 宽松解码
//! - 图片：缩放并转 JPEG，交给 vision 模型

pub mod excel;
pub mod imaging;
pub mod mime;
pub mod pdf;

pub use excel::{excel_to_text, xlsx_to_markdown};
pub use imaging::compress_image;
pub use mime::{detect_mime, resolve_mime, sniff_mime};
pub use pdf::pdf_to_text;

/// 文字类附件的最大字符数
pub const TEXT_MAX_CHARS: usize = 200_000;

/// 按字符（而非字节）截断，保证不切断 UTF-8
pub fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// 解析结果
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Text(String),
    Image { data: Vec<u8>, mime: String },
    /// 暂不支持的类型（如 docx），携带判定出的 MIME
    Unsupported(String),
}

/// 同步解析；PDF 与大图片较慢，异步场景请用 [`extract`]
pub fn extract_blocking(data: &[u8], filename: Option<&str>, content_type: Option<&str>) -> Extracted {
    let mime = resolve_mime(filename, content_type, data);
    match mime.as_str() {
        mime::PDF => Extracted::Text(pdf_to_text(data)),
        mime::XLSX => Extracted::Text(excel_to_text(data)),
        m if m.starts_with("image/") => {
            let (data, mime) = compress_image(data);
            Extracted::Image { data, mime }
        }
        m if m.starts_with("text/") => {
            let text = String::from_utf8_lossy(data);
            Extracted::Text(truncate_chars(&text, TEXT_MAX_CHARS).to_string())
        }
        mime::OCTET_STREAM => {
            // 无法判定时按 PDF 尝试一次
            let text = pdf_to_text(data);
            if text.starts_with("[PDF 文字提取失败") {
                Extracted::Unsupported(mime.clone())
            } else {
                Extracted::Text(text)
            }
        }
        _ => Extracted::Unsupported(mime.clone()),
    }
}

/// 在阻塞线程池中解析
pub async fn extract(data: Vec<u8>, filename: Option<String>, content_type: Option<String>) -> Extracted {
    let fallback_mime = resolve_mime(filename.as_deref(), content_type.as_deref(), &data);
    tokio::task::spawn_blocking(move || {
        extract_blocking(&data, filename.as_deref(), content_type.as_deref())
    })
    .await
    .unwrap_or_else(|e| {
        tracing::error!(error = %e, "extract task failed");
        Extracted::Unsupported(fallback_mime)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("你好世界", 2), "你好");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn test_extract_text_file() {
        let out = extract_blocking("a,b\n1,2".as_bytes(), Some("t.csv"), None);
        assert_eq!(out, Extracted::Text("a,b\n1,2".into()));

        let out = extract_blocking(&[0x66, 0x6f, 0xff, 0x6f], Some("x.txt"), None);
        assert!(matches!(out, Extracted::Text(t) if t.starts_with("fo")));
    }

    #[test]
    fn test_extract_unsupported() {
        let out = extract_blocking(b"PK\x03\x04", Some("plan.docx"), None);
        assert_eq!(out, Extracted::Unsupported(mime::DOCX.to_string()));

        let out = extract_blocking(b"random bytes", None, None);
        assert_eq!(out, Extracted::Unsupported(mime::OCTET_STREAM.to_string()));
    }

    #[tokio::test]
    async fn test_extract_async_image_fallback() {
        let out = extract(b"not really".to_vec(), Some("p.png".into()), None).await;
        match out {
            Extracted::Image { data, mime } => {
                assert_eq!(data, b"not really");
                assert_eq!(mime, "application/octet-stream");
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}

//! MIME 判定：文件名扩展名 → Content-Type 头 → 魔数

pub const PDF: &str = "application/pdf";
pub const XLSX: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";
pub const DOCX: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const CSV: &str = "text/csv";
pub const PLAIN: &str = "text/plain";
pub const OCTET_STREAM: &str = "application/octet-stream";

/// 按扩展名判定（大小写不敏感），未知返回 octet-stream
pub fn detect_mime(filename: &str) -> &'static str {
    let name = filename.trim().to_ascii_lowercase();
    let ext = name.rsplit_once('.').map(|(_, e)| e).unwrap_or("");
    match ext {
        "pdf" => PDF,
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "xlsx" => XLSX,
        "csv" => CSV,
        "txt" | "md" | "log" => PLAIN,
        "docx" => DOCX,
        _ => OCTET_STREAM,
    }
}

/// 按文件头魔数判定；`PK` 开头的 zip 视为 xlsx（飞书附件里最常见的 OOXML）
pub fn sniff_mime(data: &[u8]) -> &'static str {
    if data.starts_with(b"%PDF") {
        PDF
    } else if data.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if data.starts_with(&[0xFF, 0xD8, 0xFF]) {
        "image/jpeg"
    } else if data.starts_with(b"GIF8") {
        "image/gif"
    } else if data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP" {
        "image/webp"
    } else if data.starts_with(b"BM") {
        "image/bmp"
    } else if data.starts_with(b"PK\x03\x04") {
        XLSX
    } else {
        OCTET_STREAM
    }
}

/// 去掉 Content-Type 的参数部分；octet-stream 与空值视为未知
fn normalize_content_type(content_type: &str) -> Option<String> {
    let ct = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();
    if ct.is_empty() || ct == OCTET_STREAM {
        None
    } else {
        Some(ct)
    }
}

/// 综合判定：文件名优先，其次 Content-Type，最后魔数
pub fn resolve_mime(filename: Option<&str>, content_type: Option<&str>, data: &[u8]) -> String {
    if let Some(mime) = filename.map(detect_mime).filter(|m| *m != OCTET_STREAM) {
        return mime.to_string();
    }
    if let Some(ct) = content_type.and_then(normalize_content_type) {
        return ct;
    }
    sniff_mime(data).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_mime_by_extension() {
        assert_eq!(detect_mime("Report.PDF"), PDF);
        assert_eq!(detect_mime("photo.jpeg"), "image/jpeg");
        assert_eq!(detect_mime("data.xlsx"), XLSX);
        assert_eq!(detect_mime("notes.md"), PLAIN);
        assert_eq!(detect_mime("plan.docx"), DOCX);
        assert_eq!(detect_mime("archive"), OCTET_STREAM);
    }

    #[test]
    fn test_sniff_mime() {
        assert_eq!(sniff_mime(b"%PDF-1.7 ..."), PDF);
        assert_eq!(sniff_mime(&[0x89, b'P', b'N', b'G', 0x0D]), "image/png");
        assert_eq!(sniff_mime(&[0xFF, 0xD8, 0xFF, 0xE0]), "image/jpeg");
        assert_eq!(sniff_mime(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_mime(b"PK\x03\x04rest"), XLSX);
        assert_eq!(sniff_mime(b"hello"), OCTET_STREAM);
    }

    #[test]
    fn test_resolve_mime_order() {
        assert_eq!(resolve_mime(Some("a.csv"), Some("image/png"), b"%PDF"), CSV);
        assert_eq!(
            resolve_mime(Some("noext"), Some("image/png; charset=binary"), b"%PDF"),
            "image/png"
        );
        assert_eq!(resolve_mime(None, Some("application/octet-stream"), b"%PDF-1.4"), PDF);
        assert_eq!(resolve_mime(None, None, b"???"), OCTET_STREAM);
    }
}

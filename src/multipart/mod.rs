//! multipart/form-data 请求体
//!
//! 由一组有序的字段（文本、字节、文件）生成一个以分隔符划分、可流式读取的请求体：
//!
//! ```text
//! --boundary\r\n
//! Content-Disposition: form-data; name="..."[; filename="..."]\r\n
//! Content-Type: ...\r\n
//! \r\n
//! <payload>\r\n
//! ...
//! --boundary--\r\n
//! ```
//!
//! 总长度是每个字段的头部、负载与结尾 CRLF 之和再加上结束分隔线；
//! 任一字段长度未知时总长度也未知。

mod body;
mod part;

pub use self::body::MultipartBody;
pub use self::part::Part;

const BOUNDARY_ALPHABET: &[u8] = b"-_1234567890abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// 生成一个 30 到 40 个字符的随机分隔符，字符取自 `[A-Za-z0-9_-]`。
pub fn generate_boundary() -> String {
    let len = fastrand::usize(30..=40);
    (0..len)
        .map(|_| BOUNDARY_ALPHABET[fastrand::usize(..BOUNDARY_ALPHABET.len())] as char)
        .collect()
}

/// 按给定分隔符编码 `parts` 的总字节数；任一字段长度未知时返回 `None`。
pub fn length_of_parts(parts: &[Part], boundary: &str) -> Option<u64> {
    let mut total = 0u64;
    for part in parts {
        let head = part.head(boundary).len() as u64;
        let payload = part.payload_len()?;
        total += head + payload + 2;
    }
    // --boundary--\r\n
    total += boundary.len() as u64 + 6;
    Some(total)
}

//! 基于字节偏移的字段提取
//!
//! SDP、Call-ID 和日志行都不做完整语法解析，只按 “标记 .. 终止符” 取值，
//! 所有长度下限都在这里显式检查。

use memchr::memmem;

/// 字段提取结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field<'a> {
    /// 找到字段值（不含标记和终止符）
    Found(&'a [u8]),
    /// 标记不存在
    Missing,
    /// 标记存在，但没有终止符或长度不足
    Malformed,
}

impl<'a> Field<'a> {
    pub fn found(self) -> Option<&'a [u8]> {
        match self {
            Field::Found(value) => Some(value),
            _ => None,
        }
    }
}

/// 在 haystack 中查找 marker，再在其后查找 terminator。
///
/// `min_len` 是从 marker 起点到 terminator 的最小距离（包含 marker 本身），
/// 例如 "Call-ID: a" 对应 10。
pub fn find_field<'a>(haystack: &'a [u8], marker: &[u8], terminator: &[u8], min_len: usize) -> Field<'a> {
    let Some(start) = memmem::find(haystack, marker) else {
        return Field::Missing;
    };
    let rest = &haystack[start..];
    match memmem::find(rest, terminator) {
        Some(end) if end >= min_len && end >= marker.len() => Field::Found(&rest[marker.len()..end]),
        _ => Field::Malformed,
    }
}

/// 标记到 haystack 末尾的剩余部分，标记不存在时返回 None
pub fn rest_after<'a>(haystack: &'a [u8], marker: &[u8]) -> Option<&'a [u8]> {
    memmem::find(haystack, marker).map(|start| &haystack[start..])
}

pub fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    memmem::find(haystack, needle).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_field_found() {
        let data = b"INVITE x SIP/2.0\r\nCall-ID: abc@host\r\n";
        assert_eq!(find_field(data, b"Call-ID: ", b"\r\n", 10), Field::Found(&b"abc@host"[..]));
    }

    #[test]
    fn test_find_field_missing_marker() {
        assert_eq!(find_field(b"nothing here", b"Call-ID: ", b"\r\n", 10), Field::Missing);
    }

    #[test]
    fn test_find_field_without_terminator() {
        assert_eq!(find_field(b"x Call-ID: abc", b"Call-ID: ", b"\r\n", 10), Field::Malformed);
    }

    #[test]
    fn test_find_field_too_short() {
        // "Call-ID: " 后没有任何字符
        assert_eq!(find_field(b"x Call-ID: \r\n", b"Call-ID: ", b"\r\n", 10), Field::Malformed);
    }

    #[test]
    fn test_terminator_inside_marker_is_malformed() {
        // 终止符出现在 marker 范围内时不能产生负长度切片
        assert_eq!(find_field(b"a: [x", b": [", b" ", 0), Field::Malformed);
    }

    #[test]
    fn test_rest_after() {
        assert_eq!(rest_after(b"abc ID=1", b"ID="), Some(&b"ID=1"[..]));
        assert_eq!(rest_after(b"abc", b"ID="), None);
    }
}

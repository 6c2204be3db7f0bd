//! NG 控制协议解码边界
//!
//! 报文格式为 `<cookie> <bencode 字典>`。关联只关心 `call-id` 和 `SSRC`
//! 两个字段，所以解码结果是固定形状的 `NgMessage`，而不是任意字典。

use serde_json::{Map, Value};

use crate::error::NgError;

/// 列表/字典最大嵌套层数
pub const MAX_DEPTH: usize = 64;

/// NG 报文中关联需要的部分
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NgMessage {
    pub cookie: Vec<u8>,
    pub call_id: Option<Vec<u8>>,
    pub ssrc: Option<Value>,
}

pub trait NgDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> Result<NgMessage, NgError>;
}

/// bencode 值
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Bencode {
    Integer(i64),
    Bytes(Vec<u8>),
    List(Vec<Bencode>),
    Dict(Vec<(Vec<u8>, Bencode)>),
}

impl Bencode {
    /// 转成 JSON，字节串按 UTF-8 有损转换
    pub fn to_json(&self) -> Value {
        match self {
            Bencode::Integer(i) => Value::from(*i),
            Bencode::Bytes(b) => Value::String(String::from_utf8_lossy(b).into_owned()),
            Bencode::List(items) => Value::Array(items.iter().map(Bencode::to_json).collect()),
            Bencode::Dict(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    map.insert(String::from_utf8_lossy(key).into_owned(), value.to_json());
                }
                Value::Object(map)
            }
        }
    }
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Result<u8, NgError> {
        self.data.get(self.pos).copied().ok_or(NgError::Truncated(self.pos))
    }

    fn take_until(&mut self, end: u8) -> Result<&'a [u8], NgError> {
        let rest = &self.data[self.pos..];
        let idx = memchr::memchr(end, rest).ok_or(NgError::Truncated(self.data.len()))?;
        self.pos += idx + 1;
        Ok(&rest[..idx])
    }

    fn number(raw: &[u8]) -> Result<i64, NgError> {
        std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| NgError::InvalidNumber(String::from_utf8_lossy(raw).into_owned()))
    }

    fn enter(&mut self) -> Result<(), NgError> {
        if self.depth >= MAX_DEPTH {
            return Err(NgError::TooDeep(self.pos));
        }
        self.depth += 1;
        self.pos += 1;
        Ok(())
    }

    fn value(&mut self) -> Result<Bencode, NgError> {
        match self.peek()? {
            b'i' => {
                self.pos += 1;
                let raw = self.take_until(b'e')?;
                Ok(Bencode::Integer(Self::number(raw)?))
            }
            b'l' => {
                self.enter()?;
                let mut items = Vec::new();
                while self.peek()? != b'e' {
                    items.push(self.value()?);
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(Bencode::List(items))
            }
            b'd' => {
                self.enter()?;
                let mut entries = Vec::new();
                while self.peek()? != b'e' {
                    let key = self.bytes()?;
                    let value = self.value()?;
                    entries.push((key, value));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(Bencode::Dict(entries))
            }
            b'0'..=b'9' => Ok(Bencode::Bytes(self.bytes()?)),
            byte => Err(NgError::UnexpectedByte { offset: self.pos, byte }),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, NgError> {
        let byte = self.peek()?;
        if !byte.is_ascii_digit() {
            return Err(NgError::UnexpectedByte { offset: self.pos, byte });
        }
        let raw = self.take_until(b':')?;
        let len = usize::try_from(Self::number(raw)?)
            .map_err(|_| NgError::InvalidNumber(String::from_utf8_lossy(raw).into_owned()))?;
        let end = self.pos.checked_add(len).ok_or(NgError::Truncated(self.data.len()))?;
        let value = self.data.get(self.pos..end).ok_or(NgError::Truncated(self.data.len()))?;
        self.pos = end;
        Ok(value.to_vec())
    }
}

/// 解析一个完整的 bencode 值
pub fn parse_bencode(data: &[u8]) -> Result<Bencode, NgError> {
    Parser { data, pos: 0, depth: 0 }.value()
}

/// 内置的 bencode NG 解码器
#[derive(Debug, Default, Clone, Copy)]
pub struct BencodeNgDecoder;

impl NgDecoder for BencodeNgDecoder {
    fn decode(&self, payload: &[u8]) -> Result<NgMessage, NgError> {
        let idx = memchr::memchr(b' ', payload).ok_or(NgError::MissingCookie)?;
        if idx == 0 {
            return Err(NgError::MissingCookie);
        }
        let cookie = payload[..idx].to_vec();

        let Bencode::Dict(entries) = parse_bencode(&payload[idx + 1..])? else {
            return Err(NgError::NotADictionary);
        };

        let mut message = NgMessage {
            cookie,
            ..Default::default()
        };
        for (key, value) in entries {
            match key.as_slice() {
                b"call-id" => {
                    if let Bencode::Bytes(call_id) = value {
                        message.call_id = Some(call_id);
                    }
                }
                b"SSRC" => message.ssrc = Some(value.to_json()),
                _ => {}
            }
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bencode_values() {
        assert_eq!(parse_bencode(b"i42e").unwrap(), Bencode::Integer(42));
        assert_eq!(parse_bencode(b"4:spam").unwrap(), Bencode::Bytes(b"spam".to_vec()));
        assert_eq!(
            parse_bencode(b"l4:spami-3ee").unwrap(),
            Bencode::List(vec![Bencode::Bytes(b"spam".to_vec()), Bencode::Integer(-3)])
        );
    }

    #[test]
    fn test_parse_bencode_errors() {
        assert_eq!(parse_bencode(b"10:short"), Err(NgError::Truncated(8)));
        assert!(matches!(parse_bencode(b"x"), Err(NgError::UnexpectedByte { offset: 0, byte: b'x' })));
        assert!(matches!(parse_bencode(b"iabce"), Err(NgError::InvalidNumber(_))));
        assert!(matches!(parse_bencode(b"d3:key"), Err(NgError::Truncated(_))));
    }

    #[test]
    fn test_decode_offer_with_call_id() {
        let msg = BencodeNgDecoder
            .decode(b"5323_1 d7:call-id11:abc@host.io7:command5:offere")
            .unwrap();
        assert_eq!(msg.cookie, b"5323_1");
        assert_eq!(msg.call_id, Some(b"abc@host.io".to_vec()));
        assert_eq!(msg.ssrc, None);
    }

    #[test]
    fn test_decode_ssrc_stats() {
        let msg = BencodeNgDecoder
            .decode(b"5323_1 d4:SSRCd4:1234d7:packetsi10eee6:result2:oke")
            .unwrap();
        assert_eq!(msg.call_id, None);
        let ssrc = msg.ssrc.unwrap();
        assert_eq!(ssrc["1234"]["packets"], 10);
    }

    #[test]
    fn test_decode_requires_cookie_and_dict() {
        assert_eq!(BencodeNgDecoder.decode(b"d1:ai1ee"), Err(NgError::MissingCookie));
        assert_eq!(BencodeNgDecoder.decode(b" d1:ai1ee"), Err(NgError::MissingCookie));
        assert_eq!(BencodeNgDecoder.decode(b"c1 l1:ae"), Err(NgError::NotADictionary));
    }

    #[test]
    fn test_nesting_limit() {
        let mut nested = b"d1:a".to_vec();
        nested.extend(std::iter::repeat(b'l').take(MAX_DEPTH - 2));
        nested.extend(std::iter::repeat(b'e').take(MAX_DEPTH - 1));
        assert!(parse_bencode(&nested).is_ok());

        let mut too_deep = b"d1:a".to_vec();
        too_deep.extend(std::iter::repeat(b'l').take(MAX_DEPTH));
        assert_eq!(parse_bencode(&too_deep), Err(NgError::TooDeep(4 + MAX_DEPTH - 1)));
    }

    #[test]
    fn test_deeply_nested_payload_is_rejected() {
        // 在默认栈大小的线程上跑，和 worker 一致
        let handle = std::thread::Builder::new()
            .name("worker-test".to_string())
            .spawn(|| {
                let mut payload = b"c1 ".to_vec();
                payload.extend(std::iter::repeat(b'l').take(60_000));
                BencodeNgDecoder.decode(&payload)
            })
            .unwrap();
        assert!(matches!(handle.join().unwrap(), Err(NgError::TooDeep(_))));
    }
}

//! SIP 报文解码：按行分帧、解析首行和头部，消息体原样保留

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::SipError;

/// SIP 协议版本
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipVersion {
    V1_0,
    V2_0,
}

impl fmt::Display for SipVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SipVersion::V1_0 => f.write_str("SIP/1.0"),
            SipVersion::V2_0 => f.write_str("SIP/2.0"),
        }
    }
}

impl FromStr for SipVersion {
    type Err = SipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SIP/1.0" => Ok(SipVersion::V1_0),
            "SIP/2.0" => Ok(SipVersion::V2_0),
            _ => Err(SipError::UnknownVersion(s.to_string())),
        }
    }
}

/// SIP 方法（封闭枚举，未知方法解析失败）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SipMethod {
    Invite,
    Ack,
    Bye,
    Cancel,
    Options,
    Register,
    Prack,
    Subscribe,
    Notify,
    Publish,
    Info,
    Refer,
    Message,
    Update,
    Ping,
}

impl SipMethod {
    pub const ALL: [SipMethod; 15] = [
        SipMethod::Invite,
        SipMethod::Ack,
        SipMethod::Bye,
        SipMethod::Cancel,
        SipMethod::Options,
        SipMethod::Register,
        SipMethod::Prack,
        SipMethod::Subscribe,
        SipMethod::Notify,
        SipMethod::Publish,
        SipMethod::Info,
        SipMethod::Refer,
        SipMethod::Message,
        SipMethod::Update,
        SipMethod::Ping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Ack => "ACK",
            SipMethod::Bye => "BYE",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Options => "OPTIONS",
            SipMethod::Register => "REGISTER",
            SipMethod::Prack => "PRACK",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Publish => "PUBLISH",
            SipMethod::Info => "INFO",
            SipMethod::Refer => "REFER",
            SipMethod::Message => "MESSAGE",
            SipMethod::Update => "UPDATE",
            SipMethod::Ping => "PING",
        }
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SipMethod {
    type Err = SipError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SipMethod::ALL
            .iter()
            .copied()
            .find(|method| method.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SipError::UnknownMethod(s.to_string()))
    }
}

/// 首行：请求或响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartLine {
    Request { method: SipMethod },
    Response { code: i32, status: String },
}

/// 按行切分后的报文：头部行和原样保留的 body
#[derive(Debug, Default, PartialEq, Eq)]
pub struct FramedMessage<'a> {
    pub lines: Vec<&'a [u8]>,
    pub body: &'a [u8],
}

/// 把缓冲区切成头部行和 body。
///
/// 去掉首尾的 `\n`，逐行按 `\n` 切分并去掉 `\r`；跳过开头的空行；
/// 之后遇到的第一个空行之后的所有字节都属于 body，不再按行解析。
pub fn frame_lines(data: &[u8]) -> FramedMessage<'_> {
    let data = trim_newlines(data);
    let mut framed = FramedMessage::default();
    let mut pos = 0;

    while pos < data.len() {
        let (raw, next) = match memchr::memchr(b'\n', &data[pos..]) {
            Some(idx) => (&data[pos..pos + idx], pos + idx + 1),
            None => (&data[pos..], data.len()),
        };
        let line = trim_cr(raw);
        pos = next;

        if line.is_empty() {
            if framed.lines.is_empty() {
                continue;
            }
            framed.body = &data[pos..];
            break;
        }
        framed.lines.push(line);
    }

    framed
}

fn trim_newlines(mut data: &[u8]) -> &[u8] {
    while let [b'\n', rest @ ..] = data {
        data = rest;
    }
    while let [rest @ .., b'\n'] = data {
        data = rest;
    }
    data
}

fn trim_cr(mut line: &[u8]) -> &[u8] {
    while let [b'\r', rest @ ..] = line {
        line = rest;
    }
    while let [rest @ .., b'\r'] = line {
        line = rest;
    }
    line
}

/// 解码后的 SIP 报文
///
/// 头部名统一转为小写，同名头部按到达顺序保存，不做覆盖。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipMessage {
    pub version: SipVersion,
    pub start: StartLine,
    pub headers: HashMap<String, Vec<String>>,
    pub body: Vec<u8>,
}

impl SipMessage {
    /// 从字节流解码 SIP 报文
    pub fn decode(data: &[u8]) -> Result<Self, SipError> {
        let framed = frame_lines(data);
        let Some((first, header_lines)) = framed.lines.split_first() else {
            return Err(SipError::MalformedFirstLine(String::new()));
        };

        let (version, start) = parse_first_line(&String::from_utf8_lossy(first))?;

        let mut headers: HashMap<String, Vec<String>> = HashMap::new();
        for line in header_lines {
            // 没有 ':' 的行直接丢弃
            let Some(idx) = memchr::memchr(b':', line) else {
                continue;
            };
            let name = String::from_utf8_lossy(&line[..idx]).trim_matches(' ').to_lowercase();
            let value = String::from_utf8_lossy(&line[idx + 1..]).trim_matches(' ').to_string();
            headers.entry(name).or_default().push(value);
        }

        Ok(Self {
            version,
            start,
            headers,
            body: framed.body.to_vec(),
        })
    }

    pub fn is_response(&self) -> bool {
        matches!(self.start, StartLine::Response { .. })
    }

    pub fn method(&self) -> Option<SipMethod> {
        match self.start {
            StartLine::Request { method } => Some(method),
            StartLine::Response { .. } => None,
        }
    }

    pub fn response_code(&self) -> Option<i32> {
        match self.start {
            StartLine::Response { code, .. } => Some(code),
            StartLine::Request { .. } => None,
        }
    }

    pub fn response_status(&self) -> Option<&str> {
        match &self.start {
            StartLine::Response { status, .. } => Some(status),
            StartLine::Request { .. } => None,
        }
    }

    /// 返回指定名称的全部头部值（名称不区分大小写）
    pub fn header(&self, name: &str) -> &[String] {
        self.headers
            .get(&name.to_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 返回指定名称的第一个头部值
    pub fn first_header(&self, name: &str) -> Option<&str> {
        self.header(name).first().map(String::as_str)
    }

    pub fn into_headers(self) -> HashMap<String, Vec<String>> {
        self.headers
    }
}

// 解析首行，例如:
//   INVITE sip:bob@example.com SIP/2.0
//   SIP/2.0 200 OK
//   SIP/2.0 501 Not Implemented
fn parse_first_line(line: &str) -> Result<(SipVersion, StartLine), SipError> {
    let fields: Vec<&str> = line.splitn(3, |c: char| c.is_ascii_whitespace()).collect();
    if fields.len() < 3 {
        return Err(SipError::MalformedFirstLine(line.to_string()));
    }

    if fields[0].starts_with("SIP") {
        let version = fields[0].parse()?;
        let code = fields[1]
            .parse()
            .map_err(|source| SipError::InvalidResponseCode {
                code: fields[1].to_string(),
                source,
            })?;
        Ok((
            version,
            StartLine::Response {
                code,
                status: fields[2].to_string(),
            },
        ))
    } else {
        let method = fields[0].parse()?;
        let version = fields[2].parse()?;
        Ok((version, StartLine::Request { method }))
    }
}

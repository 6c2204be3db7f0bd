use std::num::ParseIntError;

use thiserror::Error;

/// SIP 解码错误，调用方应视为“不是合法的 SIP 报文”，而不是致命错误
#[derive(Debug, Error)]
pub enum SipError {
    #[error("无效的 SIP 首行: '{0}'")]
    MalformedFirstLine(String),

    #[error("未知的 SIP 版本: '{0}'")]
    UnknownVersion(String),

    #[error("未知的 SIP 方法: '{0}'")]
    UnknownMethod(String),

    #[error("无效的 SIP 响应码 '{code}': {source}")]
    InvalidResponseCode {
        code: String,
        #[source]
        source: ParseIntError,
    },
}

/// IPv4 分片重组错误，只会导致当前分片被丢弃
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DefragError {
    #[error("分片超出 IPv4 最大长度: offset={offset}, len={len}")]
    TooBig { offset: usize, len: usize },

    #[error("非末尾分片过小: {0} 字节")]
    TooSmall(usize),

    #[error("分片数量超过上限 {0}")]
    TooManyFragments(usize),

    #[error("末尾分片长度不一致: 已记录 {expected}, 新分片 {got}")]
    InconsistentEnd { expected: usize, got: usize },
}

/// 缓存写入错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("缓存 key 为空")]
    EmptyKey,

    #[error("缓存 key 过长: {0} 字节")]
    KeyTooLarge(usize),

    #[error("缓存 value 过长: {0} 字节")]
    ValueTooLarge(usize),
}

/// NG 控制协议解码错误
#[derive(Debug, Error, PartialEq, Eq)]
pub enum NgError {
    #[error("NG 报文缺少 cookie")]
    MissingCookie,

    #[error("bencode 在偏移 {0} 处截断")]
    Truncated(usize),

    #[error("bencode 在偏移 {offset} 处出现非法字节 0x{byte:02x}")]
    UnexpectedByte { offset: usize, byte: u8 },

    #[error("bencode 数字无效: '{0}'")]
    InvalidNumber(String),

    #[error("NG 报文不是字典")]
    NotADictionary,

    #[error("bencode 在偏移 {0} 处嵌套过深")]
    TooDeep(usize),
}

/// 抓包错误
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("无法打开网络接口 {interface}: {source}")]
    Open {
        interface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("设置过滤器 '{filter}' 失败: {source}")]
    Filter {
        filter: String,
        #[source]
        source: pcap::Error,
    },

    #[error("抓包错误: {0}")]
    Read(#[from] pcap::Error),
}

/// 链路层 / 网络层解析错误，由 etherparse 的错误转换而来
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LayerError {
    #[error("报文解析失败: {0}")]
    Slice(String),
}

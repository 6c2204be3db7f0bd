//! VoIP 探针的解码与关联核心：SIP 解析、IPv4 分片重组，
//! 以及把 RTCP / 日志 / NG 控制报文关联回 SIP Call-ID 的关联引擎。

pub mod cache;
pub mod config;
pub mod correlator;
pub mod decoder;
pub mod defrag;
pub mod error;
pub mod layers;
pub mod ng;
pub mod output;
pub mod packet_capture;
pub mod rtcp;
pub mod scan;
pub mod sip_parser;

pub use cache::CorrelationCaches;
pub use correlator::{Correlation, Correlator, PortRoles, RecordType};
pub use decoder::{CaptureInfo, Decoder, DecoderOptions, Packet};
pub use sip_parser::{SipMessage, SipMethod, SipVersion};

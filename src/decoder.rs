//! 报文处理流水线：链路层 -> IPv4（可选重组）-> UDP/TCP -> SIP

use std::collections::HashMap;
use std::time::Duration;

use log::{debug, error};

use crate::defrag::Ipv4Defragmenter;
use crate::layers::{decode_layers, decode_transport, LinkType};
use crate::scan;
use crate::sip_parser::SipMessage;

/// 抓包元数据
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureInfo {
    pub tsec: u32,
    pub tusec: u32,
    pub link: LinkType,
}

/// 归一化后的报文，交给转发端
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub host: String,
    pub tsec: u32,
    pub tusec: u32,
    pub src_ip: u32,
    pub dst_ip: u32,
    pub sport: u16,
    pub dport: u16,
    pub payload: Vec<u8>,
    /// 不是 SIP 时为空
    pub sip_headers: HashMap<String, Vec<String>>,
}

/// 流水线配置
#[derive(Debug, Clone, Default)]
pub struct DecoderOptions {
    /// 负载包含该字符串的帧直接跳过
    pub payload_filter: Option<String>,
    pub reassembly: bool,
    pub fragment_timeout: Duration,
}

/// 报文解码器，可在多个 worker 之间共享
pub struct Decoder {
    host: String,
    payload_filter: Option<Vec<u8>>,
    defragger: Option<Ipv4Defragmenter>,
}

impl Decoder {
    pub fn new(host: impl Into<String>, options: DecoderOptions) -> Self {
        Self {
            host: host.into(),
            payload_filter: options
                .payload_filter
                .filter(|f| !f.is_empty())
                .map(String::into_bytes),
            defragger: options
                .reassembly
                .then(|| Ipv4Defragmenter::new(options.fragment_timeout)),
        }
    }

    pub fn defragger(&self) -> Option<&Ipv4Defragmenter> {
        self.defragger.as_ref()
    }

    /// 处理一帧，没有感兴趣的传输层负载时返回 `None`
    pub fn process(&self, data: &[u8], ci: &CaptureInfo) -> Option<Packet> {
        let layers = match decode_layers(data, ci.link) {
            Ok(layers) => layers,
            Err(e) => {
                debug!("跳过无法解析的帧: {}", e);
                return None;
            }
        };

        if let (Some(filter), Some(segment)) = (&self.payload_filter, &layers.segment) {
            if scan::contains(&segment.payload, filter) {
                return None;
            }
        }

        let mut segment = layers.segment;
        let (mut src_ip, mut dst_ip) = (0, 0);

        if let Some(ipv4) = layers.ipv4 {
            let ipv4 = match &self.defragger {
                Some(defragger) => {
                    let was_fragment = ipv4.is_fragment();
                    match defragger.defrag(ipv4) {
                        Ok(Some(frame)) => {
                            if was_fragment {
                                debug!("解码重组后的报文，协议 {}", frame.protocol);
                                segment = decode_transport(frame.protocol, &frame.payload);
                            }
                            frame
                        }
                        Ok(None) => {
                            debug!("收到一个分片");
                            return None;
                        }
                        Err(e) => {
                            error!("分片重组失败: {}", e);
                            return None;
                        }
                    }
                }
                None => ipv4,
            };
            src_ip = u32::from(ipv4.src);
            dst_ip = u32::from(ipv4.dst);
        }

        let segment = segment?;
        let sip_headers = match SipMessage::decode(&segment.payload) {
            Ok(message) => message.into_headers(),
            Err(e) => {
                debug!("不是 SIP 负载: {}", e);
                HashMap::new()
            }
        };

        Some(Packet {
            host: self.host.clone(),
            tsec: ci.tsec,
            tusec: ci.tusec,
            src_ip,
            dst_ip,
            sport: segment.sport,
            dport: segment.dport,
            payload: segment.payload,
            sip_headers,
        })
    }
}

//! 关联引擎
//!
//! 把 RTCP、日志行、NG 控制报文关联回建立它们的 SIP 对话（Call-ID）。
//! 所有启发式提取失败都返回 `None`（没有关联），不是错误；只有缓存写入
//! 失败才记 warn 日志。

use std::net::Ipv4Addr;
use std::sync::Arc;

use log::{debug, warn};

use crate::cache::{CorrelationCaches, RTCP_TTL, SDP_TTL, SIP_TTL};
use crate::decoder::Packet;
use crate::ng::{BencodeNgDecoder, NgDecoder};
use crate::rtcp::{looks_like_rtcp, RtcpDecoder, RtcpReportDecoder};
use crate::scan::{self, find_field, Field};

/// 转发端使用的记录类型编码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    NoMatch = 0,
    Rtcp = 5,
    Log = 100,
}

impl RecordType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// 一次成功的关联
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub payload: Vec<u8>,
    pub correlation_id: Vec<u8>,
    pub record_type: RecordType,
}

/// 从 SDP 中提取出的 媒体地址 -> Call-ID 绑定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpBinding {
    /// SDP IP 与 RTCP 端口直接拼接，例如 "10.0.0.530001"
    pub key: Vec<u8>,
    pub call_id: Vec<u8>,
}

/// 哪些端口上的流量按 NG / 日志处理
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortRoles {
    pub ng_port: Option<u16>,
    pub log_port: Option<u16>,
}

impl PortRoles {
    fn matches(port: Option<u16>, packet: &Packet) -> bool {
        port.is_some_and(|p| p == packet.sport || p == packet.dport)
    }
}

// 按顺序尝试，第一个出现的标记决定结果；格式不对直接放弃
const CALL_ID_MARKERS: [(&[u8], usize); 3] = [
    // "Call-ID: a"
    (b"Call-ID: " as &[u8], 10),
    // "Call-ID:a"
    (b"Call-ID:" as &[u8], 9),
    // "i: a"
    (b"i: " as &[u8], 4),
];

/// 从 SIP 报文中提取 SDP 媒体地址和 Call-ID。
///
/// 只处理同时包含 "c=IN IP" 和 "m=audio " 的报文。有 `a=rtcp:` 属性时用它作为
/// RTCP 端口，否则把 `m=audio` 端口的最后一个字节加一（RTCP = RTP + 1）。
/// 任何一步格式不对都返回 `None`。
pub fn extract_sdp_binding(payload: &[u8]) -> Option<SdpBinding> {
    if !scan::contains(payload, b"c=IN IP") || !scan::contains(payload, b"m=audio ") {
        return None;
    }

    // "c=IN IP4 1.1.1.1" 最短 16 字节
    let ip = match find_field(payload, b"c=IN IP", b"\r\n", 16) {
        Field::Found(value) => &value[2..],
        _ => {
            debug!("SDP 中的 IP 不完整或格式异常");
            return None;
        }
    };

    let port = match find_field(payload, b"a=rtcp:", b"\r\n", 11) {
        // "a=rtcp:1000"，后面可能跟 " IN IP4 ..."
        Field::Found(value) => value.split(|b| *b == b' ').next().unwrap_or(value).to_vec(),
        Field::Malformed => {
            debug!("SDP 中的 RTCP 端口不完整或格式异常");
            return None;
        }
        Field::Missing => match find_field(payload, b"m=audio ", b" RTP", 12) {
            // "m=audio 1000"
            Field::Found(value) => {
                let mut port = value.to_vec();
                if let Some(last) = port.last_mut() {
                    *last = last.wrapping_add(1);
                }
                port
            }
            _ => {
                debug!("SDP 中的 RTP 端口不完整或格式异常");
                return None;
            }
        },
    };

    let mut call_id = None;
    for (marker, min_len) in CALL_ID_MARKERS {
        match find_field(payload, marker, b"\r\n", min_len) {
            Field::Found(value) => {
                call_id = Some(value);
                break;
            }
            Field::Malformed => {
                debug!("Call-ID 不完整或格式异常");
                return None;
            }
            Field::Missing => {}
        }
    }
    let Some(call_id) = call_id else {
        warn!("SIP 报文中没有 Call-ID: '{}'", String::from_utf8_lossy(payload));
        return None;
    };

    let mut key = Vec::with_capacity(ip.len() + port.len());
    key.extend_from_slice(ip);
    key.extend_from_slice(&port);
    Some(SdpBinding {
        key,
        call_id: call_id.to_vec(),
    })
}

/// 从任意日志行中提取 Call-ID。
///
/// 支持两种形式：`ID=<value> ` 以及 `: [<value> port ` / `: [<value>]: `。
pub fn extract_log_call_id(payload: &[u8]) -> Option<&[u8]> {
    match find_field(payload, b"ID=", b" ", 4) {
        Field::Found(value) => return Some(value),
        Field::Malformed => {
            let rest = scan::rest_after(payload, b"ID=")?;
            return (8..=64).contains(&rest.len()).then(|| &rest[3..]);
        }
        Field::Missing => {}
    }

    let value = match find_field(payload, b": [", b" port ", 8) {
        Field::Found(value) => value,
        _ => find_field(payload, b": [", b"]: ", 4).found()?,
    };
    (8..=64).contains(&value.len()).then_some(value)
}

/// 关联引擎，多个 worker 共享同一份缓存
pub struct Correlator {
    caches: Arc<CorrelationCaches>,
    rtcp: Box<dyn RtcpDecoder>,
    ng: Box<dyn NgDecoder>,
}

impl Correlator {
    /// 使用内置的 RTCP / NG 解码器
    pub fn new(caches: Arc<CorrelationCaches>) -> Self {
        Self::with_decoders(caches, Box::new(RtcpReportDecoder), Box::new(BencodeNgDecoder))
    }

    pub fn with_decoders(caches: Arc<CorrelationCaches>, rtcp: Box<dyn RtcpDecoder>, ng: Box<dyn NgDecoder>) -> Self {
        Self { caches, rtcp, ng }
    }

    pub fn caches(&self) -> &Arc<CorrelationCaches> {
        &self.caches
    }

    /// 从 SIP/SDP 中取出媒体地址和 Call-ID，写入 SDP 缓存
    pub fn cache_sdp_ip_port(&self, payload: &[u8]) {
        let Some(binding) = extract_sdp_binding(payload) else {
            return;
        };
        debug!(
            "写入 SDP 缓存 key={}, value={}",
            String::from_utf8_lossy(&binding.key),
            String::from_utf8_lossy(&binding.call_id)
        );
        if let Err(e) = self.caches.sdp.set(&binding.key, &binding.call_id, SDP_TTL) {
            warn!("写入 SDP 缓存失败: {}", e);
        }
    }

    /// 关联 RTCP。
    ///
    /// 先用 SSRC 查长期的 RTCP 缓存；查不到再用 源IP+源端口 查短期的 SDP 缓存，
    /// 命中后把 SSRC -> Call-ID 写入 RTCP 缓存，之后同一媒体流直接走 SSRC。
    pub fn correlate_rtcp(&self, src_ip: Ipv4Addr, src_port: u16, payload: &[u8]) -> Option<Correlation> {
        let decoded = self.rtcp.decode(payload);
        if !decoded.info.is_empty() {
            debug!("RTCP 提示 srcIP={}, srcPort={}: {}", src_ip, src_port, decoded.info);
        }
        let report = decoded.report?;

        if let Some(ssrc) = &decoded.ssrc {
            if let Some(call_id) = self.caches.rtcp.get(ssrc) {
                debug!(
                    "RTCP 缓存命中 ssrc={:02x?}, Call-ID={}",
                    ssrc,
                    String::from_utf8_lossy(&call_id)
                );
                return Some(Correlation {
                    payload: report,
                    correlation_id: call_id,
                    record_type: RecordType::Rtcp,
                });
            }
        }

        let key_sdp = format!("{}{}", src_ip, src_port);
        let Some(call_id) = self.caches.sdp.get(key_sdp.as_bytes()) else {
            debug!("没有找到关联 ID srcIP={}, srcPort={}", src_ip, src_port);
            return None;
        };
        debug!("SDP 缓存命中 key={}, Call-ID={}", key_sdp, String::from_utf8_lossy(&call_id));

        if let Some(ssrc) = &decoded.ssrc {
            if let Err(e) = self.caches.rtcp.set(ssrc, &call_id, RTCP_TTL) {
                warn!("写入 RTCP 缓存失败: {}", e);
                return None;
            }
        }

        Some(Correlation {
            payload: report,
            correlation_id: call_id,
            record_type: RecordType::Rtcp,
        })
    }

    /// 关联日志行，成功时返回整行日志
    pub fn correlate_log(&self, payload: &[u8]) -> Option<Correlation> {
        let call_id = extract_log_call_id(payload)?;
        debug!(
            "日志中找到 Call-ID: {}，日志: '{}'",
            String::from_utf8_lossy(call_id),
            String::from_utf8_lossy(payload)
        );
        Some(Correlation {
            payload: payload.to_vec(),
            correlation_id: call_id.to_vec(),
            record_type: RecordType::Log,
        })
    }

    /// 关联 NG 控制报文。
    ///
    /// 带 `call-id` 的报文记录 cookie -> Call-ID；带 `SSRC` 的报文按 cookie 查回 Call-ID，
    /// 返回序列化后的 SSRC 统计。
    pub fn correlate_ng(&self, payload: &[u8]) -> Option<Correlation> {
        let message = match self.ng.decode(payload) {
            Ok(message) => message,
            Err(e) => {
                debug!("NG 报文解码失败: {}", e);
                return None;
            }
        };

        if let Some(call_id) = &message.call_id {
            if let Err(e) = self.caches.sip.set(&message.cookie, call_id, SIP_TTL) {
                warn!("写入 NG 缓存失败: {}", e);
                return None;
            }
        }

        let ssrc = message.ssrc.as_ref()?;
        let data = match serde_json::to_vec(ssrc) {
            Ok(data) => data,
            Err(e) => {
                warn!("序列化 SSRC 统计失败: {}", e);
                return None;
            }
        };
        let call_id = self.caches.sip.get(&message.cookie)?;
        debug!(
            "NG 找到 Call-ID: {}，QoS 统计: {}",
            String::from_utf8_lossy(&call_id),
            String::from_utf8_lossy(&data)
        );
        Some(Correlation {
            payload: data,
            correlation_id: call_id,
            record_type: RecordType::Log,
        })
    }

    /// 按报文内容和端口分发到对应的关联策略
    pub fn correlate_packet(&self, packet: &Packet, roles: &PortRoles) -> Option<Correlation> {
        if !packet.sip_headers.is_empty() {
            self.cache_sdp_ip_port(&packet.payload);
            return None;
        }
        if PortRoles::matches(roles.ng_port, packet) {
            return self.correlate_ng(&packet.payload);
        }
        if PortRoles::matches(roles.log_port, packet) {
            return self.correlate_log(&packet.payload);
        }
        if looks_like_rtcp(&packet.payload) {
            return self.correlate_rtcp(Ipv4Addr::from(packet.src_ip), packet.sport, &packet.payload);
        }
        None
    }
}

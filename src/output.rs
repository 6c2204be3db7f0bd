use std::net::Ipv4Addr;

use log::{debug, info};

use crate::correlator::Correlation;
use crate::decoder::Packet;

/// 转发端：把归一化报文和关联结果交给采集后端
pub trait Forwarder: Send + Sync {
    fn forward_packet(&self, packet: &Packet);

    fn forward_correlation(&self, packet: &Packet, correlation: &Correlation);
}

/// 只写日志的转发端
#[derive(Debug, Default, Clone, Copy)]
pub struct LogForwarder;

impl Forwarder for LogForwarder {
    fn forward_packet(&self, packet: &Packet) {
        let src = Ipv4Addr::from(packet.src_ip);
        let dst = Ipv4Addr::from(packet.dst_ip);
        match packet.sip_headers.get("call-id").and_then(|v| v.first()) {
            Some(call_id) => info!(
                "SIP {}:{} -> {}:{}, Call-ID: {}, {} 字节",
                src,
                packet.sport,
                dst,
                packet.dport,
                call_id,
                packet.payload.len()
            ),
            None => debug!(
                "{}:{} -> {}:{}, {} 字节",
                src,
                packet.sport,
                dst,
                packet.dport,
                packet.payload.len()
            ),
        }
    }

    fn forward_correlation(&self, packet: &Packet, correlation: &Correlation) {
        info!(
            "【关联】类型 {}, Call-ID: {}, 来源 {}:{}, 数据: {}",
            correlation.record_type.code(),
            String::from_utf8_lossy(&correlation.correlation_id),
            Ipv4Addr::from(packet.src_ip),
            packet.sport,
            String::from_utf8_lossy(&correlation.payload)
        );
    }
}

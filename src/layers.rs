//! 链路层到传输层的解码，底层由 etherparse 完成，这里只转换成流水线需要的结构

use std::net::Ipv4Addr;

use etherparse::{IpNumber, NetSlice, SlicedPacket, TcpSlice, TransportSlice, UdpSlice};

use crate::error::LayerError;

/// 抓包数据的链路层类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkType {
    Ethernet,
    RawIp,
    LinuxSll,
}

/// IPv4 报文（头部字段 + 负载）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Frame {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub protocol: u8,
    pub identification: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    /// 分片偏移，单位为字节
    pub fragment_offset: usize,
    pub header_len: usize,
    pub total_len: u16,
    pub payload: Vec<u8>,
}

impl Ipv4Frame {
    pub fn is_fragment(&self) -> bool {
        self.more_fragments || self.fragment_offset != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Udp,
    Tcp,
}

/// UDP / TCP 段
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: TransportKind,
    pub sport: u16,
    pub dport: u16,
    pub payload: Vec<u8>,
}

/// 一帧解码后的各层
#[derive(Debug, Default)]
pub struct Layers {
    pub ipv4: Option<Ipv4Frame>,
    pub segment: Option<Segment>,
}

/// 解码一帧数据
pub fn decode_layers(data: &[u8], link: LinkType) -> Result<Layers, LayerError> {
    let sliced = match link {
        LinkType::Ethernet => SlicedPacket::from_ethernet(data).map_err(|e| LayerError::Slice(e.to_string()))?,
        LinkType::RawIp => SlicedPacket::from_ip(data).map_err(|e| LayerError::Slice(e.to_string()))?,
        LinkType::LinuxSll => SlicedPacket::from_linux_sll(data).map_err(|e| LayerError::Slice(e.to_string()))?,
    };

    let ipv4 = match &sliced.net {
        Some(NetSlice::Ipv4(ipv4)) => {
            let header = ipv4.header();
            Some(Ipv4Frame {
                src: header.source_addr(),
                dst: header.destination_addr(),
                protocol: header.protocol().0,
                identification: header.identification(),
                dont_fragment: header.dont_fragment(),
                more_fragments: header.more_fragments(),
                fragment_offset: usize::from(header.fragments_offset().value()) * 8,
                header_len: header.slice().len(),
                total_len: header.total_len(),
                payload: ipv4.payload().payload.to_vec(),
            })
        }
        _ => None,
    };

    // 分片报文 etherparse 不会解析传输层，由重组后再分发
    let segment = match &sliced.transport {
        Some(TransportSlice::Udp(udp)) => Some(Segment {
            kind: TransportKind::Udp,
            sport: udp.source_port(),
            dport: udp.destination_port(),
            payload: udp.payload().to_vec(),
        }),
        Some(TransportSlice::Tcp(tcp)) => Some(Segment {
            kind: TransportKind::Tcp,
            sport: tcp.source_port(),
            dport: tcp.destination_port(),
            payload: tcp.payload().to_vec(),
        }),
        _ => None,
    };

    Ok(Layers { ipv4, segment })
}

/// 按 IP 协议号把重组后的负载重新交给传输层解码
pub fn decode_transport(protocol: u8, payload: &[u8]) -> Option<Segment> {
    if protocol == IpNumber::UDP.0 {
        let udp = UdpSlice::from_slice(payload).ok()?;
        Some(Segment {
            kind: TransportKind::Udp,
            sport: udp.source_port(),
            dport: udp.destination_port(),
            payload: udp.payload().to_vec(),
        })
    } else if protocol == IpNumber::TCP.0 {
        let tcp = TcpSlice::from_slice(payload).ok()?;
        Some(Segment {
            kind: TransportKind::Tcp,
            sport: tcp.source_port(),
            dport: tcp.destination_port(),
            payload: tcp.payload().to_vec(),
        })
    } else {
        None
    }
}

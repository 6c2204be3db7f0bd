//! RTCP 解码边界
//!
//! 关联引擎只需要 SSRC 和一段 JSON 报告。`RtcpDecoder` 可以替换成外部解码器，
//! 内置的 `RtcpReportDecoder` 只处理 SR / RR，其它类型跳过。

use serde::Serialize;

pub const RTCP_SR: u8 = 200;
pub const RTCP_RR: u8 = 201;
pub const RTCP_SDES: u8 = 202;
pub const RTCP_BYE: u8 = 203;
pub const RTCP_APP: u8 = 204;
pub const RTCP_XR: u8 = 207;

const HEADER_LEN: usize = 4;
const REPORT_BLOCK_LEN: usize = 24;
const SENDER_INFO_LEN: usize = 20;

/// RTCP 解码结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RtcpDecoded {
    /// SSRC（4 字节，大端），作为 RTCP 缓存的 key
    pub ssrc: Option<Vec<u8>>,
    /// JSON 报告，`None` 表示解码失败
    pub report: Option<Vec<u8>>,
    /// 提示信息，成功时也可能非空
    pub info: String,
}

pub trait RtcpDecoder: Send + Sync {
    fn decode(&self, payload: &[u8]) -> RtcpDecoded;
}

/// 粗略判断负载是否为 RTCP：版本 2，包类型 200..=207
pub fn looks_like_rtcp(payload: &[u8]) -> bool {
    payload.len() >= 8 && payload[0] >> 6 == 2 && (RTCP_SR..=RTCP_XR).contains(&payload[1])
}

#[derive(Debug, Default, Serialize)]
struct SenderInformation {
    ntp_timestamp_sec: u32,
    ntp_timestamp_usec: u32,
    rtp_timestamp: u32,
    packets: u32,
    octets: u32,
}

#[derive(Debug, Serialize)]
struct ReportBlock {
    source_ssrc: u32,
    fraction_lost: u8,
    packets_lost: u32,
    highest_seq_no: u32,
    ia_jitter: u32,
    lsr: u32,
    dlsr: u32,
}

#[derive(Debug, Default, Serialize)]
struct RtcpReport {
    sender_information: SenderInformation,
    ssrc: u32,
    #[serde(rename = "type")]
    packet_type: u8,
    report_count: u8,
    report_blocks: Vec<ReportBlock>,
}

/// 内置 SR/RR 解码器
#[derive(Debug, Default, Clone, Copy)]
pub struct RtcpReportDecoder;

impl RtcpDecoder for RtcpReportDecoder {
    fn decode(&self, payload: &[u8]) -> RtcpDecoded {
        let mut decoded = RtcpDecoded::default();
        let mut report: Option<RtcpReport> = None;
        let mut infos: Vec<String> = Vec::new();
        let mut pos = 0;

        while payload.len() - pos >= HEADER_LEN {
            let header = &payload[pos..];
            let version = header[0] >> 6;
            let count = header[0] & 0x1f;
            let packet_type = header[1];
            let length = (usize::from(u16::from_be_bytes([header[2], header[3]])) + 1) * 4;

            if version != 2 {
                infos.push(format!("Fishy RTCP version {} at offset {}", version, pos));
                break;
            }
            if length > header.len() {
                infos.push(format!("Truncated RTCP packet type {} at offset {}", packet_type, pos));
                break;
            }
            let body = &header[HEADER_LEN..length];

            if decoded.ssrc.is_none() && body.len() >= 4 {
                decoded.ssrc = Some(body[..4].to_vec());
            }

            match packet_type {
                RTCP_SR | RTCP_RR if report.is_none() => match parse_report(packet_type, count, body) {
                    Some(parsed) => report = Some(parsed),
                    None => infos.push(format!("Fishy RTCP report type {}", packet_type)),
                },
                RTCP_SR | RTCP_RR | RTCP_SDES | RTCP_BYE | RTCP_APP | RTCP_XR => {}
                other => infos.push(format!("Discarded unknown RTCP packet type {}", other)),
            }

            pos += length;
        }

        decoded.report = report.and_then(|r| serde_json::to_vec(&r).ok());
        decoded.info = infos.join("; ");
        decoded
    }
}

fn parse_report(packet_type: u8, count: u8, body: &[u8]) -> Option<RtcpReport> {
    let mut report = RtcpReport {
        ssrc: read_u32(body, 0)?,
        packet_type,
        report_count: count,
        ..Default::default()
    };

    let mut offset = 4;
    if packet_type == RTCP_SR {
        report.sender_information = SenderInformation {
            ntp_timestamp_sec: read_u32(body, offset)?,
            ntp_timestamp_usec: read_u32(body, offset + 4)?,
            rtp_timestamp: read_u32(body, offset + 8)?,
            packets: read_u32(body, offset + 12)?,
            octets: read_u32(body, offset + 16)?,
        };
        offset += SENDER_INFO_LEN;
    }

    for _ in 0..count {
        let block = body.get(offset..offset + REPORT_BLOCK_LEN)?;
        report.report_blocks.push(ReportBlock {
            source_ssrc: read_u32(block, 0)?,
            fraction_lost: block[4],
            packets_lost: u32::from_be_bytes([0, block[5], block[6], block[7]]),
            highest_seq_no: read_u32(block, 8)?,
            ia_jitter: read_u32(block, 12)?,
            lsr: read_u32(block, 16)?,
            dlsr: read_u32(block, 20)?,
        });
        offset += REPORT_BLOCK_LEN;
    }

    Some(report)
}

fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 构造一个带一个报告块的 RR
    pub(crate) fn receiver_report(ssrc: u32) -> Vec<u8> {
        let mut packet = vec![0x81, RTCP_RR, 0x00, 0x07];
        packet.extend_from_slice(&ssrc.to_be_bytes());
        packet.extend_from_slice(&0x1122_3344u32.to_be_bytes());
        packet.extend_from_slice(&[5, 0, 0, 3]);
        packet.extend_from_slice(&1000u32.to_be_bytes());
        packet.extend_from_slice(&42u32.to_be_bytes());
        packet.extend_from_slice(&0u32.to_be_bytes());
        packet.extend_from_slice(&0u32.to_be_bytes());
        packet
    }

    #[test]
    fn test_receiver_report() {
        let decoded = RtcpReportDecoder.decode(&receiver_report(9999));
        assert_eq!(decoded.ssrc, Some(9999u32.to_be_bytes().to_vec()));
        assert!(decoded.info.is_empty());
        let json: serde_json::Value = serde_json::from_slice(&decoded.report.unwrap()).unwrap();
        assert_eq!(json["ssrc"], 9999);
        assert_eq!(json["type"], 201);
        assert_eq!(json["report_blocks"][0]["source_ssrc"], 0x1122_3344);
        assert_eq!(json["report_blocks"][0]["packets_lost"], 3);
        assert_eq!(json["report_blocks"][0]["ia_jitter"], 42);
    }

    #[test]
    fn test_sender_report_with_sdes() {
        let mut packet = vec![0x80, RTCP_SR, 0x00, 0x06];
        packet.extend_from_slice(&7u32.to_be_bytes());
        for value in [1u32, 2, 3, 4, 5] {
            packet.extend_from_slice(&value.to_be_bytes());
        }
        // SDES，只带 SSRC 和结束符
        packet.extend_from_slice(&[0x81, RTCP_SDES, 0x00, 0x02]);
        packet.extend_from_slice(&7u32.to_be_bytes());
        packet.extend_from_slice(&[0, 0, 0, 0]);

        let decoded = RtcpReportDecoder.decode(&packet);
        assert!(decoded.info.is_empty());
        let json: serde_json::Value = serde_json::from_slice(&decoded.report.unwrap()).unwrap();
        assert_eq!(json["sender_information"]["packets"], 4);
        assert_eq!(json["report_count"], 0);
    }

    #[test]
    fn test_unknown_type_is_advisory() {
        let mut packet = receiver_report(1);
        packet.extend_from_slice(&[0x80, 210, 0x00, 0x01, 0, 0, 0, 1]);
        let decoded = RtcpReportDecoder.decode(&packet);
        assert!(decoded.report.is_some());
        assert!(decoded.info.contains("unknown RTCP packet type 210"));
    }

    #[test]
    fn test_bad_version_has_no_report() {
        let mut packet = receiver_report(1);
        packet[0] = 0x41;
        let decoded = RtcpReportDecoder.decode(&packet);
        assert!(decoded.report.is_none());
        assert!(!decoded.info.is_empty());
    }

    #[test]
    fn test_looks_like_rtcp() {
        assert!(looks_like_rtcp(&receiver_report(1)));
        assert!(!looks_like_rtcp(b"INVITE sip:a@b SIP/2.0"));
        // RTP 负载类型 0
        assert!(!looks_like_rtcp(&[0x80, 0x00, 0x00, 0x01, 0, 0, 0, 0]));
    }
}

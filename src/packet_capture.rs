use log::{debug, error};
use pcap::{Active, Capture, Device};

use crate::config::Config;
use crate::decoder::CaptureInfo;
use crate::error::CaptureError;
use crate::layers::LinkType;

// DLT_* 编号
const DLT_EN10MB: i32 = 1;
const DLT_RAW: i32 = 12;
const DLT_LINKTYPE_RAW: i32 = 101;
const DLT_LINUX_SLL: i32 = 113;
const DLT_IPV4: i32 = 228;

/// 数据包捕获器
pub struct PacketCapture {
    capture: Capture<Active>,
    link: LinkType,
}

impl PacketCapture {
    /// 打开网络接口进行抓包
    pub fn open(config: &Config) -> Result<Self, CaptureError> {
        let open_err = |source: pcap::Error| CaptureError::Open {
            interface: config.interface.clone(),
            source,
        };
        let mut capture = Capture::from_device(config.interface.as_str())
            .map_err(open_err)?
            .promisc(true)
            .snaplen(config.snaplen)
            .timeout(1000)
            .open()
            .map_err(open_err)?;

        capture
            .filter(&config.bpf_filter, true)
            .map_err(|source| CaptureError::Filter {
                filter: config.bpf_filter.clone(),
                source,
            })?;

        let datalink = capture.get_datalink();
        let link = match datalink.0 {
            DLT_EN10MB => LinkType::Ethernet,
            DLT_LINUX_SLL => LinkType::LinuxSll,
            DLT_RAW | DLT_LINKTYPE_RAW | DLT_IPV4 => LinkType::RawIp,
            other => {
                // 未知链路类型按以太网尝试
                debug!("未知链路类型 {}，按以太网处理", other);
                LinkType::Ethernet
            }
        };
        debug!("接口 {} 链路类型 {:?}", config.interface, link);

        Ok(Self { capture, link })
    }

    /// 获取下一个数据包，超时返回 `Ok(None)`
    pub fn next_packet(&mut self) -> Result<Option<(CaptureInfo, Vec<u8>)>, CaptureError> {
        match self.capture.next_packet() {
            Ok(packet) => {
                let ci = CaptureInfo {
                    tsec: packet.header.ts.tv_sec as u32,
                    tusec: packet.header.ts.tv_usec as u32,
                    link: self.link,
                };
                Ok(Some((ci, packet.data.to_vec())))
            }
            // 超时是正常的，继续等待
            Err(pcap::Error::TimeoutExpired) => Ok(None),
            Err(e) => {
                error!("抓包错误: {}", e);
                Err(CaptureError::Read(e))
            }
        }
    }

    /// 列出所有可用的网络接口
    pub fn list_interfaces() -> Vec<String> {
        match Device::list() {
            Ok(devices) => devices.iter().map(|d| d.name.clone()).collect(),
            Err(_) => vec![],
        }
    }
}

impl Drop for PacketCapture {
    fn drop(&mut self) {
        debug!("关闭数据包捕获器");
    }
}

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

use sipprobe::config::Config;
use sipprobe::output::{Forwarder, LogForwarder};
use sipprobe::packet_capture::PacketCapture;
use sipprobe::{CaptureInfo, CorrelationCaches, Correlator, Decoder, PortRoles};

type Frame = (CaptureInfo, Vec<u8>);

fn main() {
    if let Err(e) = run() {
        error!("{:#}", e);
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    // 第一个参数是配置文件路径，可省略
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;

    env_logger::Builder::from_default_env()
        .parse_filters(&config.log_level)
        .init();

    info!("SIP 探针启动");

    // 抓包需要 root 权限
    if !is_root() {
        error!("此程序需要 root 权限才能抓包");
        eprintln!("请使用 sudo 运行此程序");
        std::process::exit(1);
    }

    info!("使用网络接口: {}", config.interface);
    info!("分片重组: {}", if config.reassembly { "开启" } else { "关闭" });

    let mut capture = match PacketCapture::open(&config) {
        Ok(cap) => cap,
        Err(e) => {
            error!("{}", e);
            eprintln!("可用接口: {:?}", PacketCapture::list_interfaces());
            std::process::exit(1);
        }
    };

    let host = config.hostname.clone().unwrap_or_else(system_hostname);
    let decoder = Arc::new(Decoder::new(host, config.decoder_options()));
    let caches = Arc::new(CorrelationCaches::new());
    let correlator = Arc::new(Correlator::new(Arc::clone(&caches)));
    let forwarder: Arc<dyn Forwarder> = Arc::new(LogForwarder);
    let roles = config.port_roles();

    let mut senders: Vec<SyncSender<Frame>> = Vec::with_capacity(config.workers);
    for id in 0..config.workers {
        let (tx, rx) = mpsc::sync_channel(config.queue_depth);
        senders.push(tx);
        let decoder = Arc::clone(&decoder);
        let correlator = Arc::clone(&correlator);
        let forwarder = Arc::clone(&forwarder);
        thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || worker_loop(rx, &decoder, &correlator, forwarder.as_ref(), roles))
            .context("无法启动 worker 线程")?;
    }

    {
        let decoder = Arc::clone(&decoder);
        let caches = Arc::clone(&caches);
        let interval = config.sweep_interval();
        thread::Builder::new()
            .name("sweeper".to_string())
            .spawn(move || loop {
                thread::sleep(interval);
                let expired = caches.purge_expired();
                let stale = decoder.defragger().map_or(0, |d| d.discard_expired());
                if expired > 0 || stale > 0 {
                    debug!("清理过期缓存 {} 条，超时分片 {} 组", expired, stale);
                }
            })
            .context("无法启动清理线程")?;
    }

    info!("开始监控 SIP 流量...");

    let dropped = AtomicU64::new(0);
    let mut next = 0usize;
    loop {
        match capture.next_packet() {
            Ok(Some(frame)) => {
                match senders[next].try_send(frame) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        let count = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        if count % 1000 == 1 {
                            warn!("worker 队列已满，已丢弃 {} 个数据包", count);
                        }
                    }
                    Err(TrySendError::Disconnected(_)) => {
                        anyhow::bail!("worker-{} 已退出", next);
                    }
                }
                next = (next + 1) % senders.len();
            }
            Ok(None) => {
                // 超时，继续等待
            }
            Err(e) => {
                error!("{}", e);
                thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

fn worker_loop(
    rx: Receiver<Frame>,
    decoder: &Decoder,
    correlator: &Correlator,
    forwarder: &dyn Forwarder,
    roles: PortRoles,
) {
    for (ci, data) in rx {
        let Some(packet) = decoder.process(&data, &ci) else {
            continue;
        };
        forwarder.forward_packet(&packet);
        if let Some(correlation) = correlator.correlate_packet(&packet, &roles) {
            forwarder.forward_correlation(&packet, &correlation);
        }
    }
}

/// 系统主机名，获取失败时为空
fn system_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// 检查是否有 root 权限
fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        true
    }
}

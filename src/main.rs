use std::fs::File;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use lan_probe::logging::{self, LogConfig};
use lan_probe::scanner::{PortScanOptions, PortScanner, DEFAULT_PORT_TIMEOUT};
use lan_probe::subnet::{HostScanOptions, SubnetScanner, DEFAULT_HOST_TIMEOUT};
use lan_probe::types::{HostResult, HostScanEvent, PortResult, PortScanEvent, ScanProgress, SubnetPrefix};
use lan_probe::{netdetect, netinfo, ports, server};

/// Bounded-concurrency LAN discovery: TCP connect port scans and ping sweeps.
#[derive(Debug, Parser)]
#[command(name = "lan-probe", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Per-probe timeout in milliseconds (default: 100 for ports, 1000 for hosts).
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Max probes in flight at once.
    #[arg(long, global = true, default_value_t = 50)]
    concurrency: usize,

    /// Write the final result as pretty JSON to this path.
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG overrides).
    #[arg(short, long, global = true, default_value_t = false)]
    verbose: bool,

    /// Log as JSON lines.
    #[arg(long = "log-json", global = true, default_value_t = false)]
    log_json: bool,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// TCP connect scan over a port range on one host.
    Ports {
        /// Host to scan.
        #[arg(long)]
        target: IpAddr,

        /// Inclusive port range, e.g. `1-1024`, or a single port.
        #[arg(long, default_value = "1-100")]
        range: String,

        /// Re-run the scan every N seconds until Ctrl+C.
        #[arg(long)]
        watch: Option<u64>,
    },
    /// Ping sweep over host numbers of a /24.
    Hosts {
        /// `a.b.c` or any address in the /24. Auto-detected if omitted.
        #[arg(long)]
        prefix: Option<String>,

        /// Inclusive host-number range, e.g. `1-254`.
        #[arg(long, default_value = "1-254")]
        range: String,

        /// Skip reverse DNS.
        #[arg(long = "no-dns", default_value_t = false)]
        no_dns: bool,

        /// Skip neighbor-cache MAC lookups.
        #[arg(long = "no-arp", default_value_t = false)]
        no_arp: bool,
    },
    /// Local IPv4 interfaces with DHCP details.
    Interfaces,
    /// Current Wi-Fi connection, or nearby networks with `--scan`.
    Wifi {
        #[arg(long, default_value_t = false)]
        scan: bool,
    },
    /// Serve the HTTP API and static UI.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(LogConfig::new().verbose(cli.verbose).json(cli.log_json));

    match &cli.command {
        Command::Ports { target, range, watch } => {
            let (start, end) = ports::parse_port_range(range)
                .with_context(|| format!("bad --range {range:?}"))?;
            let options = PortScanOptions {
                timeout: timeout_or(cli.timeout_ms, DEFAULT_PORT_TIMEOUT),
                max_concurrency: cli.concurrency,
            };
            run_ports(&cli, *target, start, end, options, *watch).await
        }
        Command::Hosts { prefix, range, no_dns, no_arp } => {
            let prefix = match prefix {
                Some(p) => p.parse::<SubnetPrefix>().with_context(|| format!("bad --prefix {p:?}"))?,
                None => {
                    let ifaces = netdetect::local_interfaces()?;
                    netdetect::default_prefix(&ifaces)
                        .context("no local IPv4 interface found; pass --prefix")?
                }
            };
            let (start, end) = ports::parse_host_range(range)
                .with_context(|| format!("bad --range {range:?}"))?;
            let options = HostScanOptions {
                timeout: timeout_or(cli.timeout_ms, DEFAULT_HOST_TIMEOUT),
                max_concurrency: cli.concurrency,
                resolve_hostnames: !no_dns,
                lookup_macs: !no_arp,
                ..HostScanOptions::default()
            };
            run_hosts(&cli, prefix, start, end, options).await
        }
        Command::Interfaces => {
            let ifaces = netdetect::local_interfaces()?;
            if ifaces.is_empty() {
                println!("No network interface found");
            }
            for iface in &ifaces {
                println!(
                    "{:<12} {:<15} {:<18} DHCP: {}",
                    iface.name,
                    iface.ip,
                    iface.network(),
                    netinfo::dhcp_info(&iface.name)
                );
            }
            write_json_if(cli.output.as_deref(), &ifaces)
        }
        Command::Wifi { scan } => {
            if *scan {
                let networks = netinfo::scan_wifi();
                print_wifi_table(&networks);
                write_json_if(cli.output.as_deref(), &networks)
            } else {
                let current = netinfo::current_wifi();
                if current.is_empty() {
                    println!("Wi-Fi: Not connected");
                } else {
                    println!("Wi-Fi: {}", current.join(" | "));
                }
                write_json_if(cli.output.as_deref(), &current)
            }
        }
        Command::Serve { bind } => {
            println!("UI server starting at http://{bind} (Ctrl+C to stop)");
            tokio::select! {
                res = server::spawn_server(bind) => res,
                _ = tokio::signal::ctrl_c() => Ok(()),
            }
        }
    }
}

fn timeout_or(ms: Option<u64>, default: Duration) -> Duration {
    ms.map(Duration::from_millis).unwrap_or(default)
}

async fn run_ports(
    cli: &Cli,
    target: IpAddr,
    start: u16,
    end: u16,
    options: PortScanOptions,
    watch: Option<u64>,
) -> Result<()> {
    let scanner = PortScanner::new(options);
    loop {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let PortScanEvent::Progress(p) = event {
                    print_progress(p);
                }
            }
            eprintln!();
        });
        let result = scanner.scan(target, start, end, Some(&tx)).await;
        drop(tx);
        let _ = printer.await;

        print_port_table(target, &result);
        write_json_if(cli.output.as_deref(), &result)?;

        let Some(secs) = watch else {
            return Ok(());
        };
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

async fn run_hosts(
    cli: &Cli,
    prefix: SubnetPrefix,
    start: u8,
    end: u8,
    options: HostScanOptions,
) -> Result<()> {
    let scanner = SubnetScanner::new(options);
    let (tx, mut rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                HostScanEvent::Progress(p) => print_progress(p),
                HostScanEvent::HostFound(h) => eprintln!("\rfound {:<15} {:>5} ms  {}", h.ip, h.response_time_ms, h.ports_display()),
                HostScanEvent::Complete(_) => {}
            }
        }
        eprintln!();
    });
    let hosts = scanner.scan(prefix, start, end, Some(&tx)).await;
    drop(tx);
    let _ = printer.await;

    print_host_table(prefix, &hosts);
    write_json_if(cli.output.as_deref(), &hosts)
}

fn print_progress(p: ScanProgress) {
    let mut err = std::io::stderr();
    let _ = write!(err, "\rscanned {}/{} ({:.0}%)", p.scanned, p.total, p.percent());
    let _ = err.flush();
}

fn print_port_table(target: IpAddr, result: &PortResult) {
    println!(
        "\n{}: {} open of {} scanned",
        target,
        result.open_count(),
        result.len()
    );
    println!("{:>5}  {:<6}  {:<12}", "port", "state", "service");
    println!("{:-<5}  {:-<6}  {:-<12}", "", "", "");
    for port in result.open_ports() {
        println!("{:>5}  {:<6}  {:<12}", port, "open", ports::service_name(port));
    }
}

fn print_host_table(prefix: SubnetPrefix, hosts: &[HostResult]) {
    let mut name_w = "hostname".len();
    for h in hosts {
        if let Some(n) = &h.hostname {
            name_w = name_w.max(n.len().min(40));
        }
    }
    println!("\n{}.0/24: {} hosts alive", prefix, hosts.len());
    println!(
        "{:<15}  {:<name_w$}  {:<17}  {:>7}  {}",
        "ip", "hostname", "mac", "rtt_ms", "ports",
        name_w = name_w
    );
    println!(
        "{:-<15}  {:-<name_w$}  {:-<17}  {:-<7}  {:-<5}",
        "", "", "", "", "",
        name_w = name_w
    );
    for h in hosts {
        let mut name = h.hostname.clone().unwrap_or_default();
        name.truncate(40);
        println!(
            "{:<15}  {:<name_w$}  {:<17}  {:>7}  {}",
            h.ip,
            name,
            h.mac.as_deref().unwrap_or(""),
            h.response_time_ms,
            h.ports_display(),
            name_w = name_w
        );
    }
}

fn print_wifi_table(networks: &[netinfo::WifiNetwork]) {
    if networks.is_empty() {
        println!("  No Wi-Fi networks found");
        return;
    }
    println!("  {:<32} {:<4} {:>6}  {:>3}  SECURITY", "SSID", "", "SIGNAL", "CH");
    println!("  {}", "-".repeat(65));
    for n in networks {
        println!(
            "  {:<32} {} {:>6}  {:>3}  {}",
            n.ssid,
            netinfo::signal_bar(n.rssi()),
            n.signal,
            n.channel,
            n.security
        );
    }
}

fn write_json_if<T: Serialize + ?Sized>(path: Option<&Path>, value: &T) -> Result<()> {
    let Some(path) = path else {
        return Ok(());
    };
    match write_results_json(path, value) {
        Ok(()) => println!("Wrote JSON results to {}", path.display()),
        Err(e) => warn!(path = %path.display(), error = %e, "failed to write JSON"),
    }
    Ok(())
}

fn write_results_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
    serde_json::to_writer_pretty(file, value)?;
    Ok(())
}

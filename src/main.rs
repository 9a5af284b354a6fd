use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use modbus_engine::{
    start_http_server, AsciiTransport, ClientErrorKind, EngineConfig, InMemoryRegisters,
    ModbusClient, ModbusError, ModbusServer, RtuTransport, StaticIdentity, TcpTransport,
};

#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Args)]
struct CommonArgs {
    /// Path to the config file
    #[arg(short, long, default_value = "config/default.yaml")]
    config: PathBuf,

    /// Dump default config and exit
    #[arg(long = "dump-default-config")]
    dump_default: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the TCP/RTU/ASCII server (default if no subcommand is given).
    Serve,
    /// Issue a single master request against a TCP server and print the result.
    ReadHoldingRegisters {
        #[arg(long)]
        addr: String,
        #[arg(long, default_value_t = 1)]
        unit: u8,
        #[arg(long)]
        start: u16,
        #[arg(long)]
        count: u16,
    },
    WriteSingleRegister {
        #[arg(long)]
        addr: String,
        #[arg(long, default_value_t = 1)]
        unit: u8,
        #[arg(long)]
        register: u16,
        #[arg(long)]
        value: u16,
    },
}

fn load_config(common: &CommonArgs) -> Result<EngineConfig, Box<dyn std::error::Error>> {
    if common.config.exists() {
        info!("loading config from {}", common.config.display());
        Ok(EngineConfig::from_file(common.config.clone())?)
    } else {
        info!("config file not found, using defaults");
        Ok(EngineConfig::default())
    }
}

fn init_logging(config: &modbus_engine::LoggingConfig) {
    use tracing_subscriber::EnvFilter;

    let mut filter = EnvFilter::default().add_directive(config.get_level_filter().into());
    if config.trace_frames {
        filter = filter
            .add_directive("modbus_engine::server=trace".parse().unwrap())
            .add_directive("modbus_engine::client=trace".parse().unwrap());
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_thread_ids(config.thread_ids)
        .with_thread_names(config.thread_names)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.common.dump_default {
        let config = EngineConfig::default();
        println!("{}", serde_yaml::to_string(&config)?);
        return Ok(());
    }

    let config = load_config(&cli.common)?;
    init_logging(&config.logging);

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::ReadHoldingRegisters { addr, unit, start, count } => {
            run_read_holding_registers(&config, &addr, unit, start, count).await
        }
        Command::WriteSingleRegister { addr, unit, register, value } => {
            run_write_single_register(&config, &addr, unit, register, value).await
        }
    }
}

async fn run_server(config: EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let identity = Arc::new(StaticIdentity {
        vendor_name: "modbus-engine",
        product_code: env!("CARGO_PKG_NAME"),
        revision: env!("CARGO_PKG_VERSION"),
    });
    let registers = Arc::new(InMemoryRegisters::new(2000, 2000, 125, 125));

    let server = Arc::new(
        ModbusServer::new(config.tcp.any_unit_id, config.tcp.any_unit_id, registers)
            .with_identity(identity)
            .with_trace_frames(config.logging.trace_frames),
    );

    let listener = TcpListener::bind((config.tcp.bind_addr.as_str(), config.tcp.bind_port))?;
    listener.set_nonblocking(true)?;
    let tcp_server = server.clone();
    let tcp_config = config.tcp.clone();
    std::thread::spawn(move || loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                stream.set_nonblocking(false).ok();
                match TcpTransport::from_stream(stream, &tcp_config) {
                    Ok(transport) => {
                        info!(%peer, "accepted TCP connection");
                        tcp_server.add_transport(Box::new(transport));
                    }
                    Err(e) => warn!(error = %e, "failed to wrap accepted connection"),
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                error!(error = %e, "accept failed");
                break;
            }
        }
    });

    match RtuTransport::open(&config.rtu) {
        Ok(transport) => {
            server.add_transport(Box::new(transport));
            info!(device = %config.rtu.device, "RTU transport registered");
        }
        Err(e) => warn!(error = %e, "RTU transport unavailable, continuing without it"),
    }
    match AsciiTransport::open(&config.ascii) {
        Ok(transport) => {
            server.add_transport(Box::new(transport));
            info!(device = %config.ascii.device, "ASCII transport registered");
        }
        Err(e) => warn!(error = %e, "ASCII transport unavailable, continuing without it"),
    }

    let (shutdown_tx, _) = broadcast::channel(1);
    let http_handle = if config.http.enabled {
        let http_server = server.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        Some(tokio::spawn(start_http_server(
            config.http.bind_addr.clone(),
            config.http.bind_port,
            http_server,
            shutdown_rx,
        )))
    } else {
        None
    };

    let dispatcher = server.clone().start();

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    server.stop();
    let _ = shutdown_tx.send(());
    let _ = dispatcher.await;
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }

    Ok(())
}

async fn run_read_holding_registers(
    config: &EngineConfig,
    addr: &str,
    unit: u8,
    start: u16,
    count: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream = std::net::TcpStream::connect(addr)?;
    let transport = TcpTransport::from_stream(stream, &config.tcp)?;
    let client = ModbusClient::new(transport).with_trace_frames(config.logging.trace_frames);

    match client.read_holding_registers(unit, start, count, config.master.default_timeout).await {
        Ok(values) => println!("{values:?}"),
        Err(ModbusError::Exception(kind)) => eprintln!("device returned exception: {kind}"),
        Err(ModbusError::Client { kind: ClientErrorKind::Timeout, .. }) => eprintln!("request timed out"),
        Err(e) => eprintln!("request failed: {e}"),
    }
    Ok(())
}

async fn run_write_single_register(
    config: &EngineConfig,
    addr: &str,
    unit: u8,
    register: u16,
    value: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let stream = std::net::TcpStream::connect(addr)?;
    let transport = TcpTransport::from_stream(stream, &config.tcp)?;
    let client = ModbusClient::new(transport).with_trace_frames(config.logging.trace_frames);

    match client.write_single_register(unit, register, value, config.master.default_timeout).await {
        Ok(()) => println!("ok"),
        Err(e) => eprintln!("request failed: {e}"),
    }
    Ok(())
}

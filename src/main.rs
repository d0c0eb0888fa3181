use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use tftpkit::tftp::client::client_main;
use tftpkit::tftp::server::server_main;

#[derive(Parser, Debug)]
#[command(version, about = "Minimal TFTP client and server")]
struct Opts {
    #[command(subcommand)]
    subcmd: SubCommand,
}

#[derive(Subcommand, Debug)]
enum SubCommand {
    /// Act as a TFTP client.
    Client(ClientArgs),
    /// Act as a TFTP server.
    Server(ServerArgs),
}

#[derive(clap::Args, Debug)]
struct ServerArgs {
    /// IP for the server to use.
    #[arg(short = 'a', long = "address", default_value = "127.0.0.1")]
    address: String,
    /// UDP port that the server will listen on.
    #[arg(short = 'p', long = "port", default_value_t = 69)]
    port: u16,
    /// Directory served to clients.
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,
}

#[derive(clap::Args, Debug)]
struct ClientArgs {
    /// Name of the file to be transferred.
    filename: String,
    /// Upload the file instead of downloading it.
    #[arg(short = 'u', long = "upload")]
    upload: bool,
    /// Server address.
    #[arg(short = 'a', long = "address", default_value = "127.0.0.1")]
    address: String,
    /// Server port.
    #[arg(short = 'p', long = "port", default_value_t = 69)]
    port: u16,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let opts = Opts::parse();
    match opts.subcmd {
        SubCommand::Client(args) => {
            let addr = format!("{}:{}", args.address, args.port);
            if args.upload {
                log::info!("[UPLOAD] FILE: ({}) TO SERVER: {}", args.filename, addr);
            } else {
                log::info!("[DOWNLOAD] FILE: ({}) SERVER: {}", args.filename, addr);
            }

            client_main(&addr, &args.filename, args.upload)
        }
        SubCommand::Server(args) => server_main(&args.address, args.port, &args.dir),
    }
}

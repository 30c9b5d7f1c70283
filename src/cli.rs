use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the chat relay, accepting TCP connections.
    Server(ServerArgs),
    /// Connect to a relay and chat from the terminal.
    Client(ClientArgs),
}

#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    /// Socket address the relay should bind to. Use 0 for an ephemeral port.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub listen: SocketAddr,

    /// Seconds a session may stay silent before it is disconnected.
    #[arg(long, default_value_t = 300)]
    pub idle_timeout_secs: u64,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
    /// Name announced to the relay during the handshake.
    #[arg(long)]
    pub nickname: String,

    /// Address of the relay to connect to.
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub server: SocketAddr,
}

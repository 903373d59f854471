//! Interactive client for the currency exchange server.
//!
//! Reads commands from stdin, sends each as one line and prints the reply.
//! An empty line or `exit` ends the session.

use anyhow::{bail, Context};
use clap::Parser;
use std::net::SocketAddr;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

#[derive(Parser, Debug)]
#[command(name = "currency-client")]
#[command(about = "Interactive client for the currency exchange server")]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    addr: SocketAddr,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let stream = TcpStream::connect(args.addr)
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let (reader, mut writer) = stream.into_split();
    let mut replies = BufReader::new(reader).lines();
    let mut input = BufReader::new(io::stdin()).lines();
    let mut stdout = io::stdout();

    println!("Connected to {}.", args.addr);
    println!("Commands: RATE <FROM> <TO> | CONVERT <AMOUNT> <FROM> <TO> | ATTEMPTS | exit");

    loop {
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;

        let Some(line) = input.next_line().await? else {
            break;
        };
        let request = line.trim();
        if request.is_empty() || request.eq_ignore_ascii_case("exit") {
            break;
        }

        writer.write_all(format!("{}\n", request).as_bytes()).await?;
        match replies.next_line().await? {
            Some(reply) => println!("{}", reply),
            None => bail!("server closed the connection"),
        }
    }

    Ok(())
}

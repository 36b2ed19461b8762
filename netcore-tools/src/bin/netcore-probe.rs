use std::net::SocketAddr;
use std::time::Duration;

use clap::{App, Arg};
use mio::net::TcpStream;
use mio::{Events, Poll, PollOpt, Ready, Token};

const CONNECT_TOKEN: Token = Token(0);

/// Connects to a `netcore`-backed listener and reports whether it becomes
/// writable (connected) within the timeout, the same mio poll-loop shape as
/// the teacher's `test_listen.rs` smoke test, turned into a pass/fail CLI
/// probe instead of a `loop { }` demo.
///
/// Exit codes: `0` connected, `1` connect failed or timed out, `2` usage
/// error (bad address).
fn main() {
    let matches = App::new("netcore-probe")
        .version("0.1.0")
        .author("Bush Hammer Industries")
        .about("Smoke-tests a netcore listener by connecting and waiting for writability")
        .arg(
            Arg::with_name("ADDR")
                .help("host:port of the listener to probe")
                .required(true),
        )
        .arg(
            Arg::with_name("timeout_ms")
                .long("timeout-ms")
                .takes_value(true)
                .help("milliseconds to wait for the connection to become writable (default 2000)"),
        )
        .get_matches();

    let addr_str = matches.value_of("ADDR").expect("ADDR is required");
    let addr: SocketAddr = match addr_str.parse() {
        Ok(addr) => addr,
        Err(e) => {
            eprintln!("netcore-probe: invalid address '{}': {}", addr_str, e);
            std::process::exit(2);
        }
    };

    let timeout_ms: u64 = match matches.value_of("timeout_ms").unwrap_or("2000").parse() {
        Ok(ms) => ms,
        Err(e) => {
            eprintln!("netcore-probe: invalid --timeout-ms: {}", e);
            std::process::exit(2);
        }
    };

    match probe(addr, Duration::from_millis(timeout_ms)) {
        Ok(()) => {
            println!("connected to {}", addr);
            std::process::exit(0);
        }
        Err(e) => {
            eprintln!("netcore-probe: {}", e);
            std::process::exit(1);
        }
    }
}

fn probe(addr: SocketAddr, timeout: Duration) -> std::io::Result<()> {
    let stream = TcpStream::connect(&addr)?;
    let poll = Poll::new()?;
    poll.register(&stream, CONNECT_TOKEN, Ready::writable(), PollOpt::edge())?;

    let mut events = Events::with_capacity(16);
    poll.poll(&mut events, Some(timeout))?;

    for event in events.iter() {
        if event.token() == CONNECT_TOKEN && event.readiness().is_writable() {
            if let Some(e) = stream.take_error()? {
                return Err(e);
            }
            return Ok(());
        }
    }

    Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "connection did not become writable in time"))
}

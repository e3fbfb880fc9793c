//! Two connections over a socket pair: a typed hello/sync exchange with
//! a registry generation riding the footers.
//!
//! Run with: `cargo run --example echo`

use std::os::unix::net::UnixStream;

use cadena_wire::proto::{register_core, CoreEvents, CoreProxy, ErrorEvent, Hello, Sync};
use cadena_wire::{Connection, Dispatcher, Permissions};

#[derive(Clone, Default)]
struct Printer;

impl CoreEvents for Printer {
    fn hello(&mut self, args: Hello) {
        println!("server: hello, version {}", args.version);
    }
    fn sync(&mut self, args: Sync) {
        println!("server: sync id={} seq={}", args.id, args.seq);
    }
    fn pong(&mut self, args: Sync) {
        println!("server: pong id={} seq={}", args.id, args.seq);
    }
    fn error(&mut self, args: ErrorEvent) {
        println!("server: error on {}: {}", args.id, args.message);
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (a, b) = UnixStream::pair()?;
    let mut client_conn = Connection::new(a)?;
    let mut server_conn = Connection::new(b)?;

    let mut server = Dispatcher::new();
    server.generation.advance(1);
    register_core(&mut server, Permissions::RWX, Printer);

    let mut client = Dispatcher::new();
    CoreProxy::hello(&mut client, &mut client_conn, &Hello { version: 3 });
    CoreProxy::sync(&mut client, &mut client_conn, &Sync { id: 0, seq: 1 });
    client_conn.flush()?;

    server_conn.refill()?;
    while !matches!(
        server.dispatch_next(&mut server_conn)?,
        cadena_wire::Dispatched::Idle
    ) {}

    println!("client generation view: {}", client.generation.received());
    Ok(())
}

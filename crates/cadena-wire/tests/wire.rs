//! End-to-end wire tests: framed messages with fds over a real socket,
//! and footer generation synchronization between peers.

use std::os::fd::AsRawFd;
use std::os::unix::net::UnixStream;

use proptest::collection::vec;
use proptest::prelude::*;

use cadena_pod::{Parser, Value};
use cadena_wire::{connection, Connection, Dispatcher, Permissions};

fn pair() -> (Connection, Connection) {
    let (a, b) = UnixStream::pair().unwrap();
    (Connection::new(a).unwrap(), Connection::new(b).unwrap())
}

#[test]
fn struct_with_fd_over_socket_pair() {
    let (mut tx, mut rx) = pair();

    let file = tempfile::tempfile().unwrap();

    // { i32 = 42, Id = Object, fd = add_fd(file) }
    let mut msg = tx.begin(1, 4);
    let index = msg.add_fd(file.as_raw_fd()).unwrap();
    let f = msg.pod().push_struct();
    msg.pod().int(42);
    msg.pod().id(cadena_pod::PodType::Object as u32);
    msg.pod().fd(index);
    msg.pod().pop(f);
    msg.end();

    tx.flush().unwrap();
    rx.refill().unwrap();

    let mut received = rx.get_next().unwrap().expect("message");
    assert_eq!(received.n_fds, 1);

    let mut p = Parser::new(received.body);
    let f = p.push_struct().unwrap();
    assert_eq!(p.get_int().unwrap(), 42);
    assert_eq!(p.get_id().unwrap(), cadena_pod::PodType::Object as u32);
    let fd_index = p.get_fd().unwrap();
    p.pop(f).unwrap();

    assert_eq!(fd_index, index);
    let fd = received.fds.take(fd_index as usize).expect("fd arrived");
    assert!(fd.as_raw_fd() >= 0);
}

#[test]
fn over_real_server_socket() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cadena-wire-e2e");

    let server = cadena_wire::socket::ServerSocket::bind_at(&path).unwrap();
    let client_stream = cadena_wire::socket::connect_at(&path).unwrap();
    let server_stream = server.accept().unwrap().expect("pending connection");

    let mut client = Connection::new(client_stream).unwrap();
    let mut server_conn = Connection::new(server_stream).unwrap();

    let mut msg = client.begin(0, 1);
    let f = msg.pod().push_struct();
    msg.pod().string("hello");
    msg.pod().pop(f);
    msg.end();
    client.flush().unwrap();

    server_conn.refill().unwrap();
    let received = server_conn.get_next().unwrap().expect("message");
    let mut p = Parser::new(received.body);
    let f = p.push_struct().unwrap();
    assert_eq!(p.get_string().unwrap(), "hello");
    p.pop(f).unwrap();
}

#[test]
fn generation_sync_between_peers() {
    let (mut server_conn, mut client_conn) = pair();

    let mut server = Dispatcher::new();
    let mut client = Dispatcher::new();
    client.add_object(
        0,
        Permissions::RWX,
        vec![cadena_wire::marshal::Method::new("info", |p, _| {
            let f = p.push_struct()?;
            p.pop(f)?;
            Ok(())
        })],
    );

    // server's registry advanced to generation 7; the next message
    // carries it in the footer
    server.generation.advance(7);
    server.call(&mut server_conn, 0, 0, |_| {});
    server_conn.flush().unwrap();

    client_conn.refill().unwrap();
    client.dispatch_next(&mut client_conn).unwrap();
    assert_eq!(client.generation.received(), 7);

    // unchanged generation: the next server message has no footer
    server.call(&mut server_conn, 0, 0, |_| {});
    server_conn.flush().unwrap();
    client_conn.refill().unwrap();
    client.dispatch_next(&mut client_conn).unwrap();
    assert_eq!(client.generation.received(), 7);
}

#[test]
fn disconnect_closes_in_flight_fds() {
    let (mut tx, mut rx) = pair();
    let file = tempfile::tempfile().unwrap();

    let mut msg = tx.begin(0, 0);
    let index = msg.add_fd(file.as_raw_fd()).unwrap();
    msg.pod().fd(index);
    msg.end();
    tx.flush().unwrap();
    rx.refill().unwrap();
    drop(tx);

    // the message is there; dropping the connection discards its fd
    assert!(rx.get_next().unwrap().is_some());
    rx.close();
}

#[test]
fn message_header_layout_is_stable() {
    // spot-check the framed fields against the documented layout
    let (mut tx, mut rx) = pair();
    let mut msg = tx.begin(0x0102_0304, 0xab);
    msg.pod().int(1);
    msg.end();
    tx.flush().unwrap();
    rx.refill().unwrap();
    let m = rx.get_next().unwrap().expect("message");
    assert_eq!(m.object_id, 0x0102_0304);
    assert_eq!(m.opcode, 0xab);
    assert_eq!(m.seq, 0);
    assert_eq!(m.body.len() % 8, 0);
    assert_eq!(connection::HEADER_SIZE, 16);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Any struct of scalars survives the wire byte-identically.
    #[test]
    fn bodies_survive_the_wire(
        ints in vec(any::<i32>(), 0..8),
        text in "[a-zA-Z0-9 ]{0,32}",
    ) {
        let value = Value::Struct(
            ints.iter()
                .copied()
                .map(Value::Int)
                .chain([Value::String(text.clone())])
                .collect(),
        );
        let encoded = value.to_bytes();

        let (mut tx, mut rx) = pair();
        let mut msg = tx.begin(5, 1);
        msg.pod().append_pod(&encoded);
        msg.end();
        tx.flush().unwrap();
        rx.refill().unwrap();

        let received = rx.get_next().unwrap().expect("message");
        prop_assert_eq!(received.body, &encoded[..]);
        let back = Value::from_bytes(received.body).unwrap();
        prop_assert_eq!(back, value);
    }

    /// Sequence numbers are monotonically increasing per connection.
    #[test]
    fn seq_monotonic(count in 1usize..20) {
        let (mut tx, mut rx) = pair();
        for _ in 0..count {
            let mut msg = tx.begin(1, 0);
            msg.pod().none();
            msg.end();
        }
        tx.flush().unwrap();
        rx.refill().unwrap();
        let mut last = None;
        while let Some(m) = rx.get_next().unwrap() {
            if let Some(prev) = last {
                prop_assert_eq!(m.seq, prev + 1);
            }
            last = Some(m.seq);
        }
        prop_assert_eq!(last, Some(count as u32 - 1));
    }
}

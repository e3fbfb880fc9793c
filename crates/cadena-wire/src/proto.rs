//! Typed marshaling for the core interface.
//!
//! Instead of dynamic format strings, every method and event gets a
//! statically-typed marshal/demarshal pair: arguments are plain structs,
//! the wire form is one top-level POD Struct, and missing optional
//! trailing fields demarshal to their defaults. The [`Dispatcher`] method
//! tables are built from these pairs, so the permission checks of the
//! dispatch layer apply unchanged.
//!
//! Only the core interface is defined here; the session-management and
//! registry interfaces live with their services.

use cadena_pod::{Builder, Parser, PodError};

use crate::connection::Connection;
use crate::marshal::{Dispatcher, Method, Permissions};

/// Well-known id of the core object.
pub const CORE_OBJECT_ID: u32 = 0;

/// Core method opcodes.
pub mod method {
    /// `Hello { version }`.
    pub const HELLO: u8 = 0;
    /// `Sync { id, seq }`.
    pub const SYNC: u8 = 1;
    /// `Pong { id, seq }`.
    pub const PONG: u8 = 2;
    /// `Error { id, seq, res, message }`.
    pub const ERROR: u8 = 3;
}

/// `Hello`: announce the protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hello {
    /// Highest protocol version the sender speaks.
    pub version: i32,
}

impl Hello {
    /// Write the argument struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.push_struct();
        b.int(self.version);
        b.pop(f);
    }

    /// Read the argument struct.
    pub fn demarshal(p: &mut Parser<'_>) -> Result<Self, PodError> {
        let f = p.push_struct()?;
        let version = p.get_int()?;
        p.pop(f)?;
        Ok(Self { version })
    }
}

/// `Sync`: ask the peer to answer with `Pong` once everything queued
/// before this message was processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sync {
    /// Object the sync round-trips through.
    pub id: u32,
    /// Caller cookie, echoed in the pong.
    pub seq: i32,
}

impl Sync {
    /// Write the argument struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.push_struct();
        b.int(self.id as i32);
        b.int(self.seq);
        b.pop(f);
    }

    /// Read the argument struct.
    pub fn demarshal(p: &mut Parser<'_>) -> Result<Self, PodError> {
        let f = p.push_struct()?;
        let id = p.get_int()? as u32;
        let seq = p.get_int()?;
        p.pop(f)?;
        Ok(Self { id, seq })
    }
}

/// `Pong`: reply to a [`Sync`].
pub type Pong = Sync;

/// `Error`: something about `id` went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorEvent {
    /// Object the error is about.
    pub id: u32,
    /// Sequence number of the triggering message.
    pub seq: i32,
    /// Negative errno-style code.
    pub res: i32,
    /// Human-readable description.
    pub message: String,
}

impl ErrorEvent {
    /// Write the argument struct.
    pub fn marshal(&self, b: &mut Builder) {
        let f = b.push_struct();
        b.int(self.id as i32);
        b.int(self.seq);
        b.int(self.res);
        b.string(&self.message);
        b.pop(f);
    }

    /// Read the argument struct.
    pub fn demarshal(p: &mut Parser<'_>) -> Result<Self, PodError> {
        let f = p.push_struct()?;
        let id = p.get_int()? as u32;
        let seq = p.get_int()?;
        let res = p.get_int()?;
        let message = p.get_string()?.to_owned();
        p.pop(f)?;
        Ok(Self {
            id,
            seq,
            res,
            message,
        })
    }
}

/// Typed send helpers for the core methods.
pub struct CoreProxy;

impl CoreProxy {
    /// Send `Hello`.
    pub fn hello(disp: &mut Dispatcher, conn: &mut Connection, args: &Hello) -> u32 {
        send(disp, conn, method::HELLO, |b| args.marshal(b))
    }

    /// Send `Sync`.
    pub fn sync(disp: &mut Dispatcher, conn: &mut Connection, args: &Sync) -> u32 {
        send(disp, conn, method::SYNC, |b| args.marshal(b))
    }

    /// Send `Pong`.
    pub fn pong(disp: &mut Dispatcher, conn: &mut Connection, args: &Pong) -> u32 {
        send(disp, conn, method::PONG, |b| args.marshal(b))
    }

    /// Send `Error`.
    pub fn error(disp: &mut Dispatcher, conn: &mut Connection, args: &ErrorEvent) -> u32 {
        send(disp, conn, method::ERROR, |b| args.marshal(b))
    }
}

fn send(
    disp: &mut Dispatcher,
    conn: &mut Connection,
    opcode: u8,
    write: impl FnOnce(&mut Builder),
) -> u32 {
    let mut msg = conn.begin(CORE_OBJECT_ID, opcode);
    write(msg.pod());
    disp.generation.write_footer(msg.pod());
    msg.end()
}

/// Callbacks for the core interface.
pub trait CoreEvents: 'static {
    /// A peer announced itself.
    fn hello(&mut self, args: Hello);
    /// A peer asks for a pong.
    fn sync(&mut self, args: Sync);
    /// A pong arrived.
    fn pong(&mut self, args: Pong);
    /// A peer reported an error.
    fn error(&mut self, args: ErrorEvent);
}

/// Build the method table for the core object and register it.
///
/// The `Hello` method requires no execute permission (a client must be
/// able to introduce itself); everything else defaults to execute.
pub fn register_core<H>(disp: &mut Dispatcher, held: Permissions, handler: H)
where
    H: CoreEvents + Clone,
{
    let h0 = handler.clone();
    let h1 = handler.clone();
    let h2 = handler.clone();
    let h3 = handler;
    let methods = vec![
        Method::new("hello", {
            let mut h = h0;
            move |p, _| {
                h.hello(Hello::demarshal(p)?);
                Ok(())
            }
        })
        .with_permissions(Permissions::empty()),
        Method::new("sync", {
            let mut h = h1;
            move |p, _| {
                h.sync(Sync::demarshal(p)?);
                Ok(())
            }
        }),
        Method::new("pong", {
            let mut h = h2;
            move |p, _| {
                h.pong(Pong::demarshal(p)?);
                Ok(())
            }
        }),
        Method::new("error", {
            let mut h = h3;
            move |p, _| {
                h.error(ErrorEvent::demarshal(p)?);
                Ok(())
            }
        }),
    ];
    disp.add_object(CORE_OBJECT_ID, held, methods);
}

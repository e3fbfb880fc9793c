//! Per-method demarshaling with permission-checked dispatch.
//!
//! Each object registered with the [`Dispatcher`] carries its held
//! permission set and a method table indexed by opcode; every method
//! names its required permission mask (execute by default). Dispatch
//! checks permissions before demarshaling, reports denials with the
//! requested and held bitsets, and synthesizes an error reply referencing
//! the offending `(id, opcode)` when a body fails to parse - the
//! connection keeps processing subsequent messages either way.
//!
//! Marshaling is the straight inverse: a method's arguments are written
//! as a single top-level Struct through the connection's message builder.

use std::collections::HashMap;

use cadena_pod::{Parser, PodError};

use crate::connection::{Connection, FdClaims};
use crate::error::WireError;
use crate::footer::Generation;

bitflags::bitflags! {
    /// Object permission bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Permissions: u32 {
        /// Object is visible and readable.
        const R = 4;
        /// Object properties may be modified.
        const W = 2;
        /// Object methods may be executed.
        const X = 1;
        /// Object permissions may be changed.
        const M = 8;
    }
}

impl Permissions {
    /// The common full set.
    pub const RWX: Self = Self::R.union(Self::W).union(Self::X);
}

/// Handler for one method: parses the argument struct and consumes fds.
pub type MethodFn = Box<dyn FnMut(&mut Parser<'_>, &mut FdClaims<'_>) -> Result<(), PodError>>;

/// One registered method.
pub struct Method {
    /// Method name, for diagnostics.
    pub name: &'static str,
    /// Permission mask the caller must hold.
    pub required: Permissions,
    /// The demarshal function.
    pub handler: MethodFn,
}

impl Method {
    /// A method with the default execute permission.
    pub fn new(
        name: &'static str,
        handler: impl FnMut(&mut Parser<'_>, &mut FdClaims<'_>) -> Result<(), PodError> + 'static,
    ) -> Self {
        Self {
            name,
            required: Permissions::X,
            handler: Box::new(handler),
        }
    }

    /// Override the required permission mask.
    #[must_use]
    pub fn with_permissions(mut self, required: Permissions) -> Self {
        self.required = required;
        self
    }
}

struct ObjectEntry {
    held: Permissions,
    methods: Vec<Method>,
}

/// Outcome of dispatching one message.
#[derive(Debug, PartialEq, Eq)]
pub enum Dispatched {
    /// A message was handled.
    Handled {
        /// Target object.
        id: u32,
        /// Method opcode.
        opcode: u8,
    },
    /// No complete message was available.
    Idle,
}

/// Routes inbound messages to per-object method tables.
#[derive(Default)]
pub struct Dispatcher {
    objects: HashMap<u32, ObjectEntry>,
    /// Registry generation carried in footers.
    pub generation: Generation,
}

impl Dispatcher {
    /// Empty dispatcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an object with its held permissions and method table
    /// (indexed by opcode).
    pub fn add_object(&mut self, id: u32, held: Permissions, methods: Vec<Method>) {
        self.objects.insert(id, ObjectEntry { held, methods });
    }

    /// Remove an object; later messages to it report `NoEntry`.
    pub fn remove_object(&mut self, id: u32) {
        self.objects.remove(&id);
    }

    /// Dispatch the next inbound message, if any.
    ///
    /// Demarshal and permission failures are reported to the peer with a
    /// synthesized error reply and logged; they do not poison the
    /// connection. I/O errors and protocol violations propagate.
    pub fn dispatch_next(&mut self, conn: &mut Connection) -> Result<Dispatched, WireError> {
        conn.enter();
        let result = self.dispatch_inner(conn);
        conn.leave();

        match result {
            Ok(outcome) => Ok(outcome),
            Err(soft @ (WireError::Demarshal { .. }
            | WireError::Access { .. }
            | WireError::NoEntry(_)
            | WireError::NoMethod { .. })) => {
                let (id, opcode) = match &soft {
                    WireError::Demarshal { id, opcode, .. } => (*id, *opcode),
                    WireError::Access { id, .. } => (*id, 0),
                    WireError::NoEntry(id) => (*id, 0),
                    WireError::NoMethod { id, opcode } => (*id, *opcode),
                    _ => (0, 0),
                };
                tracing::warn!(id, opcode, error = %soft, "dispatch error, replying");
                self.send_error(conn, id, opcode, &soft);
                Ok(Dispatched::Handled { id, opcode })
            }
            Err(e) => Err(e),
        }
    }

    fn dispatch_inner(&mut self, conn: &mut Connection) -> Result<Dispatched, WireError> {
        let Some(mut msg) = conn.get_next()? else {
            return Ok(Dispatched::Idle);
        };
        let id = msg.object_id;
        let opcode = msg.opcode;

        // footers are processed for every message, even ones that end in
        // an error reply
        let (body, footer) = msg.split_body()?;
        self.generation.read_footer(footer)?;

        let entry = self.objects.get_mut(&id).ok_or(WireError::NoEntry(id))?;
        let method = entry
            .methods
            .get_mut(opcode as usize)
            .ok_or(WireError::NoMethod { id, opcode })?;

        if !entry.held.contains(method.required) {
            return Err(WireError::Access {
                id,
                requested: method.required,
                held: entry.held,
            });
        }

        tracing::trace!(id, opcode, method = method.name, "dispatching");
        let mut parser = Parser::new(body);
        match (method.handler)(&mut parser, &mut msg.fds) {
            Ok(()) => Ok(Dispatched::Handled { id, opcode }),
            Err(source) => {
                // a malformed body earns a hex dump at debug verbosity,
                // plus a structured dump of whatever still parses
                tracing::debug!(
                    id,
                    opcode,
                    body = %hex_dump(body),
                    "malformed message body"
                );
                tracing::trace!(pod = %cadena_pod::debug::dump_sequence(body), "body as pods");
                Err(WireError::Demarshal { id, opcode, source })
            }
        }
    }

    /// Synthesize an error reply for the offending `(id, opcode)`.
    fn send_error(&mut self, conn: &mut Connection, id: u32, opcode: u8, error: &WireError) {
        let mut msg = conn.begin(0, ERROR_OPCODE);
        let f = msg.pod().push_struct();
        msg.pod().id(id);
        msg.pod().int(i32::from(opcode));
        msg.pod().int(error_code(error));
        msg.pod().string(&error.to_string());
        msg.pod().pop(f);
        self.generation.write_footer(msg.pod());
        msg.end();
    }

    /// Marshal a method call: the arguments become one top-level Struct,
    /// and the footer rides behind it when the generation advanced.
    pub fn call(
        &mut self,
        conn: &mut Connection,
        object_id: u32,
        opcode: u8,
        write_args: impl FnOnce(&mut cadena_pod::Builder),
    ) -> u32 {
        let mut msg = conn.begin(object_id, opcode);
        let f = msg.pod().push_struct();
        write_args(msg.pod());
        msg.pod().pop(f);
        self.generation.write_footer(msg.pod());
        msg.end()
    }
}

/// Event opcode used for synthesized error replies.
pub const ERROR_OPCODE: u8 = 0xff;

fn error_code(e: &WireError) -> i32 {
    match e {
        WireError::Access { .. } => -(libc::EACCES),
        WireError::NoEntry(_) | WireError::NoMethod { .. } => -(libc::ENOENT),
        WireError::Demarshal { .. } => -(libc::EINVAL),
        WireError::Protocol(_) => -(libc::EPROTO),
        WireError::TryAgain => -(libc::EAGAIN),
        WireError::NoSpace => -(libc::ENOSPC),
        WireError::Closed => -(libc::EPIPE),
        WireError::Io(err) => -err.raw_os_error().unwrap_or(libc::EIO),
    }
}

fn hex_dump(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(if i % 16 == 0 { '\n' } else { ' ' });
        }
        out.push_str(&format!("{b:02x}"));
    }
    out
}

//! The framed connection: buffers, fd arrays, flush and refill.

use std::os::fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

use cadena_pod::{round_up, Builder, PodRef};

use crate::error::WireError;

/// Bytes of the message header: object id, size+opcode, seq, fd count.
pub const HEADER_SIZE: usize = 16;

/// Maximum file descriptors per direction in flight.
pub const MAX_FDS: usize = 28;

/// Buffer growth unit and default capacity.
const BUFFER_UNIT: usize = 128 * 1024;

/// One parsed inbound message.
///
/// `body` borrows the connection's receive buffer; the borrow (and any
/// fd claims) must end before the next [`Connection::get_next`] call,
/// which is free to recycle the buffer.
pub struct Message<'a> {
    /// Target object id.
    pub object_id: u32,
    /// Method/event opcode.
    pub opcode: u8,
    /// Sender-assigned sequence number.
    pub seq: u32,
    /// Number of fds that accompanied this message.
    pub n_fds: u32,
    /// Body bytes: the argument POD followed by an optional footer.
    pub body: &'a [u8],
    /// Claims over the inbound fd array.
    pub fds: FdClaims<'a>,
}

impl<'a> Message<'a> {
    /// Split the payload into the argument POD and the trailing footer
    /// bytes (empty when no footer was sent).
    pub fn split_body(&self) -> Result<(&'a [u8], &'a [u8]), WireError> {
        let (_, first) = PodRef::parse(self.body).map_err(|e| WireError::Demarshal {
            id: self.object_id,
            opcode: self.opcode,
            source: e,
        })?;
        Ok((&self.body[..first], &self.body[first.min(self.body.len())..]))
    }
}

/// Scoped access to the inbound fd slots.
///
/// A dispatch function claims the fds it consumes; everything left
/// unclaimed is closed when the message is released, so leaked
/// descriptors are impossible.
pub struct FdClaims<'a> {
    slots: &'a mut Vec<Option<OwnedFd>>,
}

impl FdClaims<'_> {
    /// Borrow the fd at `index` without claiming it.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<BorrowedFd<'_>> {
        self.slots
            .get(index)
            .and_then(|s| s.as_ref())
            .map(OwnedFd::as_fd)
    }

    /// Claim ownership of the fd at `index`.
    pub fn take(&mut self, index: usize) -> Option<OwnedFd> {
        self.slots.get_mut(index).and_then(Option::take)
    }

    /// Number of fd slots (claimed or not).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no fd slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[derive(Default)]
struct OutBuffer {
    data: Vec<u8>,
    /// Flush cursor: bytes before it were already written to the socket.
    offset: usize,
    fds: Vec<RawFd>,
    fds_sent: bool,
}

#[derive(Default)]
struct InBuffer {
    data: Vec<u8>,
    /// Bytes of `data` that hold received content.
    filled: usize,
    /// Parse cursor.
    offset: usize,
    /// Extent of the message returned by the last `get_next`.
    consumed: usize,
    fds: Vec<Option<OwnedFd>>,
    /// Largest single message seen, for the growth cap.
    watermark: usize,
}

/// A framed, fd-passing connection over a stream socket.
pub struct Connection {
    stream: UnixStream,
    out: OutBuffer,
    inb: InBuffer,
    seq: u32,
    enter_count: usize,
    need_flush: bool,
}

impl Connection {
    /// Wrap a connected stream socket.
    ///
    /// The socket is switched to non-blocking mode; all subsequent I/O is
    /// edge-driven by the embedder's event loop.
    pub fn new(stream: UnixStream) -> Result<Self, WireError> {
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            out: OutBuffer {
                data: Vec::with_capacity(BUFFER_UNIT),
                ..OutBuffer::default()
            },
            inb: InBuffer {
                data: vec![0; BUFFER_UNIT],
                ..InBuffer::default()
            },
            seq: 0,
            enter_count: 0,
            need_flush: false,
        })
    }

    /// The underlying socket fd, for event-loop registration.
    #[must_use]
    pub fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    /// Whether queued messages await a [`Connection::flush`].
    #[must_use]
    pub fn need_flush(&self) -> bool {
        self.need_flush
    }

    /// Begin a message to `object_id` with `opcode`; returns a builder
    /// over an 8-byte-aligned region. Finish with [`MessageBuilder::end`].
    pub fn begin(&mut self, object_id: u32, opcode: u8) -> MessageBuilder<'_> {
        MessageBuilder {
            conn: self,
            object_id,
            opcode,
            builder: Builder::new(),
        }
    }

    /// Queue an fd for the next flush, deduplicating repeats.
    pub fn add_fd(&mut self, fd: RawFd) -> Result<i64, WireError> {
        if let Some(index) = self.out.fds.iter().position(|&f| f == fd) {
            return Ok(index as i64);
        }
        if self.out.fds.len() >= MAX_FDS {
            return Err(WireError::NoSpace);
        }
        self.out.fds.push(fd);
        Ok((self.out.fds.len() - 1) as i64)
    }

    fn end_message(&mut self, object_id: u32, opcode: u8, payload: &[u8]) -> u32 {
        debug_assert_eq!(payload.len() % 8, 0);
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);

        let size = payload.len() as u32;
        debug_assert!(size < 1 << 24, "message exceeds the 24-bit size field");
        let word = (u32::from(opcode) << 24) | (size & 0x00ff_ffff);

        self.out.data.extend_from_slice(&object_id.to_le_bytes());
        self.out.data.extend_from_slice(&word.to_le_bytes());
        self.out.data.extend_from_slice(&seq.to_le_bytes());
        self.out
            .data
            .extend_from_slice(&(self.out.fds.len() as u32).to_le_bytes());
        self.out.data.extend_from_slice(payload);

        tracing::trace!(object_id, opcode, size, seq, "queued message");
        self.need_flush = true;
        seq
    }

    /// Write queued bytes (and fds) to the socket.
    ///
    /// Returns `Err(TryAgain)` when the socket is full; partial writes
    /// advance the cursor and resume on the next call.
    pub fn flush(&mut self) -> Result<(), WireError> {
        while self.out.offset < self.out.data.len() {
            let fds: &[RawFd] = if self.out.fds_sent { &[] } else { &self.out.fds };
            match sys::send_with_fds(
                self.stream.as_raw_fd(),
                &self.out.data[self.out.offset..],
                fds,
            ) {
                Ok(n) => {
                    self.out.offset += n;
                    // ancillary data rides the first successful write
                    self.out.fds_sent = true;
                }
                Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => return Err(WireError::TryAgain),
                Err(e)
                    if e.raw_os_error() == Some(libc::EPIPE)
                        || e.raw_os_error() == Some(libc::ECONNRESET) =>
                {
                    tracing::debug!("peer disconnected during flush");
                    return Err(WireError::Closed);
                }
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.out.data.clear();
        self.out.offset = 0;
        self.out.fds.clear();
        self.out.fds_sent = false;
        self.need_flush = false;
        Ok(())
    }

    /// Read whatever the socket has, absorbing ancillary fds.
    ///
    /// Returns the number of bytes received; `Err(TryAgain)` when nothing
    /// is pending and `Err(Closed)` at end of stream. The buffer grows in
    /// 128 KiB units, bounded by the largest single message seen.
    pub fn refill(&mut self) -> Result<usize, WireError> {
        if self.inb.filled == self.inb.data.len() {
            // grow one unit at a time, at least far enough for the
            // largest single message seen so far
            let grown = (self.inb.data.len() + BUFFER_UNIT)
                .max(round_up(self.inb.watermark) + HEADER_SIZE);
            tracing::warn!(size = grown, "growing receive buffer");
            self.inb.data.resize(grown, 0);
        }

        let mut fds: Vec<OwnedFd> = Vec::new();
        let n = loop {
            match sys::recv_with_fds(
                self.stream.as_raw_fd(),
                &mut self.inb.data[self.inb.filled..],
                &mut fds,
            ) {
                Ok(0) => return Err(WireError::Closed),
                Ok(n) => break n,
                Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
                Err(e) if e.raw_os_error() == Some(libc::EAGAIN) => {
                    return Err(WireError::TryAgain)
                }
                Err(e) => return Err(e.into()),
            }
        };
        self.inb.filled += n;
        for fd in fds {
            self.inb.fds.push(Some(fd));
        }
        tracing::trace!(bytes = n, fds = self.inb.fds.len(), "refilled");
        Ok(n)
    }

    /// Peel the next framed message off the receive buffer.
    ///
    /// `Ok(None)` means the buffer holds no complete message; call
    /// [`Connection::refill`] and retry. The previous message (if any) is
    /// released first: its unclaimed fds are closed.
    pub fn get_next(&mut self) -> Result<Option<Message<'_>>, WireError> {
        // release the previous message
        self.inb.offset += self.inb.consumed;
        self.inb.consumed = 0;

        if self.inb.offset >= self.inb.filled {
            self.reclaim();
            return Ok(None);
        }

        let data = &self.inb.data[..self.inb.filled];
        let at = self.inb.offset;
        if at + HEADER_SIZE > data.len() {
            return Ok(None);
        }
        let word = |o: usize| {
            let mut b = [0u8; 4];
            b.copy_from_slice(&data[o..o + 4]);
            u32::from_le_bytes(b)
        };
        let object_id = word(at);
        let size_opcode = word(at + 4);
        let seq = word(at + 8);
        let n_fds = word(at + 12);

        let opcode = (size_opcode >> 24) as u8;
        let size = (size_opcode & 0x00ff_ffff) as usize;
        let total = HEADER_SIZE + round_up(size);
        self.inb.watermark = self.inb.watermark.max(total);

        if at + total > data.len() {
            // incomplete: caller must refill (the buffer grows on demand)
            return Ok(None);
        }
        if n_fds as usize > MAX_FDS {
            return Err(WireError::Protocol(format!("message claims {n_fds} fds")));
        }

        self.inb.consumed = total;
        let body = &self.inb.data[at + HEADER_SIZE..at + HEADER_SIZE + size];
        Ok(Some(Message {
            object_id,
            opcode,
            seq,
            n_fds,
            body,
            fds: FdClaims {
                slots: &mut self.inb.fds,
            },
        }))
    }

    /// Bracket recursive message dispatch.
    pub fn enter(&mut self) {
        self.enter_count += 1;
    }

    /// Leave a dispatch scope; at the outermost level consumed bytes are
    /// reclaimed and unclaimed fds are closed.
    pub fn leave(&mut self) {
        self.enter_count = self.enter_count.saturating_sub(1);
        if self.enter_count == 0 {
            self.reclaim();
        }
    }

    /// Drop unclaimed inbound fds and compact the receive buffer.
    fn reclaim(&mut self) {
        if self.inb.offset > 0 {
            self.inb.data.copy_within(self.inb.offset..self.inb.filled, 0);
            self.inb.filled -= self.inb.offset;
            self.inb.offset = 0;
        }
        if self.inb.filled == 0 {
            // closing OwnedFds happens on drop
            self.inb.fds.clear();
        } else {
            self.inb.fds.retain(Option::is_some);
        }
    }

    /// Close the connection, discarding in-flight state.
    pub fn close(self) {
        tracing::debug!("connection closed");
        // stream and owned fds drop here
    }
}

/// In-progress outbound message.
///
/// Write the argument POD (and footer) through [`MessageBuilder::pod`],
/// then call [`MessageBuilder::end`] to frame it.
pub struct MessageBuilder<'a> {
    conn: &'a mut Connection,
    object_id: u32,
    opcode: u8,
    builder: Builder,
}

impl MessageBuilder<'_> {
    /// The POD builder for the message payload.
    pub fn pod(&mut self) -> &mut Builder {
        &mut self.builder
    }

    /// Queue an fd and return the index to embed in the body.
    pub fn add_fd(&mut self, fd: RawFd) -> Result<i64, WireError> {
        self.conn.add_fd(fd)
    }

    /// Finish the message: write the header with the final size and
    /// assign the sequence number. The connection wants a flush after
    /// this.
    pub fn end(self) -> u32 {
        let payload = self.builder.into_inner();
        self.conn.end_message(self.object_id, self.opcode, &payload)
    }
}

/// Raw sendmsg/recvmsg with SCM_RIGHTS ancillary data.
mod sys {
    use super::{FromRawFd, OwnedFd, RawFd, MAX_FDS};
    use std::io;

    const CMSG_CAPACITY: usize = 512;

    #[allow(unsafe_code)]
    pub fn send_with_fds(fd: RawFd, data: &[u8], fds: &[RawFd]) -> io::Result<usize> {
        // SAFETY: iov/cmsg point at locals that outlive the call; fd
        // payload length is bounded by MAX_FDS.
        unsafe {
            let mut iov = libc::iovec {
                iov_base: data.as_ptr() as *mut libc::c_void,
                iov_len: data.len(),
            };
            let mut cmsg_buf = [0u8; CMSG_CAPACITY];
            let mut msg: libc::msghdr = std::mem::zeroed();
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;

            if !fds.is_empty() {
                assert!(fds.len() <= MAX_FDS);
                let payload = std::mem::size_of_val(fds);
                msg.msg_control = cmsg_buf.as_mut_ptr().cast();
                msg.msg_controllen = libc::CMSG_SPACE(payload as u32) as usize;
                let cmsg = libc::CMSG_FIRSTHDR(&msg);
                (*cmsg).cmsg_level = libc::SOL_SOCKET;
                (*cmsg).cmsg_type = libc::SCM_RIGHTS;
                (*cmsg).cmsg_len = libc::CMSG_LEN(payload as u32) as usize;
                std::ptr::copy_nonoverlapping(
                    fds.as_ptr().cast::<u8>(),
                    libc::CMSG_DATA(cmsg),
                    payload,
                );
            }

            let n = libc::sendmsg(fd, &msg, libc::MSG_NOSIGNAL | libc::MSG_DONTWAIT);
            if n < 0 {
                Err(io::Error::last_os_error())
            } else {
                Ok(n as usize)
            }
        }
    }

    #[allow(unsafe_code)]
    pub fn recv_with_fds(
        fd: RawFd,
        data: &mut [u8],
        fds: &mut Vec<OwnedFd>,
    ) -> io::Result<usize> {
        // SAFETY: iov/cmsg point at locals that outlive the call; CMSG
        // iteration follows the libc macros; received fds are adopted
        // exactly once.
        unsafe {
            let mut iov = libc::iovec {
                iov_base: data.as_mut_ptr().cast(),
                iov_len: data.len(),
            };
            let mut cmsg_buf = [0u8; CMSG_CAPACITY];
            let mut msg: libc::msghdr = std::mem::zeroed();
            msg.msg_iov = &mut iov;
            msg.msg_iovlen = 1;
            msg.msg_control = cmsg_buf.as_mut_ptr().cast();
            msg.msg_controllen = cmsg_buf.len();

            let n = libc::recvmsg(fd, &mut msg, libc::MSG_CMSG_CLOEXEC | libc::MSG_DONTWAIT);
            if n < 0 {
                return Err(io::Error::last_os_error());
            }

            let mut cmsg = libc::CMSG_FIRSTHDR(&msg);
            while !cmsg.is_null() {
                if (*cmsg).cmsg_level == libc::SOL_SOCKET
                    && (*cmsg).cmsg_type == libc::SCM_RIGHTS
                {
                    let header = libc::CMSG_LEN(0) as usize;
                    let payload = (*cmsg).cmsg_len - header;
                    let count = payload / std::mem::size_of::<RawFd>();
                    let base = libc::CMSG_DATA(cmsg).cast::<RawFd>();
                    for i in 0..count {
                        let raw = std::ptr::read_unaligned(base.add(i));
                        fds.push(OwnedFd::from_raw_fd(raw));
                    }
                }
                cmsg = libc::CMSG_NXTHDR(&msg, cmsg);
            }
            Ok(n as usize)
        }
    }
}

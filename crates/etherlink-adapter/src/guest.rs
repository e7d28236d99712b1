//! Services the emulated machine provides to the adapter.

/// Address in emulated-machine memory.
pub type GuestAddr = u32;

/// Opaque guest handler token; only the guest invocation service interprets it.
///
/// The zero token means "no handler".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerRef(pub u32);

impl HandlerRef {
    pub const NONE: HandlerRef = HandlerRef(0);

    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

/// Register convention of a protocol handler call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HandlerRegisters {
    /// Type/length field of the frame, as received.
    pub packet_type: u16,
    /// Bytes after the Ethernet header still readable through the read-more routine.
    pub remaining_len: u32,
    /// Guest address of the payload (just past the header in the packet buffer).
    pub packet_ptr: GuestAddr,
    /// Guest address just past the header copy in the read-header area.
    pub header_tail_ptr: GuestAddr,
    pub read_packet_ptr: GuestAddr,
}

/// Fixed guest-side buffers used while dispatching a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuestLayout {
    /// Buffer receiving the complete frame.
    pub packet_buffer: GuestAddr,
    /// Read-header area receiving a copy of the Ethernet header.
    pub read_header_area: GuestAddr,
    /// Guest routine a handler calls to pull more payload bytes.
    pub read_packet: GuestAddr,
}

/// Memory and code access on the guest's execution context.
pub trait GuestServices {
    fn read_memory(&mut self, addr: GuestAddr, buf: &mut [u8]);

    fn write_memory(&mut self, addr: GuestAddr, bytes: &[u8]);

    /// Call guest code synchronously; the handler may modify `registers`.
    fn invoke_handler(&mut self, handler: HandlerRef, registers: &mut HandlerRegisters);

    fn enter_interrupt(&mut self) {}

    fn leave_interrupt(&mut self) {}
}

/// Host → guest interrupt request line for the Ethernet source. Raised from the reception thread.
pub trait InterruptLine: Send + Sync {
    fn raise(&self);
}

impl<F> InterruptLine for F
where
    F: Fn() + Send + Sync,
{
    fn raise(&self) {
        self()
    }
}

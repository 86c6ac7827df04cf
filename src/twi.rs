//! TWI (I2C)
//!
//! Interrupt-driven driver for the AVR two-wire serial interface. The
//! peripheral operates in two roles at once: master transmitter, for
//! packets queued with [`Twi::start_send`], and slave receiver, for
//! packets addressed to the device (or to the general-call address) and
//! drained with [`Twi::poll_receive`].
//!
//! Begin configuration by calling [`TwiConfig::new()`]. After
//! [`TwiConfig::configure()`] the peripheral acknowledges addressed frames
//! automatically, so inbound packets are accepted whenever the bus is
//! otherwise idle.
//!
//! The protocol is sequenced entirely by [`Twi::handle_interrupt`], which
//! must be called from the TWI interrupt vector. [`Twi::start_send`] and
//! [`Twi::poll_receive`] share buffers with the interrupt; call them with
//! the TWI interrupt masked, or from an interrupt that the TWI interrupt
//! cannot preempt.
//!
//! Transfers are single-slot in each direction: one outbound packet in
//! flight, one inbound packet buffered. There is no queueing. At the
//! standard 100 kHz bit rate a full [`MAX_PAYLOAD`]-byte packet occupies
//! the bus for roughly a millisecond; consumers should poll no faster
//! than that.

use core::convert::Infallible;

use crate::hw_traits::twi::{ControlBits, TwiPeriph, STATUS_MASK};
use bitflags::bitflags;

pub use crate::hw_traits::twi::Prescaler;

/// Capacity in bytes of each transfer buffer.
pub const MAX_PAYLOAD: usize = 8;

// Repeated-start attempts allowed after an address-phase NACK before the
// packet is dropped.
const MAX_ADDR_RETRIES: u8 = 1;

// SLA+W: address in the seven high bits, R/W bit clear for a write.
const fn sla_w(addr: u8) -> u8 {
    (addr & 0x7f) << 1
}

/// Bit-rate generator settings for the bus clock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BitRate {
    divider: u8,
    prescaler: Prescaler,
}

impl BitRate {
    /// Compute divider settings for a target SCL frequency.
    ///
    /// The generator divides the CPU clock as
    /// `scl = clock / (16 + 2 * divider * prescaler)`. The divider
    /// saturates at its 8-bit range, so targets slower than the generator
    /// can reach round up to the slowest reachable rate.
    pub const fn calculate(clock_hz: u32, scl_hz: u32, prescaler: Prescaler) -> Self {
        let scl_hz = if scl_hz == 0 { 1 } else { scl_hz };
        let cycles = clock_hz / scl_hz;
        let divider = cycles.saturating_sub(16) / (2 * prescaler.factor());
        let divider = if divider > 0xff { 0xff } else { divider as u8 };
        BitRate { divider, prescaler }
    }

    /// The divider value written to the bit-rate register.
    pub const fn divider(self) -> u8 {
        self.divider
    }

    /// The prescaler setting written alongside the divider.
    pub const fn prescaler(self) -> Prescaler {
        self.prescaler
    }
}

bitflags! {
    /// Status flags carried by an inbound packet.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct RxFlags: u8 {
        /// A packet is currently being assembled.
        const RECEIVING = 0x01;
        /// A stop condition closed the packet; it is ready to be polled.
        const COMPLETE = 0x02;
        /// More bytes arrived than fit in the buffer; the excess was dropped.
        const OVERFLOW = 0x04;
        /// The packet was addressed to the general-call address.
        const GENERAL_CALL = 0x08;
        /// A completed but unpolled packet was discarded to make room for
        /// this one.
        const PREVIOUS_LOST = 0x10;
    }
}

bitflags! {
    /// Status flags carried by the outbound packet.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct TxFlags: u8 {
        /// The packet is queued or on the wire.
        const SENDING = 0x01;
        /// Every byte was acknowledged and the stop condition issued.
        const COMPLETE = 0x02;
    }
}

/// A received packet, returned by [`Twi::poll_receive`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RxPacket {
    len: u8,
    flags: RxFlags,
    payload: [u8; MAX_PAYLOAD],
}

impl RxPacket {
    const fn empty() -> Self {
        RxPacket {
            len: 0,
            flags: RxFlags::empty(),
            payload: [0; MAX_PAYLOAD],
        }
    }

    fn clear(&mut self) {
        *self = RxPacket::empty();
    }

    // Append one byte, saturating at capacity.
    fn push(&mut self, byte: u8) {
        if (self.len as usize) < MAX_PAYLOAD {
            self.payload[self.len as usize] = byte;
            self.len += 1;
        } else {
            self.flags.insert(RxFlags::OVERFLOW);
        }
    }

    /// Number of payload bytes received before the stop condition.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the packet carries no payload bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The received bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len as usize]
    }

    /// The raw status flag set.
    pub fn flags(&self) -> RxFlags {
        self.flags
    }

    /// The sender pushed more than [`MAX_PAYLOAD`] bytes; the excess was
    /// dropped.
    pub fn is_overflowed(&self) -> bool {
        self.flags.contains(RxFlags::OVERFLOW)
    }

    /// The packet was addressed to the general-call address rather than
    /// the device's own address.
    pub fn is_from_general_call(&self) -> bool {
        self.flags.contains(RxFlags::GENERAL_CALL)
    }

    /// An earlier completed packet was discarded unread to make room for
    /// this one.
    pub fn previous_lost(&self) -> bool {
        self.flags.contains(RxFlags::PREVIOUS_LOST)
    }
}

// Outbound single-slot buffer. Refilled only through start_send.
struct TxBuffer {
    dest: u8,
    sent: u8,
    len: u8,
    flags: TxFlags,
    payload: [u8; MAX_PAYLOAD],
}

impl TxBuffer {
    const fn empty() -> Self {
        TxBuffer {
            dest: 0,
            sent: 0,
            len: 0,
            flags: TxFlags::empty(),
            payload: [0; MAX_PAYLOAD],
        }
    }
}

// Resumption state for the bus protocol between interrupts.
struct Context {
    own_address: u8,
    receiving: bool,
    sending: bool,
    retries: u8,
}

/// Hardware status codes, masked to the defined bits of the status
/// register.
///
/// Values match the "2-wire Serial Interface" transmission-mode tables of
/// the ATmega datasheets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Status {
    /// A start condition has been transmitted.
    StartSent = 0x08,
    /// A repeated start condition has been transmitted.
    RepeatedStartSent = 0x10,
    /// SLA+W has been transmitted and acknowledged.
    AddressAcked = 0x18,
    /// SLA+W has been transmitted and not acknowledged.
    AddressNacked = 0x20,
    /// A data byte has been transmitted and acknowledged.
    DataSentAcked = 0x28,
    /// A data byte has been transmitted and not acknowledged.
    DataSentNacked = 0x30,
    /// Arbitration was lost while transmitting SLA+W or data.
    ArbitrationLost = 0x38,
    /// Own SLA+W has been received and acknowledged.
    OwnAddressReceived = 0x60,
    /// Arbitration was lost as master and own SLA+W was received.
    ArbitrationLostOwnAddress = 0x68,
    /// The general-call address has been received and acknowledged.
    GeneralCallReceived = 0x70,
    /// Arbitration was lost as master and the general-call address was
    /// received.
    ArbitrationLostGeneralCall = 0x78,
    /// A data byte addressed to us has been received and acknowledged.
    DataReceivedAcked = 0x80,
    /// A data byte addressed to us has been received and not acknowledged.
    DataReceivedNacked = 0x88,
    /// A general-call data byte has been received and acknowledged.
    GeneralCallDataAcked = 0x90,
    /// A general-call data byte has been received and not acknowledged.
    GeneralCallDataNacked = 0x98,
    /// A stop condition or repeated start has been received while
    /// addressed as slave.
    StopReceived = 0xa0,
}

impl Status {
    /// Decode a raw status register value, keeping only the status bits.
    pub fn from_raw(raw: u8) -> Option<Status> {
        use Status::*;
        match raw & STATUS_MASK {
            0x08 => Some(StartSent),
            0x10 => Some(RepeatedStartSent),
            0x18 => Some(AddressAcked),
            0x20 => Some(AddressNacked),
            0x28 => Some(DataSentAcked),
            0x30 => Some(DataSentNacked),
            0x38 => Some(ArbitrationLost),
            0x60 => Some(OwnAddressReceived),
            0x68 => Some(ArbitrationLostOwnAddress),
            0x70 => Some(GeneralCallReceived),
            0x78 => Some(ArbitrationLostGeneralCall),
            0x80 => Some(DataReceivedAcked),
            0x88 => Some(DataReceivedNacked),
            0x90 => Some(GeneralCallDataAcked),
            0x98 => Some(GeneralCallDataNacked),
            0xa0 => Some(StopReceived),
            _ => None,
        }
    }
}

/// Reasons a send cannot be started.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// A previous send has not finished. No queueing is performed; retry
    /// after the bus completes the in-flight packet.
    Busy,
    /// The payload is empty or longer than [`MAX_PAYLOAD`].
    InvalidLength,
}

/// Builder for configuring the TWI peripheral.
///
/// Defaults to a 100 kHz bus on a 16 MHz CPU clock with general-call
/// recognition disabled.
pub struct TwiConfig<TWI: TwiPeriph> {
    twi: TWI,
    own_address: u8,
    bit_rate: BitRate,
    general_call: bool,
}

impl<TWI: TwiPeriph> TwiConfig<TWI> {
    /// Begin configuration. `own_address` is the 7-bit address the device
    /// answers to as slave.
    pub fn new(twi: TWI, own_address: u8) -> Self {
        TwiConfig {
            twi,
            own_address: own_address & 0x7f,
            bit_rate: BitRate::calculate(16_000_000, 100_000, Prescaler::Div1),
            general_call: false,
        }
    }

    /// Derive the bit rate from the CPU clock and a target SCL frequency.
    #[inline]
    pub fn bus_speed(mut self, clock_hz: u32, scl_hz: u32) -> Self {
        self.bit_rate = BitRate::calculate(clock_hz, scl_hz, Prescaler::Div1);
        self
    }

    /// Use precomputed bit-rate generator settings.
    #[inline]
    pub fn bit_rate(mut self, bit_rate: BitRate) -> Self {
        self.bit_rate = bit_rate;
        self
    }

    /// Also acknowledge frames addressed to the general-call address.
    #[inline]
    pub fn accept_general_call(mut self) -> Self {
        self.general_call = true;
        self
    }

    /// Program the hardware and arm the ready/listening state.
    ///
    /// The context and both transfer buffers start out empty. Automatic
    /// acknowledge is enabled from here on, so packets addressed to the
    /// device are accepted before the first API call.
    pub fn configure(self) -> Twi<TWI> {
        let TwiConfig {
            twi,
            own_address,
            bit_rate,
            general_call,
        } = self;

        twi.bit_rate_wr(bit_rate.divider, bit_rate.prescaler);
        twi.own_address_wr(own_address, general_call);
        twi.address_mask_wr(0);
        twi.ctl_wr(ControlBits::READY);

        Twi {
            twi,
            ctx: Context {
                own_address,
                receiving: false,
                sending: false,
                retries: 0,
            },
            rx: RxPacket::empty(),
            tx: TxBuffer::empty(),
        }
    }
}

/// An initialized TWI driver.
///
/// Owns the peripheral together with the single-slot transfer buffers and
/// the state needed to resume the bus protocol after each interrupt.
pub struct Twi<TWI: TwiPeriph> {
    twi: TWI,
    ctx: Context,
    rx: RxPacket,
    tx: TxBuffer,
}

impl<TWI: TwiPeriph> Twi<TWI> {
    /// Queue `payload` for transmission to `dest` and begin the bus
    /// transaction if the peripheral is idle.
    ///
    /// Destination 0 addresses the general call. When a receive is in
    /// flight the start condition is deferred until that receive's stop
    /// condition; the packet is accepted either way.
    ///
    /// A rejected call leaves the in-flight packet untouched. A packet
    /// that later fails on the bus (address retries exhausted, or any
    /// data-phase NACK) is dropped without notice; only
    /// [`send_complete`](Twi::send_complete) distinguishes success.
    ///
    /// Must not race [`handle_interrupt`](Twi::handle_interrupt): call
    /// with the TWI interrupt masked, or from an interrupt the TWI
    /// interrupt cannot preempt.
    pub fn start_send(&mut self, dest: u8, payload: &[u8]) -> Result<(), SendError> {
        if self.ctx.sending {
            return Err(SendError::Busy);
        }
        if payload.is_empty() || payload.len() > MAX_PAYLOAD {
            return Err(SendError::InvalidLength);
        }

        self.tx.dest = dest & 0x7f;
        self.tx.len = payload.len() as u8;
        self.tx.sent = 0;
        self.tx.flags = TxFlags::SENDING;
        self.tx.payload[..payload.len()].copy_from_slice(payload);
        self.ctx.sending = true;
        self.ctx.retries = 0;

        if !self.ctx.receiving {
            // Kick off the transaction. Otherwise the stop-condition
            // handler issues the start once the receive finishes.
            self.twi
                .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTA);
        }

        Ok(())
    }

    /// Take the completed inbound packet, if one is buffered.
    ///
    /// Returns a packet exactly once per completed receive and clears the
    /// inbound slot for the next one. Same calling constraint as
    /// [`start_send`](Twi::start_send).
    pub fn poll_receive(&mut self) -> nb::Result<RxPacket, Infallible> {
        if self.rx.flags.contains(RxFlags::COMPLETE) {
            let packet = self.rx;
            self.rx.clear();
            Ok(packet)
        } else {
            Err(nb::Error::WouldBlock)
        }
    }

    /// Whether an outbound packet is queued or on the wire.
    #[inline(always)]
    pub fn is_sending(&self) -> bool {
        self.ctx.sending
    }

    /// Whether an addressed receive is in progress.
    #[inline(always)]
    pub fn is_receiving(&self) -> bool {
        self.ctx.receiving
    }

    /// Whether the most recently accepted send was fully acknowledged.
    ///
    /// Cleared when the next send is accepted. An aborted send never sets
    /// this.
    #[inline(always)]
    pub fn send_complete(&self) -> bool {
        self.tx.flags.contains(TxFlags::COMPLETE)
    }

    /// Payload bytes of the current or most recent send written to the
    /// bus so far.
    #[inline(always)]
    pub fn bytes_sent(&self) -> usize {
        self.tx.sent as usize
    }

    /// The 7-bit address the device answers to as slave.
    #[inline(always)]
    pub fn own_address(&self) -> u8 {
        self.ctx.own_address
    }

    /// Release the peripheral.
    pub fn free(self) -> TWI {
        self.twi
    }

    /// Service one bus event. Call from the TWI interrupt vector.
    ///
    /// Reads the status code and reprograms the control register to
    /// continue the current transfer, retry it, or return the peripheral
    /// to the ready/listening state. Never blocks.
    pub fn handle_interrupt(&mut self) {
        let raw = self.twi.status_rd() & STATUS_MASK;
        let status = match Status::from_raw(raw) {
            Some(status) => status,
            None => {
                // Unrecognized code: fall back to listening rather than
                // leave the peripheral stalled.
                #[cfg(feature = "defmt")]
                defmt::warn!("unexpected TWI status {=u8:x}", raw);
                self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);
                return;
            }
        };

        match status {
            // Addressed as slave receiver, directly or after losing
            // arbitration as master. Keep acknowledging.
            Status::OwnAddressReceived
            | Status::ArbitrationLostOwnAddress
            | Status::GeneralCallReceived
            | Status::ArbitrationLostGeneralCall => {
                self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);
                self.ctx.receiving = true;
            }
            Status::DataReceivedAcked | Status::DataReceivedNacked => {
                self.on_data_received(false);
            }
            Status::GeneralCallDataAcked | Status::GeneralCallDataNacked => {
                self.on_data_received(true);
            }
            Status::StopReceived => self.on_stop(),
            Status::StartSent | Status::RepeatedStartSent => self.on_start_sent(status),
            Status::AddressAcked => self.on_address_acked(),
            Status::AddressNacked => self.on_address_nacked(),
            Status::DataSentAcked => self.on_data_acked(),
            Status::DataSentNacked => {
                if self.ctx.sending {
                    // A data-phase NACK is fatal for the packet; only the
                    // address phase is ever retried.
                    #[cfg(feature = "defmt")]
                    defmt::warn!("data byte NACKed, dropping send");
                    self.abort_send();
                } else {
                    self.protocol_violation(status);
                }
            }
            Status::ArbitrationLost => {
                if self.ctx.sending {
                    // The hardware re-sends the start once the bus frees
                    // up; the transfer restarts from the address phase.
                    self.twi
                        .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTA);
                } else {
                    self.protocol_violation(status);
                }
            }
        }
    }

    fn on_data_received(&mut self, general_call: bool) {
        let data = self.twi.data_rd();
        self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);

        if !self.ctx.receiving {
            // Data without a preceding address match. Accept it anyway.
            #[cfg(feature = "defmt")]
            defmt::warn!("TWI data byte without address match");
            self.ctx.receiving = true;
        }
        if self.rx.flags.contains(RxFlags::COMPLETE) {
            // Newest overwrites unread oldest.
            self.rx.clear();
            self.rx.flags.insert(RxFlags::PREVIOUS_LOST);
        }
        self.rx.flags.insert(RxFlags::RECEIVING);
        if general_call {
            self.rx.flags.insert(RxFlags::GENERAL_CALL);
        }
        self.rx.push(data);
    }

    fn on_stop(&mut self) {
        if self.ctx.receiving {
            self.rx.flags.remove(RxFlags::RECEIVING);
            self.rx.flags.insert(RxFlags::COMPLETE);
            self.ctx.receiving = false;
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("TWI stop condition without a receive in progress");
        }
        if self.ctx.sending {
            // A send was queued behind this receive; start it now.
            self.twi
                .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTA);
        } else {
            self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);
        }
    }

    fn on_start_sent(&mut self, status: Status) {
        if !self.ctx.sending {
            self.protocol_violation(status);
            return;
        }
        // Rewriting the control register without TWSTA also clears the
        // pending start request.
        self.twi.data_wr(sla_w(self.tx.dest));
        self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);
        if status == Status::StartSent {
            // A repeated start after an address NACK must keep the retry
            // count, or the retry bound would never be reached.
            self.ctx.retries = 0;
        }
    }

    fn on_address_acked(&mut self) {
        if !self.ctx.sending {
            self.protocol_violation(Status::AddressAcked);
            return;
        }
        if self.tx.len == 0 {
            // start_send never queues an empty packet; an empty buffer
            // here means the transfer state is corrupt.
            self.abort_send();
            return;
        }
        self.tx.sent = 0;
        self.twi.data_wr(self.tx.payload[0]);
        self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);
        self.tx.sent = 1;
        self.ctx.retries = 0;
    }

    fn on_address_nacked(&mut self) {
        if !self.ctx.sending {
            self.protocol_violation(Status::AddressNacked);
            return;
        }
        if self.ctx.retries < MAX_ADDR_RETRIES {
            self.ctx.retries += 1;
            #[cfg(feature = "defmt")]
            defmt::trace!("TWI address NACKed, retrying");
            self.twi
                .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTA);
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!("TWI address NACKed after retry, dropping send");
            self.abort_send();
        }
    }

    fn on_data_acked(&mut self) {
        if !self.ctx.sending {
            self.protocol_violation(Status::DataSentAcked);
            return;
        }
        let sent = self.tx.sent as usize;
        if sent < self.tx.len as usize {
            self.twi.data_wr(self.tx.payload[sent]);
            self.twi.ctl_wr(ControlBits::READY | ControlBits::TWINT);
            self.tx.sent += 1;
        } else {
            // Last byte acknowledged: close the transaction and accept
            // the next packet.
            self.twi
                .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTO);
            self.ctx.sending = false;
            self.tx.flags = TxFlags::COMPLETE;
        }
    }

    // Drop the outbound packet and release the bus.
    fn abort_send(&mut self) {
        self.twi
            .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTO);
        self.ctx.sending = false;
        self.tx.flags.remove(TxFlags::SENDING);
    }

    // Transmitter-side status observed while no send is in flight.
    fn protocol_violation(&mut self, status: Status) {
        #[cfg(feature = "defmt")]
        defmt::warn!("TWI status {} while not sending", status);
        let _ = status;
        self.twi
            .ctl_wr(ControlBits::READY | ControlBits::TWINT | ControlBits::TWSTO);
    }
}

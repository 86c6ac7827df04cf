//! Simulated TWI register file for driving the state machine on the host.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use atmega_twi::hw_traits::twi::{ControlBits, Prescaler, TwiPeriph};
use atmega_twi::twi::{Status, Twi, TwiConfig};

/// Captured register state. Writes are logged so tests can assert on the
/// exact reprogramming sequence the driver performs.
#[derive(Default)]
pub struct Regs {
    pub status: u8,
    pub data: u8,
    pub data_writes: Vec<u8>,
    pub ctl_writes: Vec<ControlBits>,
    pub bit_rate: Option<(u8, Prescaler)>,
    pub own_address: Option<(u8, bool)>,
    pub address_mask: Option<u8>,
}

/// Shared-handle register file. The driver owns one handle; the test keeps
/// a clone so it can present status codes and inspect writes.
#[derive(Clone, Default)]
pub struct SimTwi {
    regs: Arc<Mutex<Regs>>,
}

impl SimTwi {
    pub fn new() -> Self {
        SimTwi::default()
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut Regs) -> R) -> R {
        f(&mut self.regs.lock().unwrap())
    }

    pub fn last_ctl(&self) -> ControlBits {
        self.with(|r| *r.ctl_writes.last().expect("no control register writes"))
    }

    pub fn ctl_write_count(&self) -> usize {
        self.with(|r| r.ctl_writes.len())
    }

    pub fn data_writes(&self) -> Vec<u8> {
        self.with(|r| r.data_writes.clone())
    }
}

impl TwiPeriph for SimTwi {
    fn status_rd(&self) -> u8 {
        self.with(|r| r.status)
    }

    fn data_rd(&self) -> u8 {
        self.with(|r| r.data)
    }

    fn data_wr(&self, val: u8) {
        self.with(|r| {
            r.data = val;
            r.data_writes.push(val);
        });
    }

    fn bit_rate_wr(&self, divider: u8, prescaler: Prescaler) {
        self.with(|r| r.bit_rate = Some((divider, prescaler)));
    }

    fn own_address_wr(&self, addr: u8, general_call: bool) {
        self.with(|r| r.own_address = Some((addr, general_call)));
    }

    fn address_mask_wr(&self, mask: u8) {
        self.with(|r| r.address_mask = Some(mask));
    }

    fn ctl_wr(&self, ctl: ControlBits) {
        self.with(|r| r.ctl_writes.push(ctl));
    }
}

/// A configured driver plus the test's handle to its registers.
pub fn new_driver(own_address: u8) -> (Twi<SimTwi>, SimTwi) {
    let sim = SimTwi::new();
    let twi = TwiConfig::new(sim.clone(), own_address).configure();
    (twi, sim)
}

/// Present a status code and service the resulting "interrupt".
pub fn event(twi: &mut Twi<SimTwi>, sim: &SimTwi, status: Status) {
    sim.with(|r| r.status = status as u8);
    twi.handle_interrupt();
}

/// Present a raw status register value, prescaler bits and all.
pub fn event_raw(twi: &mut Twi<SimTwi>, sim: &SimTwi, raw: u8) {
    sim.with(|r| r.status = raw);
    twi.handle_interrupt();
}

/// Present a received data byte along with its status code.
pub fn data_event(twi: &mut Twi<SimTwi>, sim: &SimTwi, status: Status, byte: u8) {
    sim.with(|r| {
        r.status = status as u8;
        r.data = byte;
    });
    twi.handle_interrupt();
}

/// Control word that releases the bus for the next event.
pub fn ctl_continue() -> ControlBits {
    ControlBits::READY | ControlBits::TWINT
}

/// Control word that additionally requests a start condition.
pub fn ctl_start() -> ControlBits {
    ctl_continue() | ControlBits::TWSTA
}

/// Control word that additionally requests a stop condition.
pub fn ctl_stop() -> ControlBits {
    ctl_continue() | ControlBits::TWSTO
}
